//! 请求侧服务
//!
//! # 设计思路
//!
//! 请求路径只做四件事：校验输入、分配 ID 与存储键、写占位记录、入队。
//! 不等待任何阶段完成，结果通过预分配键上是否出现对象来体现；需要同步等待的调用方
//! （例如 CLI）使用返回的 `JobTicket`。
//!
//! # 实现思路
//!
//! - 数据库操作通过 `RecordStore::with_conn` 在独立连接上执行，不与后台阶段共享连接。
//! - 入队失败时占位记录已经写入，成为孤儿记录，留给对账器处理。

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{self, CompositeRecord, FrameRecord, ReconcileReport, RecordStore};
use crate::error::AppError;
use crate::imaging::decode::sniff_upload;
use crate::imaging::{ApertureStrategy, ImagingConfig, ScaleMode};
use crate::jobs::{FrameJob, FrameSource, IntegrationJob, JobQueue, JobSpec, JobTicket, JobsConfig, PhaseRunner};
use crate::provider::prompt::normalize_theme;
use crate::provider::{FrameProvider, HttpFrameProvider};
use crate::storage::{object_key, validate_key, ObjectStore};

/// 画框生成请求
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub source: FrameSource,
    /// 为空时使用配置中的默认开口策略
    pub strategy: Option<ApertureStrategy>,
}

impl FrameRequest {
    pub fn from_theme(theme: impl Into<String>) -> Self {
        Self {
            source: FrameSource::Theme(theme.into()),
            strategy: None,
        }
    }

    pub fn from_reference(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: FrameSource::Reference(bytes.into()),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ApertureStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// 已受理的请求：记录 ID、预分配的存储键与任务句柄
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub storage_key: String,
    pub ticket: JobTicket,
}

/// 某个用户的记录概览
#[derive(Debug, Clone, Serialize)]
pub struct OwnerListing {
    pub frames: Vec<FrameRecord>,
    pub composites: Vec<CompositeRecord>,
}

pub struct StudioService<S> {
    records: RecordStore,
    store: Arc<S>,
    queue: JobQueue,
    imaging: ImagingConfig,
    reconcile_grace: Duration,
    can_generate: bool,
}

impl<S: ObjectStore> StudioService<S> {
    /// 构造服务并启动后台 worker；必须在 tokio 运行时内调用。
    pub fn start<P: FrameProvider>(
        records: RecordStore,
        provider: Arc<P>,
        store: Arc<S>,
        imaging: ImagingConfig,
        jobs: &JobsConfig,
    ) -> Self {
        let runner = PhaseRunner::new(provider, Arc::clone(&store), imaging.clone(), jobs.frame_cache_entries);
        Self::with_runner(records, store, runner, imaging, jobs)
    }

    /// 只受理整合请求的服务，不需要生成服务凭据；`submit_frame` 返回 `AppError::Config`。
    pub fn start_integration_only(
        records: RecordStore,
        store: Arc<S>,
        imaging: ImagingConfig,
        jobs: &JobsConfig,
    ) -> Self {
        let runner = PhaseRunner::<HttpFrameProvider, S>::without_provider(
            Arc::clone(&store),
            imaging.clone(),
            jobs.frame_cache_entries,
        );
        Self::with_runner(records, store, runner, imaging, jobs)
    }

    fn with_runner<P: FrameProvider>(
        records: RecordStore,
        store: Arc<S>,
        runner: PhaseRunner<P, S>,
        imaging: ImagingConfig,
        jobs: &JobsConfig,
    ) -> Self {
        let can_generate = runner.can_generate();
        let queue = JobQueue::start(Arc::new(runner), jobs);

        Self {
            records,
            store,
            queue,
            imaging,
            reconcile_grace: Duration::from_secs(jobs.reconcile_grace_secs),
            can_generate,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// 受理一次画框生成：校验来源、写占位记录、入队，立即返回。
    pub async fn submit_frame(&self, owner_id: &str, request: FrameRequest) -> Result<Submission, AppError> {
        if !self.can_generate {
            return Err(AppError::Config("未配置生成服务，只能受理整合请求".to_string()));
        }
        let source = match request.source {
            FrameSource::Reference(bytes) => {
                let mime = sniff_upload(&bytes, &self.imaging)?;
                log::debug!("📎 参考图类型 {}，{} 字节", mime, bytes.len());
                FrameSource::Reference(bytes)
            }
            FrameSource::Theme(theme) => FrameSource::Theme(normalize_theme(&theme)?),
        };
        let strategy = request
            .strategy
            .unwrap_or_else(|| self.imaging.aperture_strategy.clone());

        let id = new_record_id();
        let storage_key = object_key(owner_id, &id)?;
        let record = FrameRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            storage_key: storage_key.clone(),
            is_public: false,
            aperture: strategy.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.records
            .with_conn(move |conn| db::insert_frame(conn, &record))
            .await?;

        let ticket = self.enqueue(JobSpec::Frame(FrameJob {
            frame_id: id.clone(),
            storage_key: storage_key.clone(),
            source,
            strategy,
        }))?;

        log::info!("📝 画框请求已受理: {} -> {}（任务 {}）", id, storage_key, ticket.id);
        Ok(Submission {
            id,
            storage_key,
            ticket,
        })
    }

    /// 受理一次人像整合；画框必须属于调用方或已公开，否则视为不存在。
    pub async fn submit_integration(
        &self,
        owner_id: &str,
        frame_id: &str,
        photo: Bytes,
        scale_override: Option<ScaleMode>,
    ) -> Result<Submission, AppError> {
        sniff_upload(&photo, &self.imaging)?;

        let lookup_id = frame_id.to_string();
        let owner = owner_id.to_string();
        let frame = self
            .records
            .with_conn(move |conn| db::get_frame_for_owner(conn, &lookup_id, &owner))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("画框 {}", frame_id)))?;

        let id = new_record_id();
        let output_key = object_key(owner_id, &id)?;
        let record = CompositeRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            storage_key: output_key.clone(),
            frame_id: Some(frame.id.clone()),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.records
            .with_conn(move |conn| db::insert_composite(conn, &record))
            .await?;

        let ticket = self.enqueue(JobSpec::Integration(IntegrationJob {
            composite_id: id.clone(),
            frame_key: frame.storage_key,
            frame_strategy: frame.aperture,
            photo,
            output_key: output_key.clone(),
            scale_override,
        }))?;

        log::info!(
            "📝 整合请求已受理: {} -> {}（画框 {}，任务 {}）",
            id,
            output_key,
            frame.id,
            ticket.id
        );
        Ok(Submission {
            id,
            storage_key: output_key,
            ticket,
        })
    }

    /// 读取已存储的 PNG。
    pub async fn fetch_image(&self, key: &str) -> Result<Bytes, AppError> {
        validate_key(key)?;
        self.store.get(key).await
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<OwnerListing, AppError> {
        let owner = owner_id.to_string();
        self.records
            .with_conn(move |conn| {
                Ok(OwnerListing {
                    frames: db::list_frames_for_owner(conn, &owner)?,
                    composites: db::list_composites_for_owner(conn, &owner)?,
                })
            })
            .await
    }

    pub async fn list_public_frames(&self, limit: i64) -> Result<Vec<FrameRecord>, AppError> {
        self.records
            .with_conn(move |conn| db::list_public_frames(conn, limit))
            .await
    }

    /// 修改画框的公开状态；只有所有者可以修改。
    pub async fn set_frame_visibility(&self, owner_id: &str, frame_id: &str, is_public: bool) -> Result<(), AppError> {
        let owner = owner_id.to_string();
        let id = frame_id.to_string();
        let updated = self
            .records
            .with_conn(move |conn| db::set_frame_visibility(conn, &id, &owner, is_public))
            .await?;
        if !updated {
            return Err(AppError::NotFound(format!("画框 {}", frame_id)));
        }
        Ok(())
    }

    /// 使用配置中的宽限期执行一次对账。
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        db::reconcile(&self.records, self.store.as_ref(), self.reconcile_grace).await
    }

    /// 停止受理新任务并等待已入队任务完成。
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    fn enqueue(&self, spec: JobSpec) -> Result<JobTicket, AppError> {
        let key = spec.output_key().to_string();
        self.queue.submit(spec).map_err(|e| {
            log::warn!("⚠️ 入队失败，占位记录 {} 将由对账器清理: {}", key, e);
            e
        })
    }
}

fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}
