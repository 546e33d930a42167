//! 阶段执行器
//!
//! 生成阶段与整合阶段各自是一条“读取 → 计算 → 写出”的直线流程，
//! 只写预分配的存储键，不碰数据库。像素计算在 `spawn_blocking` 中完成，
//! 位图只在阻塞闭包内存活，不跨 `.await`。

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use image::RgbaImage;
use lru::LruCache;

use super::{FrameJob, FrameSource, IntegrationJob, JobSpec};
use crate::error::AppError;
use crate::imaging::decode::{decode_bitmap, decode_subject, encode_png};
use crate::imaging::{prepare_frame, Compositor, ImageError, ImagingConfig};
use crate::provider::prompt::{reference_frame_prompt, themed_frame_prompt};
use crate::provider::FrameProvider;
use crate::storage::{ObjectStore, PNG_CONTENT_TYPE};

pub struct PhaseRunner<P, S> {
    /// 为空时只能执行整合阶段
    provider: Option<Arc<P>>,
    store: Arc<S>,
    imaging: ImagingConfig,
    /// 已解码画框缓存（按存储键）；容量为 0 时不缓存
    frame_cache: Option<Mutex<LruCache<String, Arc<RgbaImage>>>>,
}

impl<P, S> PhaseRunner<P, S>
where
    P: FrameProvider,
    S: ObjectStore,
{
    pub fn new(provider: Arc<P>, store: Arc<S>, imaging: ImagingConfig, frame_cache_entries: usize) -> Self {
        Self::build(Some(provider), store, imaging, frame_cache_entries)
    }

    /// 不带生成服务的执行器：生成阶段直接报 `AppError::Config`。
    pub fn without_provider(store: Arc<S>, imaging: ImagingConfig, frame_cache_entries: usize) -> Self {
        Self::build(None, store, imaging, frame_cache_entries)
    }

    fn build(provider: Option<Arc<P>>, store: Arc<S>, imaging: ImagingConfig, frame_cache_entries: usize) -> Self {
        Self {
            provider,
            store,
            imaging,
            frame_cache: NonZeroUsize::new(frame_cache_entries).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn can_generate(&self) -> bool {
        self.provider.is_some()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn imaging(&self) -> &ImagingConfig {
        &self.imaging
    }

    pub async fn run(&self, spec: JobSpec) -> Result<(), AppError> {
        match spec {
            JobSpec::Frame(job) => self.run_frame(job).await,
            JobSpec::Integration(job) => self.run_integration(job).await,
        }
    }

    /// 生成阶段：参考图解码 → 生成 → 归一化 + 开口 → PNG → 写入预分配键。
    pub async fn run_frame(&self, job: FrameJob) -> Result<(), AppError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AppError::Config("未配置生成服务，无法执行生成阶段".to_string()))?;
        let started = Instant::now();
        let FrameJob {
            frame_id,
            storage_key,
            source,
            strategy,
        } = job;

        let (prompt, references) = match source {
            FrameSource::Theme(theme) => (themed_frame_prompt(&theme), Vec::new()),
            FrameSource::Reference(bytes) => {
                let config = self.imaging.clone();
                let reference = run_blocking("解码参考图", move || decode_bitmap(&bytes, &config)).await?;
                (reference_frame_prompt(), vec![reference])
            }
        };

        let raw = provider.generate(&prompt, references).await?;
        let generated_at = started.elapsed();

        let config = self.imaging.clone();
        let png = run_blocking("画框归一化", move || {
            let (frame, _aperture) = prepare_frame(raw, &strategy, &config)?;
            encode_png(&frame)
        })
        .await?;
        let png_len = png.len();

        self.store
            .put(&storage_key, Bytes::from(png), PNG_CONTENT_TYPE)
            .await?;

        log::info!(
            "✅ 画框 {} 已写入 {}（{} 字节，生成 {}ms，总计 {}ms）",
            frame_id,
            storage_key,
            png_len,
            generated_at.as_millis(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// 整合阶段：取画框 → 人像解码 → 合成 → PNG → 写入预分配键。
    pub async fn run_integration(&self, job: IntegrationJob) -> Result<(), AppError> {
        let started = Instant::now();
        let IntegrationJob {
            composite_id,
            frame_key,
            frame_strategy,
            photo,
            output_key,
            scale_override,
        } = job;

        let frame = self.load_frame(&frame_key).await?;
        let loaded_at = started.elapsed();

        let config = self.imaging.clone();
        let png = run_blocking("合成", move || {
            let subject = decode_subject(&photo, &config)?;
            let compositor = Compositor::new(&config);
            let result = match scale_override {
                Some(mode) => compositor.integrate_with_mode(&frame, &subject, &frame_strategy, mode)?,
                None => compositor.integrate(&frame, &subject, &frame_strategy)?,
            };
            encode_png(&result.bitmap)
        })
        .await?;
        let png_len = png.len();

        self.store
            .put(&output_key, Bytes::from(png), PNG_CONTENT_TYPE)
            .await?;

        log::info!(
            "✅ 合成 {} 已写入 {}（{} 字节，取画框 {}ms，总计 {}ms）",
            composite_id,
            output_key,
            png_len,
            loaded_at.as_millis(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    async fn load_frame(&self, key: &str) -> Result<Arc<RgbaImage>, AppError> {
        if let Some(hit) = self.cached_frame(key) {
            log::debug!("🎯 画框缓存命中: {}", key);
            return Ok(hit);
        }

        let bytes = self.store.get(key).await?;
        let config = self.imaging.clone();
        let frame = Arc::new(run_blocking("解码画框", move || decode_bitmap(&bytes, &config)).await?);

        if let Some(cache) = &self.frame_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(key.to_string(), Arc::clone(&frame));
            }
        }
        Ok(frame)
    }

    fn cached_frame(&self, key: &str) -> Option<Arc<RgbaImage>> {
        let cache = self.frame_cache.as_ref()?;
        let mut cache = cache.lock().ok()?;
        cache.get(key).cloned()
    }
}

async fn run_blocking<T, F>(stage: &'static str, op: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ImageError> + Send + 'static,
{
    let output = tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AppError::Queue(format!("{}任务异常终止: {}", stage, e)))??;
    Ok(output)
}
