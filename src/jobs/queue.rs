//! 后台任务队列
//!
//! 有界 `mpsc` 通道 + 固定数量 worker。每个任务在独立的 `tokio::spawn` 中执行并套上
//! 阶段时限：超时、失败与 panic 都只影响该任务本身，worker 继续处理后续任务。
//! 调用方通过 `JobTicket` 观察状态，不需要轮询存储。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{JobId, JobSpec, JobState, JobsConfig, PhaseRunner};
use crate::error::AppError;
use crate::provider::FrameProvider;
use crate::storage::ObjectStore;

/// 入队任务的观察句柄
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub id: JobId,
    pub kind: &'static str,
    pub output_key: String,
    state: watch::Receiver<JobState>,
}

impl JobTicket {
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// 等待任务进入终态；队列在任务执行前被关闭时返回最后观察到的状态。
    pub async fn wait(&mut self) -> JobState {
        let waited = self
            .state
            .wait_for(JobState::is_terminal)
            .await
            .map(|state| state.clone());
        match waited {
            Ok(state) => state,
            Err(_) => self.state.borrow().clone(),
        }
    }
}

struct QueuedJob {
    id: JobId,
    spec: JobSpec,
    state: watch::Sender<JobState>,
}

pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// 启动 worker；必须在 tokio 运行时内调用。
    pub fn start<P, S>(runner: Arc<PhaseRunner<P, S>>, config: &JobsConfig) -> Self
    where
        P: FrameProvider,
        S: ObjectStore,
    {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let phase_timeout = Duration::from_secs(config.phase_timeout_secs);

        let workers = (0..config.workers.max(1))
            .map(|index| {
                let runner = Arc::clone(&runner);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };
                        execute(index, &runner, job, phase_timeout).await;
                    }
                    log::debug!("🛑 worker #{} 已退出", index);
                })
            })
            .collect();

        log::info!(
            "🚀 任务队列已启动：{} 个 worker，容量 {}，阶段时限 {}s",
            config.workers.max(1),
            config.queue_capacity.max(1),
            config.phase_timeout_secs
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// 非阻塞入队；队列已满或已关闭时返回 `AppError::Queue`。
    pub fn submit(&self, spec: JobSpec) -> Result<JobTicket, AppError> {
        let sender = self
            .sender
            .lock()
            .map_err(|e| AppError::Queue(format!("获取队列锁失败: {}", e)))?
            .clone()
            .ok_or_else(|| AppError::Queue("队列已关闭".to_string()))?;

        let id = JobId::new();
        let kind = spec.kind();
        let output_key = spec.output_key().to_string();
        let (state_tx, state_rx) = watch::channel(JobState::Queued);

        sender
            .try_send(QueuedJob {
                id,
                spec,
                state: state_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AppError::Queue("队列已满，请稍后重试".to_string()),
                mpsc::error::TrySendError::Closed(_) => AppError::Queue("队列已关闭".to_string()),
            })?;

        log::debug!("📥 任务 {} 已入队（{} -> {}）", id, kind, output_key);

        Ok(JobTicket {
            id,
            kind,
            output_key,
            state: state_rx,
        })
    }

    /// 停止接收新任务，等待已入队的任务全部执行完毕。
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(e) = worker.await {
                log::warn!("⚠️ worker 异常退出: {}", e);
            }
        }
        log::info!("🛑 任务队列已关闭");
    }
}

async fn execute<P, S>(worker: usize, runner: &Arc<PhaseRunner<P, S>>, job: QueuedJob, phase_timeout: Duration)
where
    P: FrameProvider,
    S: ObjectStore,
{
    let QueuedJob { id, spec, state } = job;
    let kind = spec.kind();
    let output_key = spec.output_key().to_string();
    state.send_replace(JobState::Running);
    let started = Instant::now();

    let runner = Arc::clone(runner);
    let handle = tokio::spawn(async move { tokio::time::timeout(phase_timeout, runner.run(spec)).await });

    let outcome = match handle.await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(_)) => Err(AppError::Timeout(format!(
            "{} 阶段超过 {}s 未完成",
            kind,
            phase_timeout.as_secs()
        ))),
        Err(join_error) if join_error.is_panic() => Err(AppError::Queue(format!("{} 阶段 panic", kind))),
        Err(join_error) => Err(AppError::Queue(format!("{} 阶段被取消: {}", kind, join_error))),
    };

    match outcome {
        Ok(()) => {
            log::info!(
                "✅ [worker #{}] 任务 {}（{}）完成，耗时 {}ms",
                worker,
                id,
                kind,
                started.elapsed().as_millis()
            );
            state.send_replace(JobState::Succeeded);
        }
        Err(e) => {
            log::error!(
                "❌ [worker #{}] 任务 {}（{} -> {}）失败，耗时 {}ms: {}",
                worker,
                id,
                kind,
                output_key,
                started.elapsed().as_millis(),
                e
            );
            state.send_replace(JobState::Failed(e.to_string()));
        }
    }
}
