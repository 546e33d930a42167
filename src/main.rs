//! # 画框合成流水线：命令行入口
//!
//! 本文件只负责参数解析、日志初始化与组件装配。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use totem_compositor::config::AppConfig;
use totem_compositor::db::{self, RecordStore};
use totem_compositor::error::AppError;
use totem_compositor::imaging::decode::{decode_bitmap, decode_subject, encode_png};
use totem_compositor::imaging::{prepare_frame, ApertureInsets, ApertureStrategy, Compositor, ScaleMode};
use totem_compositor::jobs::JobState;
use totem_compositor::provider::{FrameProvider, HttpFrameProvider};
use totem_compositor::service::{FrameRequest, StudioService, Submission};
use totem_compositor::storage::FsObjectStore;

#[derive(Parser)]
#[command(name = "totem", about = "Decorative frame generation and photo compositing")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认读取 TOTEM_CONFIG 或 ./totem.json）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a frame from a reference image or a text theme
    Generate(GenerateArgs),
    /// Place a photo into a stored frame
    Integrate(IntegrateArgs),
    /// Composite local files without touching storage or records
    Compose(ComposeArgs),
    /// Delete records whose stored object no longer exists
    Reconcile(ReconcileArgs),
    /// List frames and composites of an owner
    List(ListArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["reference", "theme"])))]
struct GenerateArgs {
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    owner: String,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// 生成成功后公开该画框
    #[arg(long)]
    public: bool,
}

#[derive(Args)]
struct IntegrateArgs {
    #[arg(long)]
    frame: String,
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    owner: String,
    #[arg(long, value_enum)]
    scale: Option<ScaleArg>,
}

#[derive(Args)]
struct ComposeArgs {
    #[arg(long)]
    frame: PathBuf,
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long, value_enum)]
    scale: Option<ScaleArg>,
    /// 画框是未经处理的原始图，先做归一化与开口处理
    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct ReconcileArgs {
    /// 覆盖配置中的宽限期（秒）
    #[arg(long)]
    grace_secs: Option<u64>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, required_unless_present = "public")]
    owner: Option<String>,
    /// 列出公开画框
    #[arg(long)]
    public: bool,
    #[arg(long, default_value_t = 50)]
    limit: i64,
}

#[derive(Args)]
struct ConfigArgs {
    /// 把生效配置写到该路径
    #[arg(long)]
    write: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Fixed,
    Mask,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScaleArg {
    Cover,
    Contain,
}

impl From<ScaleArg> for ScaleMode {
    fn from(value: ScaleArg) -> Self {
        match value {
            ScaleArg::Cover => ScaleMode::Cover,
            ScaleArg::Contain => ScaleMode::Contain,
        }
    }
}

#[derive(Serialize)]
struct JobOutcome {
    id: String,
    storage_key: String,
    state: JobState,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_from_path(&config_path);

    if let Err(err) = run(cli.command, config).await {
        log::error!("❌ {}", err);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: AppConfig) -> Result<(), AppError> {
    config.validate()?;

    match command {
        Commands::Generate(args) => generate(args, &config).await,
        Commands::Integrate(args) => integrate(args, &config).await,
        Commands::Compose(args) => compose(args, &config).await,
        Commands::Reconcile(args) => reconcile(args, &config).await,
        Commands::List(args) => list(args, &config).await,
        Commands::Config(args) => show_config(args, &config),
    }
}

async fn generate(args: GenerateArgs, config: &AppConfig) -> Result<(), AppError> {
    let provider = Arc::new(HttpFrameProvider::new(config.provider.clone(), config.imaging.clone())?);
    let service = open_service(config, provider)?;

    let mut request = match (&args.reference, args.theme) {
        (Some(path), _) => FrameRequest::from_reference(read_file(path).await?),
        (None, Some(theme)) => FrameRequest::from_theme(theme),
        (None, None) => return Err(AppError::InvalidInput("需要 --reference 或 --theme".to_string())),
    };
    if let Some(strategy) = args.strategy {
        request = request.with_strategy(resolve_strategy(strategy, config));
    }

    let submission = service.submit_frame(&args.owner, request).await?;
    let outcome = wait_for(submission).await;

    if args.public && outcome.state == JobState::Succeeded {
        service
            .set_frame_visibility(&args.owner, &outcome.id, true)
            .await?;
    }

    service.shutdown().await;
    print_json(&outcome)
}

async fn integrate(args: IntegrateArgs, config: &AppConfig) -> Result<(), AppError> {
    let records = RecordStore::open(&config.database.path)?;
    let store = Arc::new(FsObjectStore::open(&config.storage.root)?);
    let service = StudioService::start_integration_only(records, store, config.imaging.clone(), &config.jobs);

    let photo = read_file(&args.photo).await?;
    let submission = service
        .submit_integration(&args.owner, &args.frame, photo, args.scale.map(ScaleMode::from))
        .await?;
    let outcome = wait_for(submission).await;

    service.shutdown().await;
    print_json(&outcome)
}

async fn compose(args: ComposeArgs, config: &AppConfig) -> Result<(), AppError> {
    let frame_bytes = read_file(&args.frame).await?;
    let photo_bytes = read_file(&args.photo).await?;
    let strategy = args
        .strategy
        .map(|s| resolve_strategy(s, config))
        .unwrap_or(config.imaging.aperture_strategy);
    let imaging = config.imaging.clone();
    let scale = args.scale.map(ScaleMode::from);
    let raw = args.raw;

    let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, AppError> {
        let mut frame = decode_bitmap(&frame_bytes, &imaging)?;
        if raw {
            frame = prepare_frame(frame, &strategy, &imaging)?.0;
        }
        let subject = decode_subject(&photo_bytes, &imaging)?;
        let compositor = Compositor::new(&imaging);
        let result = match scale {
            Some(mode) => compositor.integrate_with_mode(&frame, &subject, &strategy, mode)?,
            None => compositor.integrate(&frame, &subject, &strategy)?,
        };
        log::info!(
            "🧩 人像缩放至 {}x{}，偏移 ({}, {})",
            result.placement.size.0,
            result.placement.size.1,
            result.placement.offset.0,
            result.placement.offset.1
        );
        Ok(encode_png(&result.bitmap)?)
    })
    .await
    .map_err(|e| AppError::Queue(format!("合成任务异常终止: {}", e)))??;

    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&args.out, &png).await?;
    log::info!("💾 已写出 {}（{} 字节）", args.out.display(), png.len());
    Ok(())
}

async fn reconcile(args: ReconcileArgs, config: &AppConfig) -> Result<(), AppError> {
    let records = RecordStore::open(&config.database.path)?;
    let store = FsObjectStore::open(&config.storage.root)?;
    let grace = Duration::from_secs(args.grace_secs.unwrap_or(config.jobs.reconcile_grace_secs));

    let report = db::reconcile(&records, &store, grace).await?;
    print_json(&report)
}

async fn list(args: ListArgs, config: &AppConfig) -> Result<(), AppError> {
    let records = RecordStore::open(&config.database.path)?;
    if args.public {
        let limit = args.limit;
        let frames = records
            .with_conn(move |conn| db::list_public_frames(conn, limit))
            .await?;
        return print_json(&frames);
    }

    let owner = args
        .owner
        .ok_or_else(|| AppError::InvalidInput("需要 --owner".to_string()))?;
    let (frames, composites) = records
        .with_conn(move |conn| {
            Ok((
                db::list_frames_for_owner(conn, &owner)?,
                db::list_composites_for_owner(conn, &owner)?,
            ))
        })
        .await?;
    print_json(&serde_json::json!({ "frames": frames, "composites": composites }))
}

fn show_config(args: ConfigArgs, config: &AppConfig) -> Result<(), AppError> {
    if let Some(path) = args.write {
        config.save_to_path(&path)?;
        log::info!("💾 配置已写入 {}", path.display());
    }
    print_json(config)
}

fn open_service<P: FrameProvider>(
    config: &AppConfig,
    provider: Arc<P>,
) -> Result<StudioService<FsObjectStore>, AppError> {
    let records = RecordStore::open(&config.database.path)?;
    let store = Arc::new(FsObjectStore::open(&config.storage.root)?);
    Ok(StudioService::start(
        records,
        provider,
        store,
        config.imaging.clone(),
        &config.jobs,
    ))
}

fn resolve_strategy(arg: StrategyArg, config: &AppConfig) -> ApertureStrategy {
    match (arg, config.imaging.aperture_strategy) {
        (StrategyArg::Fixed, ApertureStrategy::Fixed(insets)) => ApertureStrategy::Fixed(insets),
        (StrategyArg::Fixed, ApertureStrategy::MaskDetected) => ApertureStrategy::Fixed(ApertureInsets::default()),
        (StrategyArg::Mask, _) => ApertureStrategy::MaskDetected,
    }
}

async fn wait_for(mut submission: Submission) -> JobOutcome {
    let state = submission.ticket.wait().await;
    JobOutcome {
        id: submission.id,
        storage_key: submission.storage_key,
        state,
    }
}

async fn read_file(path: &Path) -> Result<Bytes, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InvalidInput(format!("读取 {} 失败: {}", path.display(), e)))?;
    Ok(Bytes::from(bytes))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Config(format!("序列化输出失败: {}", e)))?;
    println!("{}", text);
    Ok(())
}
