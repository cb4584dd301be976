use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use video_concat::{
    config::{ConfigLoader, PartialConfig, ServiceConfig},
    handler::{self, AppState},
    ConcatRequest, ConcatResponse, FfmpegProbe, JobOrchestrator,
};

/// 剪映拼接服务 - 把本地视频按顺序拼接成剪映草稿并驱动剪映导出
#[derive(Parser, Debug)]
#[command(name = "video-concat")]
#[command(about = "剪映拼接服务：校验素材、生成单轨草稿、驱动剪映导出", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Web 服务模式：接收浏览器插件的拼接请求
    Serve {
        /// 监听地址（默认 127.0.0.1:8787，也可通过环境变量 VIDEO_CONCAT_BIND 设置）
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// CLI 模式：执行一个 JSON 文件描述的拼接任务
    Concat {
        /// 请求 JSON 文件，格式与 POST /concat 相同
        #[arg(short, long)]
        request: PathBuf,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件输出路径
        #[arg(default_value = "video-concat.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        ConfigLoader::create_default_config(path)
            .with_context(|| format!("生成配置文件失败: {}", path.display()))?;
        println!("已生成配置文件: {}", path.display());
        return Ok(());
    }

    let cli = match &args.command {
        Commands::Serve { bind } => PartialConfig {
            bind: bind.clone(),
            ..Default::default()
        },
        _ => PartialConfig::default(),
    };
    let config = ConfigLoader::load_config(args.config.as_deref(), cli).context("加载配置失败")?;

    init_logging(&config.log_level);

    let orchestrator = Arc::new(build_orchestrator(&config)?);

    match args.command {
        Commands::Serve { .. } => start_web_server(&config.bind, orchestrator).await?,
        Commands::Concat { request } => run_once(&request, orchestrator).await?,
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// 初始化日志，RUST_LOG 优先于配置的日志级别
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_orchestrator(config: &ServiceConfig) -> Result<JobOrchestrator> {
    let probe = FfmpegProbe::new()?;

    match &config.controller_command {
        Some(program) => tracing::info!("剪映自动化助手: {}", program.display()),
        None => tracing::warn!("未配置 controller_command，导出阶段将失败"),
    }

    Ok(JobOrchestrator::new(
        Arc::new(probe),
        config.controller(),
        config.export_settings(),
    ))
}

async fn run_once(request_path: &Path, orchestrator: Arc<JobOrchestrator>) -> Result<()> {
    let raw = std::fs::read_to_string(request_path)
        .with_context(|| format!("读取请求文件失败: {}", request_path.display()))?;
    let request: ConcatRequest = serde_json::from_str(&raw)
        .with_context(|| format!("解析请求文件失败: {}", request_path.display()))?;

    let response = tokio::task::spawn_blocking(move || match orchestrator.run(&request) {
        Ok(outcome) => ConcatResponse::success(outcome),
        Err(failure) => ConcatResponse::failure(failure.to_string()),
    })
    .await
    .context("拼接任务异常退出")?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_ok() {
        anyhow::bail!("拼接任务失败");
    }
    Ok(())
}

async fn start_web_server(bind: &str, orchestrator: Arc<JobOrchestrator>) -> Result<()> {
    let app = handler::router(AppState { orchestrator });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 拼接导出: POST http://{}/concat", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
