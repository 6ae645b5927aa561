use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use typetele::config::loader::{config_exists, default_config_path};
use typetele::config::{AppConfig, ConfigLoader};
use typetele::console::spawn_stdin_console;
use typetele::models::OperatorCommand;
use typetele::observability::init_tracing;
use typetele::services::interpolation::FingerJointMap;
use typetele::services::{ControlLoop, TrackingFusion, create_retrieval_adapter, serve_tracking};
use typetele::storage::{FileTypeLibrary, TypeRepository};
use typetele::transport::create_transport;

/// 基于操作类型的灵巧手遥操作
#[derive(Debug, Parser)]
#[command(name = "typetele", version, about)]
struct Args {
    /// 配置文件路径（默认 ./typetele.toml）
    #[arg(short, long, env = "TYPETELE_CONFIG")]
    config: Option<PathBuf>,

    /// 启动时激活的类型
    #[arg(short = 't', long = "type")]
    initial_type: Option<String>,

    /// 传输类型：bridge 或 sim
    #[arg(long)]
    transport: Option<String>,

    /// 类型库根目录
    #[arg(long)]
    library: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("typetele: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let _log_guard = match init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("typetele: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            if !config_exists() {
                eprintln!(
                    "typetele: {} not found, using defaults",
                    default_config_path().display()
                );
            }
            ConfigLoader::load().context("failed to load configuration")?
        }
    };

    if let Some(kind) = &args.transport {
        config.transport.kind = kind.clone();
    }
    if let Some(root) = &args.library {
        config.library.root = root.clone();
    }
    if args.initial_type.is_some() {
        config.control.initial_type = args.initial_type.clone();
    }

    ConfigLoader::validate(&config).context("invalid configuration")?;
    Ok(config)
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting TypeTele for hand model '{}'", config.hand.model_id);

    let library = FileTypeLibrary::open(
        &config.library.root,
        &config.hand.model_id,
        config.hand.joint_count,
    )
    .await
    .context("failed to load type library")?;
    let names = library.list_names().await?;
    info!("Known types: {}", names.join(", "));
    let library: Arc<dyn TypeRepository> = Arc::new(library);

    let transport = create_transport(&config.transport, config.hand.joint_count)
        .await
        .context("failed to connect hand transport")?;
    info!("Hand transport ready ({})", config.transport.kind);

    let retrieval = create_retrieval_adapter(&config.retrieval)?;
    if config.retrieval.api_key.is_empty() {
        warn!("No interpreter API key configured, free-text retrieval may fail");
    }

    let (control, channels) = ControlLoop::new(&config, library, transport, retrieval);
    let metrics = control.metrics();

    if let Some(name) = &config.control.initial_type {
        channels
            .commands
            .send(OperatorCommand::Select(name.clone()))
            .await
            .ok();
    }

    let tracking = match &config.fusion.listen_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to listen for tracking on {}", addr))?;
            let map = FingerJointMap::from_config(&config.hand.finger_map, config.hand.joint_count);
            let fusion = TrackingFusion::new(&config.fusion, map);
            Some(tokio::spawn(serve_tracking(listener, fusion, channels.tracking)))
        }
        None => {
            info!("No tracking listener configured, jog control only");
            None
        }
    };

    let console = spawn_stdin_console(channels.commands);
    println!("TypeTele ready. Type 'help' for commands.");

    let state = control.run().await;
    info!(
        "Stopped with active type {:?}\n{}",
        state.active_type,
        metrics.gather()
    );

    console.abort();
    if let Some(tracking) = tracking {
        tracking.abort();
    }
    Ok(())
}
