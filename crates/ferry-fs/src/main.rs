use clap::Parser;
use ferry_fs::ServerConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "ferry-fs", about = "Serve a directory tree to ferry clients")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "FERRY_BIND", default_value = "0.0.0.0:8888")]
    bind: String,

    /// Directory exposed to clients, created if missing
    #[arg(long, env = "FERRY_ROOT", default_value = "./files")]
    root: PathBuf,

    /// Sessions served concurrently
    #[arg(long, env = "FERRY_WORKERS", default_value_t = ferry_fs::config::DEFAULT_WORKERS)]
    workers: usize,

    /// Seconds a session may stay silent before it is dropped (0 = never)
    #[arg(long, env = "FERRY_IDLE_TIMEOUT", default_value_t = 300)]
    idle_timeout: u64,

    /// Directory for ferry-fs.log
    #[arg(long, env = "FERRY_LOG_DIR", default_value = "/tmp")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let file_appender = rolling::never(&args.log_dir, "ferry-fs.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("ferry-fs starting");

    let config = ServerConfig {
        bind: args.bind,
        root: args.root,
        workers: args.workers,
        idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(e) = ferry_fs::run(config, shutdown).await {
        error!(error = ?e, "Fatal error");
        std::process::exit(1);
    }
}
