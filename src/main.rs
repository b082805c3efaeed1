use std::{net::SocketAddr, sync::Arc, time::Duration};

use camino::Utf8PathBuf;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vision_localize_server::{
    engine::external_command::ExternalCommandEngine, localize_errors::LocalizeError,
    localizer::Localizer, params::ServerParams, registry::Registry, server,
};

/// HTTP front-end for a visual localization engine.
#[derive(Debug, Parser)]
#[command(author, version, about = "Vision localize server")]
struct Args {
    /// Listening port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Listening address.
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,

    /// Base directory holding config/map.json and config/user.json. When omitted the
    /// working directory is searched, then $VISION_LOCALIZE_SERVER_PATH.
    #[arg(long)]
    config_dir: Option<Utf8PathBuf>,

    /// Localization engine executable.
    #[arg(long, env = "VISION_LOCALIZE_ENGINE")]
    engine_command: Utf8PathBuf,

    /// Extra argument passed to the engine before the per-request arguments (repeatable).
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Scratch directory for the engine working folders.
    #[arg(long)]
    engine_work_dir: Option<Utf8PathBuf>,

    /// Entries kept per user history.
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Image download timeout, in seconds.
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    /// Engine call timeout, in seconds.
    #[arg(long)]
    engine_timeout_secs: Option<u64>,

    /// Maximum image size in bytes, 0 for unbounded.
    #[arg(long)]
    max_image_bytes: Option<usize>,

    /// Maximum number of concurrent engine calls.
    #[arg(long)]
    workers: Option<usize>,

    /// Directory receiving uploaded images.
    #[arg(long)]
    upload_dir: Option<Utf8PathBuf>,
}

impl Args {
    fn server_params(&self) -> Result<ServerParams, LocalizeError> {
        let mut builder = ServerParams::builder();
        if let Some(capacity) = self.history_capacity {
            builder = builder.history_capacity(capacity);
        }
        if let Some(secs) = self.fetch_timeout_secs {
            builder = builder.fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.engine_timeout_secs {
            builder = builder.engine_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_image_bytes {
            builder = builder.max_image_bytes((max > 0).then_some(max));
        }
        if let Some(workers) = self.workers {
            builder = builder.max_concurrent_localizations(workers);
        }
        if let Some(dir) = &self.upload_dir {
            builder = builder.upload_dir(dir.clone());
        }
        builder.build()
    }

    fn engine(&self, timeout: Duration) -> ExternalCommandEngine {
        let engine =
            ExternalCommandEngine::new(self.engine_command.clone(), self.engine_args.clone())
                .with_timeout(timeout);
        match &self.engine_work_dir {
            Some(dir) => engine.with_work_root(dir.clone()),
            None => engine,
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for shutdown signal : {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn try_main(args: Args) -> Result<(), LocalizeError> {
    let registry = match &args.config_dir {
        Some(dir) => Registry::load(dir)?,
        None => Registry::discover()?,
    };
    let params = args.server_params()?;
    info!("server parameters : {params}");

    let engine = args.engine(params.engine_timeout);
    let localizer = Localizer::new(registry, Arc::new(engine), params)?;
    let listener = TcpListener::bind(SocketAddr::new(args.host, args.port)).await?;
    server::serve(listener, localizer, shutdown_signal()).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = try_main(args).await {
        error!("{err}");
        std::process::exit(1);
    }
}
