use clap::Parser;
use staysearch::app::App;
use staysearch::loader;
use staysearch::settings::Settings;
use staysearch_api::{AppState, RestApi};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting staysearch v{}", env!("CARGO_PKG_VERSION"));
    info!("Vector store: {}", if settings.use_qdrant { "qdrant" } else { "memory" });
    info!("Natural-language queries: {}", settings.translation_enabled());

    let app = App::build(&settings).await?;

    if let Some(path) = &settings.data_path {
        let report = loader::load_file(app.index(), path).await?;
        info!(
            "Loaded {} listings from {:?} ({} skipped)",
            report.indexed,
            path,
            report.skipped.len()
        );
    } else {
        warn!("No DATA_PATH given, serving existing content only");
    }

    let state = AppState::new(app.executor.clone());
    let host = settings.host.clone();
    let port = settings.port;
    let http_handle = std::thread::spawn(move || {
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(state, host, port).await {
                error!("HTTP server error: {}", e);
            }
        })
    });

    info!("REST API: http://{}:{}/", settings.host, settings.port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    info!("Shutting down...");
    app.save_snapshot()?;
    Ok(())
}
