use clap::{Arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("streamhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Topic fan-out hub with a streaming HTTP binding and remote-node proxy")
        .arg(
            Arg::new("bind")
                .help("Address to bind the HTTP server to")
                .short('b')
                .long("bind")
                .value_name("addr"),
        )
        .arg(
            Arg::new("config")
                .help("Path to the remote-node/token TOML config file")
                .short('c')
                .long("config")
                .value_name("path"),
        )
        .get_matches();

    let bind_flag = matches.get_one::<String>("bind").cloned();
    let config_path_flag = matches.get_one::<String>("config").cloned();

    let config = streamhub::config::resolve_config(bind_flag, config_path_flag).unwrap_or_else(|err| {
        eprintln!("FATAL: failed to load config: {err}");
        std::process::exit(1);
    });

    let state = streamhub::build_app_state(&config).unwrap_or_else(|err| {
        eprintln!("FATAL: failed to build application state: {err}");
        std::process::exit(1);
    });

    let router = streamhub::http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {}: {err}", config.bind));

    info!(addr = %config.bind, "streamhub listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    state.hub.shutdown().await;
    info!("streamhub shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
