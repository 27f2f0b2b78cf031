use std::path::Path;
use std::process::ExitCode;

use log::{error, info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use kodi_bucket::app_state::AppState;
use kodi_bucket::config::AppConfig;
use kodi_bucket::tls::listener::ActixListener;
use kodi_bucket::tls::supervisor::RotationSupervisor;
use kodi_bucket::tls::CredentialSource;

fn init_logging(config: &AppConfig) {
    let log_config = &config.logging.config_file;
    if Path::new(log_config).exists() {
        if let Err(e) = log4rs::init_file(log_config, Default::default()) {
            eprintln!("Failed to load {}: {}", log_config, e);
            env_logger::init();
        }
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
    token.cancel();
}

#[actix_web::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let state = match AppState::from_config(config.clone(), shutdown.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let address = config.server.bind_address();
    let listener = match ActixListener::bind(&address, state) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", address, e);
            return ExitCode::FAILURE;
        }
    };

    match CredentialSource::from_config(&config.tls) {
        Some(source) => {
            info!("Starting HTTPS with {:?} certificates on {}", config.tls.mode, address);
            let supervisor = RotationSupervisor::new(listener);
            if let Err(e) = supervisor.run(shutdown, source).await {
                error!("Server stopped: {}", e);
                return ExitCode::FAILURE;
            }
        }
        None => {
            warn!("TLS is not configured, serving plain HTTP on {}", address);
            if let Err(e) = listener.serve_plain(shutdown).await {
                error!("Server stopped: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    info!("Server shut down cleanly");
    ExitCode::SUCCESS
}
