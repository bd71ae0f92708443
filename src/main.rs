use log::{error, info, warn};
use redcap::configuration::config::Config;
use redcap::controller::controller_handler::Controller;
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    info!("redcap v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().unwrap_or_else(|e| {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    let controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to start the capture: {}, exiting...", e);
        std::process::exit(1);
    });

    if let Err(e) = controller.run(shutdown_signal()).await {
        error!("Capture stopped with an error: {}, exiting...", e);
        std::process::exit(1);
    }
}

/// Resolves on the first SIGHUP, SIGINT or SIGTERM.
async fn shutdown_signal() {
    let (mut hup, mut int, mut term) = match (
        signal(SignalKind::hangup()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(hup), Ok(int), Ok(term)) => (hup, int, term),
        _ => {
            warn!("Unable to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    let name = tokio::select! {
        _ = hup.recv() => "SIGHUP",
        _ = int.recv() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    };
    info!("Received {}", name);
}
