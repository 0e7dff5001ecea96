use checkers_server::config::{Args, Config};
use checkers_server::logger::Logger;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let logger = Arc::new(Logger::new(args.verbose));

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(reason) => {
            eprintln!("failed to load config: {reason}");
            std::process::exit(1);
        }
    };

    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("failed to install SIGTERM handler: {e}");
            std::process::exit(1);
        }
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = checkers_server::run_server(&args.bind_address, args.port, config, logger, shutdown_rx).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
