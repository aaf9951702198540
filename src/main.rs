use std::ffi::OsStr;
use std::path::Path;

use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use ethersrv::config::{Cli, ServerConfig};
use ethersrv::dispatch::Dispatcher;
use ethersrv::lifecycle::{daemonize, LockFile, ShutdownSignal};
use ethersrv::link::RawLink;
use ethersrv::proto::format_mac;
use ethersrv::server::Server;

/// Stderr logging plus, optionally, a plain-text log file. The returned guard
/// must live as long as logging is needed.
fn init_logging(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let log_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let log_name = path.file_name().unwrap_or_else(|| OsStr::new("ethersrv.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("ethersrv: failed to set up logging: {}", e);
    }
    guard
}

fn main() {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(cli).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    for (letter, drive) in config.drives.iter() {
        if !drive.dos_attrs {
            eprintln!(
                "Warning: {}: ({}) is not on a FAT filesystem, DOS attributes will not be stored",
                letter,
                drive.root.display()
            );
        }
    }

    let lock = LockFile::acquire(&config.lock_file).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let link = RawLink::open(&config.interface).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    if !config.foreground {
        if let Err(e) = daemonize() {
            eprintln!("Error: failed to daemonize: {}", e);
            std::process::exit(1);
        }
    }

    // After the fork, so the appender thread belongs to the surviving process.
    let _guard = init_logging(config.log_file());

    info!(
        "ethersrv starting: interface={}, mac={}, pid={}",
        link.interface(),
        format_mac(&link.mac()),
        std::process::id()
    );
    for (letter, drive) in config.drives.iter() {
        info!(
            "Drive {}: mapped to {} (DOS attributes: {})",
            letter,
            drive.root.display(),
            drive.dos_attrs
        );
    }

    let shutdown = ShutdownSignal::install().unwrap_or_else(|e| {
        error!("Failed to install signal handlers: {}", e);
        std::process::exit(1);
    });

    let dispatcher = Dispatcher::new(link.mac(), config.drives.clone());
    let mut server = Server::new(link, dispatcher, shutdown, config.heartbeat);
    let result = server.run();
    drop(server);
    drop(lock);

    match result {
        Ok(()) => info!("ethersrv stopped"),
        Err(e) => {
            error!("ethersrv failed: {}", e);
            std::process::exit(1);
        }
    }
}
