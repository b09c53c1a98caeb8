//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod scripts;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use netconn_core::tasks::messages::input::InputMsg;
use netconn_core::{Master, module::ModuleRegistry, settings::Settings};
use netconn_utils::Database;
use netconn_utils::task::Task;
use nix::unistd::Uid;
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use scripts::SystemScriptRunner;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = rolling::never(&config.file.dir, &config.file.name);
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("netconn=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn init_db<P: AsRef<Path>>(
    path: P,
) -> Result<PickleDb, pickledb::error::Error> {
    let dump_policy = PickleDbDumpPolicy::AutoDump;
    let serialization_method = SerializationMethod::Json;
    match path.as_ref().exists() {
        true => PickleDb::load(path, dump_policy, serialization_method),
        false => Ok(PickleDb::new(path, dump_policy, serialization_method)),
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Netconn connection daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("daemon")
                .short("d")
                .long("daemon")
                .help("Fork to the background."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges; connection scripts and network modules
    // need them.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Fork to the background when requested, before any logging sinks
    // are attached.
    if matches.is_present("daemon")
        && let Err(error) = nix::unistd::daemon(false, false)
    {
        eprintln!("failed to daemonize: {error}");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Initialize the settings store.
    let db = init_db(&config.database_path)
        .expect("failed to initialize the settings store");
    let db: Database = Arc::new(Mutex::new(db));

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            let (status_tx, mut status_rx) = mpsc::unbounded_channel();
            let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
            let (tx, rx) = netconn_core::channels(status_tx, ui_tx);

            let settings = Settings::new(db);
            let scripts = Arc::new(SystemScriptRunner::new(
                &config.scripts.dir,
                Duration::from_secs(config.scripts.timeout),
            ));

            // Network modules are provided by plugin crates linked into
            // deployment-specific builds; the stock daemon starts with an
            // empty registry.
            let modules = ModuleRegistry::default();

            let idle_timeouts = config
                .idle_timeout
                .iter()
                .map(|(nt, secs)| (nt.clone(), Duration::from_secs(*secs)))
                .collect();

            let master =
                Master::new(modules, scripts, settings, idle_timeouts, tx.clone());

            // The message transport is an external collaborator; until
            // one is attached, outbound signals go to the log.
            let _status_task = Task::spawn(async move {
                while let Some(signal) = status_rx.recv().await {
                    debug!(?signal, "status signal");
                }
            });
            let _ui_task = Task::spawn(async move {
                while let Some(request) = ui_rx.recv().await {
                    debug!(?request, "UI dialog request");
                }
            });

            // Drain and exit on interrupt.
            let input_tx = tx.input.clone();
            let _signal_task = Task::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    error!("failed to listen for interrupt");
                    return;
                }
                info!("interrupt received, shutting down");
                let _ = input_tx.send(InputMsg::Shutdown);
            });

            master.run(rx).await;
        });

    info!("exiting");
}
