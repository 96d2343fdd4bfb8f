// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use traitd::actions::RoutingHandler;
use traitd::config::Args;
use traitd::daemon::{Daemon, DaemonExit};
use traitd::remote::DryRunServer;
use traitd::shutdown::{spawn_signal_listener, ShutdownToken};
use traitd::transport::mqtt::{MqttPublisher, MqttSubscriber};
use traitd::worker_pool::MessageHandler;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    // Before any other thread exists, so all of them inherit the signal mask.
    let shutdown = ShutdownToken::new();
    spawn_signal_listener(shutdown.clone())?;

    info!(
        "Starting traitd, broker {}:{}, topics {:?}",
        config.broker.host, config.broker.port, config.broker.topics
    );

    let enqueue_timeout = config.pool.submit_timeout;
    let daemon = Daemon::start(
        &config,
        MqttSubscriber::new(config.broker.clone()),
        MqttPublisher::new(config.broker.clone()),
        DryRunServer::new(),
        |queues| -> Arc<dyn MessageHandler> {
            Arc::new(RoutingHandler::new(queues.clone(), enqueue_timeout))
        },
        shutdown,
    )?;

    let exit = daemon.run();
    if let DaemonExit::Fatal(failure) = &exit {
        error!("traitd stops because {failure}");
        std::process::exit(exit.exit_code());
    }
    info!("Stopping traitd");
    Ok(())
}
