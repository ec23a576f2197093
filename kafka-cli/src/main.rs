mod admin;
mod args;
mod consume;
mod produce;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use kafka_cli_common::logging::init_logging;
use kafka_cli_common::{ClientFactory, Config, ConsumerMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::args::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kafka-cli: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("kafka-cli: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Config) -> Result<()> {
    let security = &config.kafka.security;
    debug!(
        servers = %config.kafka.bootstrap_list(),
        security = %security.protocol,
        sasl = %security.sasl_mechanism,
        username = %security.username,
        "Loaded configuration"
    );

    let factory = ClientFactory::new(config.kafka);

    match args.command {
        Command::Admin(command) => admin::run(&factory, command).await,
        Command::Produce {
            topic,
            payload,
            iterations,
        } => produce::run(&factory, &topic, payload, iterations).await,
        Command::Consume {
            topic,
            groupid,
            format,
        } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Interrupted, stopping consumer");
                        on_signal.cancel();
                    }
                    Err(e) => error!(error = %e, "Unable to listen for CTRL+C"),
                }
            });

            consume::run(
                &factory,
                &topic,
                ConsumerMode::from_group_id(groupid),
                format,
                cancel,
            )
            .await
            .context("consumer stopped with an error")
        }
    }
}
