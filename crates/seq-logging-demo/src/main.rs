// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;

use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use seq_logging::{Level, Logger, LoggerError, LoggerOptions, RawEvent, RemoteConfig};

const DEFAULT_DEMO_EVENTS: u64 = 100;
const EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SEQ_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let events = env::var("SEQ_DEMO_EVENTS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(DEFAULT_DEMO_EVENTS);
    let user = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let options = match LoggerOptions::from_env() {
        Ok(options) => options
            .with_on_error(|e: &LoggerError| error!("Seq shipping error: {e}"))
            .with_on_remote_config_change(|config: &RemoteConfig| {
                info!("Seq minimum level is now {:?}", config.minimum_level_accepted);
            }),
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };
    let logger = match Logger::new(options) {
        Ok(logger) => logger,
        Err(e) => {
            error!("Unable to start Seq logger: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing");
            signal_token.cancel();
        }
    });

    emit_events(&logger, &user, events, &cancel_token).await;

    match logger.close().await {
        Ok(()) => info!("Logger closed"),
        Err(e) => error!("Failed to close logger: {e}"),
    }
}

async fn emit_events(logger: &Logger, user: &str, events: u64, cancel_token: &CancellationToken) {
    let mut ticker = interval(EMIT_INTERVAL);
    for n in 1..=events {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel_token.cancelled() => return,
        }
        debug!("Round {n}");
        let event = RawEvent::new()
            .level(Level::Information)
            .message_template("Hello for the {n}th time, {user}!")
            .property("user", user)
            .property("n", n);
        if let Err(e) = logger.emit(event) {
            error!("Failed to emit event: {e}");
            return;
        }
    }
}
