//! Lamp configuration load against a real broker.
//!
//! Spawns a handful of virtual users that publish random lamp configuration
//! documents to `lamp/set_config` and prints every reported request as a
//! JSON line.
//!
//! Run with: cargo run --example lamp_load -- mqtt://localhost:1883 4 50
//!
//! Arguments: broker URI, number of users, tasks per user.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use std::sync::Arc;
use std::time::Duration;

use mom_loadgen::{
    //
    create_transport,
    ChannelHarness,
    CorrelationEngine,
    LampConfigPayload,
    LoadConfig,
    LoadError,
    LoadUser,
    Result,
    LAMP_TOPIC,
};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let mut args = std::env::args().skip(1);
    let uri = args.next().unwrap_or_else(|| "mqtt://localhost:1883".into());
    let users: usize = parse_arg(args.next(), 4)?;
    let tasks: usize = parse_arg(args.next(), 50)?;

    let config = LoadConfig::from_uri(&uri)?
        .with_sweep_interval(Duration::from_secs(1))
        .with_keep_alive_secs(30);

    let (harness, mut events) = ChannelHarness::new();
    let harness = Arc::new(harness);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => eprintln!("unprintable event: {err}"),
            }
        }
    });

    let mut running = Vec::with_capacity(users);

    for n in 0..users {
        let user_config = config.clone().with_client_id(format!("{}-{n}", config.client_id));
        let engine = CorrelationEngine::new(
            create_transport(&user_config),
            harness.clone(),
            &user_config,
        );
        let user = LoadUser::new(engine, harness.clone(), user_config, LAMP_TOPIC, LampConfigPayload);

        running.push(tokio::spawn(async move {
            user.on_start().await?;
            user.run(tasks).await?;

            // give outstanding acknowledgments a chance before leaving
            tokio::time::sleep(Duration::from_secs(1)).await;
            user.on_stop().await
        }));
    }

    for handle in running {
        if let Err(err) = handle.await.expect("user task panicked") {
            eprintln!("user failed: {err}");
        }
    }

    drop(harness);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}

fn parse_arg(arg: Option<String>, default: usize) -> Result<usize> {
    match arg {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|_| LoadError::InvalidConfig(format!("expected a count, got {s:?}"))),
    }
}
