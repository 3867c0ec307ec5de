#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! BlogStandard Webhook Worker
//!
//! One-shot operator tool for Stripe webhook events:
//! - List events whose processing failed
//! - Replay a single event from Stripe's copy
//! - Replay every failed event

mod command;

use anyhow::Context;
use blogstandard_billing::{WebhookEventRecord, WebhookHandler, WebhookReplayResult};
use blogstandard_shared::create_pool;
use tracing::{error, info};

use crate::command::{Command, USAGE};

/// Log results of a replay batch
fn log_replay_results(results: &[WebhookReplayResult]) {
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - succeeded;

    info!(
        replayed = results.len(),
        succeeded = succeeded,
        failed = failed,
        "Webhook replay cycle complete"
    );

    for result in results.iter().filter(|r| !r.success) {
        error!(
            stripe_event_id = %result.stripe_event_id,
            event_type = %result.event_type,
            error = ?result.new_error,
            "Failed to replay webhook"
        );
    }
}

fn print_records(records: &[WebhookEventRecord]) -> anyhow::Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    info!(command = ?command, "Starting BlogStandard worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url).await?;
    let webhooks = WebhookHandler::from_env(pool.clone())?;

    let result = run(&webhooks, command).await;
    pool.close().await;
    result
}

async fn run(webhooks: &WebhookHandler, command: Command) -> anyhow::Result<()> {
    match command {
        Command::ListFailed { limit } => {
            let records = webhooks.list_failed_webhooks(limit, 0).await?;
            info!(count = records.len(), "Failed webhook events");
            print_records(&records)?;
        }
        Command::Replay { event_id } => {
            let result = webhooks.replay_webhook(&event_id).await?;
            println!("{}", serde_json::to_string(&result)?);
            log_replay_results(std::slice::from_ref(&result));
            if !result.success {
                anyhow::bail!("replay of {} failed", event_id);
            }
        }
        Command::ReplayFailed { max } => {
            let results = webhooks.replay_all_failed(max).await?;
            for result in &results {
                println!("{}", serde_json::to_string(result)?);
            }
            log_replay_results(&results);
            if results.iter().any(|r| !r.success) {
                anyhow::bail!("some webhook replays failed");
            }
        }
    }

    Ok(())
}
