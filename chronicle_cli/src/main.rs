use chrono::{Duration as ChronoDuration, Utc};
use chronicle_cli::cli::{Cli, Commands};
use chronicle_cli::dev_backends::build_dev_backends;
use chronicle_core::o11y::{init_tracing, LogFormat};
use chronicle_core::{
    Connection, ConnectionId, ListQuery, SyncOptions, SyncStore, TaskKind, UserId,
};
use clap::Parser;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = LogFormat::parse(&cli.log_format)
        .ok_or_else(|| anyhow::anyhow!("unknown log format: {}", cli.log_format))?;
    init_tracing(format)?;

    let backends = build_dev_backends(&cli.data_dir, &cli.providers).await?;
    let orchestrator = &backends.orchestrator;

    match cli.command {
        Commands::AddConnection {
            user_id,
            provider,
            access_token,
            refresh_token,
            expires_in_secs,
            scopes,
        } => {
            // Fail early instead of on the first sync.
            orchestrator.registry().get(&provider)?;
            let now = Utc::now();
            let connection = Connection::new(
                UserId(user_id.unwrap_or_else(Uuid::new_v4)),
                provider,
                backends.tokens.seal(&access_token)?,
                refresh_token
                    .as_deref()
                    .map(|t| backends.tokens.seal(t))
                    .transpose()?,
                expires_in_secs.map(|s| now + ChronoDuration::seconds(s as i64)),
                scopes.into_iter().collect::<BTreeSet<_>>(),
                Some(now),
            )?;
            backends.store.upsert_connection(&connection).await?;
            println!("connection_id: {}", connection.id);
            println!("user_id: {}", connection.user_id);
        }
        Commands::Sync {
            connection_id,
            first_sync,
            lookback_days,
            max_items,
            page_size,
        } => {
            let lookback_window = lookback_days
                .map(|d| {
                    d.checked_mul(86_400)
                        .map(Duration::from_secs)
                        .ok_or_else(|| anyhow::anyhow!("--lookback-days {d} is out of range"))
                })
                .transpose()?;
            let options = SyncOptions {
                is_first_sync: first_sync,
                lookback_window,
                max_items,
                page_size,
            };
            let summary = orchestrator
                .trigger_sync(ConnectionId(connection_id), options)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::SyncUser { user_id, provider } => {
            let summaries = orchestrator
                .trigger_bulk_sync(UserId(user_id), provider.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            let failed = summaries.iter().filter(|s| !s.is_success()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} syncs failed", summaries.len());
            }
        }
        Commands::EnqueueSync { connection_id } => {
            let task_id = orchestrator
                .enqueue_sync(ConnectionId(connection_id), SyncOptions::default())
                .await?;
            println!("task_id: {task_id}");
        }
        Commands::Work { limit } => {
            let due = backends.store.due_tasks(Utc::now(), limit).await?;
            let mut ran = 0usize;
            for task in due {
                // Follow-up tasks belong to the enrichment workers; leave them queued.
                if task.kind != TaskKind::Sync {
                    tracing::debug!(task_id = %task.id, kind = task.kind.as_str(), "skipping non-sync task");
                    continue;
                }
                match orchestrator.handle_sync_task(&task.payload).await {
                    Ok(summary) => println!("{}", serde_json::to_string(&summary)?),
                    Err(e) => tracing::warn!(task_id = %task.id, error = %e, "queued sync failed"),
                }
                // Failed runs are recorded in their run log; the task is not retried.
                backends.store.complete_task(&task.id).await?;
                ran += 1;
            }
            tracing::info!(ran, "work pass finished");
        }
        Commands::Runs {
            connection_id,
            limit,
        } => {
            let runs = orchestrator
                .list_runs(ConnectionId(connection_id), ListQuery { limit, offset: 0 })
                .await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        Commands::Providers => {
            for provider in orchestrator.registry().providers() {
                println!("{provider}");
            }
        }
    }

    Ok(())
}
