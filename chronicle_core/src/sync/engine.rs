use super::cascade::{self, CascadeOutcome, CascadePayload};
use super::lock::RunLocks;
use super::models::{RunSummary, SyncTaskPayload};
use crate::config::{SyncConfig, SyncOptions};
use crate::connections::Connection;
use crate::connectors::{ConnectorRegistry, FetchContext};
use crate::fetch::{PaginatedFetcher, ProviderClient};
use crate::memories::MemoryUpsertEngine;
use crate::models::{ConnectionId, ListQuery, RunId, UserId};
use crate::runs::{RunCounts, RunFailure, RunKind, RunLog, RunLogQuery, RunStage};
use crate::store::SyncStore;
use crate::tasks::{TaskKind, TaskQueue, TaskSubmission};
use crate::token::TokenLifecycleManager;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;

const BULK_CONNECTION_LIMIT: usize = 1_000;

/// A run that did not complete, with its summary if a run log was written.
struct RunFailed {
    error: Error,
    summary: Option<RunSummary>,
}

impl RunFailed {
    fn before_start(error: Error) -> Self {
        Self {
            error,
            summary: None,
        }
    }
}

/// Runs the pipeline for one connection:
/// token check, fetch, transform, reconcile, run log, follow-ups.
pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    registry: Arc<ConnectorRegistry>,
    tokens: TokenLifecycleManager,
    upsert: MemoryUpsertEngine,
    queue: Arc<dyn TaskQueue>,
    http: reqwest::Client,
    config: SyncConfig,
    locks: RunLocks,
}

impl SyncOrchestrator {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        store: Arc<dyn SyncStore>,
        registry: ConnectorRegistry,
        tokens: TokenLifecycleManager,
        queue: Arc<dyn TaskQueue>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let http = ProviderClient::build_http(config.http_timeout)?;
        Ok(Self {
            upsert: MemoryUpsertEngine::new(store.clone()),
            store,
            registry: Arc::new(registry),
            tokens,
            queue,
            http,
            config,
            locks: RunLocks::new(),
        })
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Run one sync for `connection_id` and wait for it.
    ///
    /// Failures after the run log was written are recorded there before being returned.
    #[tracing::instrument(level = "info", skip(self, options), fields(connection_id = %connection_id))]
    pub async fn trigger_sync(
        &self,
        connection_id: ConnectionId,
        options: SyncOptions,
    ) -> Result<RunSummary> {
        self.run(connection_id, options).await.map_err(|f| f.error)
    }

    /// Sync every active connection of `user_id` (optionally one provider) concurrently.
    ///
    /// Individual failures come back as summaries with status `failed`.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn trigger_bulk_sync(
        &self,
        user_id: UserId,
        provider_filter: Option<&str>,
    ) -> Result<Vec<RunSummary>> {
        let connections = self
            .store
            .list_connections(
                user_id,
                ListQuery {
                    limit: BULK_CONNECTION_LIMIT,
                    offset: 0,
                },
            )
            .await?;
        let targets: Vec<ConnectionId> = connections
            .into_iter()
            .filter(|c| c.active)
            .filter(|c| provider_filter.map_or(true, |p| c.provider == p))
            .map(|c| c.id)
            .collect();

        let summaries = join_all(targets.into_iter().map(|id| async move {
            match self.run(id, SyncOptions::default()).await {
                Ok(summary) => summary,
                Err(failed) => failed
                    .summary
                    .unwrap_or_else(|| RunSummary::rejected(id, &failed.error)),
            }
        }))
        .await;

        let failed = summaries.iter().filter(|s| !s.is_success()).count();
        tracing::info!(
            user_id = %user_id,
            runs = summaries.len(),
            failed,
            "bulk sync finished"
        );
        Ok(summaries)
    }

    /// Queue a sync for the host job system; returns the task id.
    #[tracing::instrument(level = "info", skip(self, options))]
    pub async fn enqueue_sync(
        &self,
        connection_id: ConnectionId,
        options: SyncOptions,
    ) -> Result<String> {
        self.load_connection(connection_id).await?;
        let payload = serde_json::to_value(SyncTaskPayload {
            connection_id,
            options,
        })
        .map_err(|e| Error::backend("encode sync task", e))?;
        self.queue
            .submit(TaskSubmission {
                kind: TaskKind::Sync,
                payload,
                delay: None,
            })
            .await
    }

    /// Execute a queued `sync` task.
    #[tracing::instrument(level = "info", skip(self, payload))]
    pub async fn handle_sync_task(&self, payload: &serde_json::Value) -> Result<RunSummary> {
        let task: SyncTaskPayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidInput(format!("invalid sync task payload: {e}")))?;
        self.trigger_sync(task.connection_id, task.options).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_runs(&self, connection_id: ConnectionId, query: ListQuery) -> Result<Vec<RunLog>> {
        self.store
            .list_run_logs(RunLogQuery {
                connection_id: Some(connection_id),
                limit: query.limit,
                offset: query.offset,
                ..Default::default()
            })
            .await
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<RunLog> {
        self.store
            .get_run_log(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id} not found")))
    }

    async fn load_connection(&self, connection_id: ConnectionId) -> Result<Connection> {
        self.store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {connection_id} not found")))
    }

    async fn run(
        &self,
        connection_id: ConnectionId,
        options: SyncOptions,
    ) -> std::result::Result<RunSummary, RunFailed> {
        let connection = self
            .load_connection(connection_id)
            .await
            .map_err(RunFailed::before_start)?;
        let _guard = self
            .locks
            .try_acquire(connection_id)
            .map_err(RunFailed::before_start)?;

        let started_at = Utc::now();
        let kind = if options
            .is_first_sync
            .unwrap_or(connection.last_synced_at.is_none())
        {
            RunKind::FirstSync
        } else {
            RunKind::IncrementalSync
        };
        let input = serde_json::to_value(&options)
            .map_err(|e| RunFailed::before_start(Error::backend("encode sync options", e)))?;

        let pending = RunLog::new_pending(
            connection.user_id,
            connection.id,
            connection.provider.clone(),
            kind,
            input,
            started_at,
        );
        self.store
            .insert_run_log(&pending)
            .await
            .map_err(RunFailed::before_start)?;
        let mut run = pending.clone();
        run.mark_running().map_err(RunFailed::before_start)?;
        if let Err(e) = self.store.update_run_log(&run).await {
            // Close the pending row so it does not read as queued forever.
            return Err(self.fail(pending, RunStage::Start, e).await);
        }
        tracing::info!(
            run_id = %run.id,
            provider = %run.provider,
            kind = kind.as_str(),
            "sync started"
        );

        let mut stage = RunStage::Token;
        let result = match tokio::time::timeout(
            self.config.run_timeout,
            self.execute(connection, &options, started_at, &mut stage),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.run_timeout)),
        };

        let result = match result {
            Ok(counts) => {
                stage = RunStage::Finalize;
                self.tokens
                    .record_successful_sync(connection_id, Utc::now())
                    .await
                    .map(|_| counts)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(counts) => self.complete(run, counts).await,
            Err(e) => Err(self.fail(run, stage, e).await),
        }
    }

    async fn execute(
        &self,
        connection: Connection,
        options: &SyncOptions,
        started_at: DateTime<Utc>,
        stage: &mut RunStage,
    ) -> Result<RunCounts> {
        *stage = RunStage::Token;
        let (connection, credential) = self.tokens.ensure_usable(&connection).await?;

        *stage = RunStage::Connector;
        let connector = self.registry.get(&connection.provider)?;
        let resolved = options.resolve(connector.config(), connection.last_synced_at, started_at)?;
        tracing::info!(
            since = %resolved.since,
            max_items = resolved.max_items,
            page_size = resolved.page_size,
            first_sync = resolved.is_first_sync,
            refreshed = credential.refreshed,
            "resolved fetch window"
        );

        let session = Arc::new(self.tokens.session(connection.clone(), credential));
        let client = Arc::new(ProviderClient::new(
            self.http.clone(),
            session,
            connector.config().min_request_interval,
        ));
        let fetcher = PaginatedFetcher::new(client);

        *stage = RunStage::Fetch;
        let ctx = FetchContext {
            connection_id: connection.id,
            user_id: connection.user_id,
            fetcher: &fetcher,
            now: started_at,
        };
        let bundle = connector.fetch_data(&ctx, &resolved).await?;

        *stage = RunStage::Transform;
        let transformed = connector.transform_to_memories(&bundle);
        let transform_failures = transformed.failures.len() as u64;

        *stage = RunStage::Reconcile;
        let reconciled = self
            .upsert
            .reconcile(
                connection.id,
                connection.user_id,
                &connection.provider,
                transformed.records,
            )
            .await?;

        Ok(RunCounts {
            records_fetched: bundle.item_count() as u64,
            created: reconciled.created,
            updated: reconciled.updated,
            skipped: reconciled.skipped,
            transform_failures,
        })
    }

    async fn complete(
        &self,
        mut run: RunLog,
        counts: RunCounts,
    ) -> std::result::Result<RunSummary, RunFailed> {
        run.complete(counts, Utc::now())
            .map_err(RunFailed::before_start)?;
        if let Err(e) = self.store.update_run_log(&run).await {
            tracing::error!(run_id = %run.id, error = %e, "could not record completed run");
            return Err(RunFailed {
                error: e,
                summary: Some(RunSummary::from_run(&run, CascadeOutcome::default())),
            });
        }

        let payload = CascadePayload {
            user_id: run.user_id,
            connection_id: run.connection_id,
            provider: run.provider.clone(),
            run_id: run.id,
            changed: counts.changed(),
        };
        let cascade = cascade::schedule(self.queue.as_ref(), &self.config.cascade, &payload).await;

        tracing::info!(
            run_id = %run.id,
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            transform_failures = counts.transform_failures,
            elapsed_ms = run.duration_ms.unwrap_or(0),
            "sync completed"
        );
        Ok(RunSummary::from_run(&run, cascade))
    }

    async fn fail(&self, mut run: RunLog, stage: RunStage, error: Error) -> RunFailed {
        let failure = RunFailure::from_error(stage, &error);
        tracing::warn!(
            run_id = %run.id,
            stage = ?stage,
            kind = failure.kind.as_str(),
            error = %error,
            "sync failed"
        );
        match run.fail(failure, Utc::now()) {
            Ok(()) => {
                if let Err(e) = self.store.update_run_log(&run).await {
                    tracing::error!(run_id = %run.id, error = %e, "could not record failed run");
                }
            }
            Err(e) => tracing::error!(run_id = %run.id, error = %e, "run log rejected failure"),
        }
        RunFailed {
            error,
            summary: Some(RunSummary::from_run(&run, CascadeOutcome::default())),
        }
    }
}
