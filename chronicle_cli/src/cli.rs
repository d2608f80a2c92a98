use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "chronicle", version, about = "Chronicle external data sync")]
pub struct Cli {
    /// `json` (default) or `pretty`.
    #[arg(long, global = true, env = "CHRONICLE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Local data directory (SQLite db + master key).
    #[arg(long, global = true, env = "CHRONICLE_DATA_DIR", default_value = ".chronicle")]
    pub data_dir: PathBuf,

    /// Comma-delimited providers to enable; all compiled-in providers when empty.
    #[arg(long, global = true, env = "CHRONICLE_PROVIDERS", value_delimiter = ',')]
    pub providers: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store an OAuth connection whose tokens were obtained elsewhere.
    AddConnection {
        /// Owner; a new user id is generated when omitted.
        #[arg(long)]
        user_id: Option<Uuid>,

        #[arg(long)]
        provider: String,

        #[arg(long, env = "CHRONICLE_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "CHRONICLE_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires, if the provider reported it.
        #[arg(long)]
        expires_in_secs: Option<u64>,

        /// Comma-delimited granted scopes.
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Run one sync for a connection and print its summary.
    Sync {
        connection_id: Uuid,

        /// Force first-sync (`true`) or incremental (`false`) windows.
        #[arg(long)]
        first_sync: Option<bool>,

        #[arg(long)]
        lookback_days: Option<u64>,

        #[arg(long)]
        max_items: Option<usize>,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Sync every active connection of a user concurrently.
    SyncUser {
        user_id: Uuid,

        /// Only connections of this provider.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Queue a sync task instead of running it.
    EnqueueSync { connection_id: Uuid },

    /// Execute due `sync` tasks from the local queue.
    Work {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// List recent runs of a connection, newest first.
    Runs {
        connection_id: Uuid,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List compiled-in providers.
    Providers,
}
