use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::time::Duration;

/// Common error type for `chronicle_core`.
///
/// Store and codec implementations should preserve the underlying error chain
/// where possible via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Another run already holds the connection's lock.
    #[error("sync in progress: {0}")]
    SyncInProgress(String),

    /// Credential missing, unrefreshable, rejected twice, or connection inactive.
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// Non-401 HTTP or transport failure from a provider call.
    #[error("provider fetch failed ({}) for {url}: {body}", status_label(.status))]
    ProviderFetch {
        status: Option<u16>,
        url: String,
        body: String,
    },

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("run timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

/// Machine-readable classification of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    SyncInProgress,
    TokenInvalid,
    ProviderFetch,
    UnsupportedProvider,
    Transform,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::SyncInProgress => "sync_in_progress",
            ErrorKind::TokenInvalid => "token_invalid",
            ErrorKind::ProviderFetch => "provider_fetch",
            ErrorKind::UnsupportedProvider => "unsupported_provider",
            ErrorKind::Transform => "transform",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    #[tracing::instrument(level = "debug", name = "chronicle.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a transport-level reqwest failure (no HTTP status) for `url`.
    pub fn provider_transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let status = source.status().map(|s| s.as_u16());
        Self::ProviderFetch {
            status,
            url: url.into(),
            body: source.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::SyncInProgress(_) => ErrorKind::SyncInProgress,
            Error::TokenInvalid(_) => ErrorKind::TokenInvalid,
            Error::ProviderFetch { .. } => ErrorKind::ProviderFetch,
            Error::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            Error::Transform(_) => ErrorKind::Transform,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Backend { .. } | Error::BackendMessage(_) => ErrorKind::Internal,
        }
    }

    /// Display strings of this error and every `source()` below it, outermost first.
    pub fn cause_chain(&self) -> Vec<String> {
        let mut out = vec![self.to_string()];
        let mut cur = StdError::source(self);
        while let Some(e) = cur {
            out.push(e.to_string());
            cur = e.source();
        }
        out
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "transport".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_keep_their_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::backend("sqlite_store", io);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            err.cause_chain(),
            vec!["backend error: sqlite_store".to_string(), "disk full".to_string()]
        );
    }

    #[test]
    fn only_the_run_lock_reports_sync_in_progress() {
        let busy = Error::SyncInProgress("connection held".into());
        assert_eq!(busy.kind().as_str(), "sync_in_progress");
        let race = Error::Conflict("run changed status concurrently".into());
        assert_eq!(race.kind(), ErrorKind::Conflict);
        assert_eq!(race.kind().as_str(), "conflict");
    }

    #[test]
    fn provider_fetch_message_names_status_or_transport() {
        let err = Error::ProviderFetch {
            status: Some(503),
            url: "https://api.example.com/v1/items".into(),
            body: "unavailable".into(),
        };
        assert!(err.to_string().contains("(503)"));
        assert_eq!(err.kind().as_str(), "provider_fetch");

        let err = Error::ProviderFetch {
            status: None,
            url: "https://api.example.com".into(),
            body: "connection reset".into(),
        };
        assert!(err.to_string().contains("(transport)"));
    }
}
