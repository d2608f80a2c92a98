use crate::models::ConnectionId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process advisory lock: at most one in-flight run per connection.
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<DashMap<ConnectionId, DateTime<Utc>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `connection_id`, or `SyncInProgress` if a run already holds it.
    pub fn try_acquire(&self, connection_id: ConnectionId) -> Result<RunGuard> {
        match self.held.entry(connection_id) {
            Entry::Occupied(held) => Err(Error::SyncInProgress(format!(
                "a sync for connection {connection_id} has been running since {}",
                held.get().to_rfc3339()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(RunGuard {
                    held: self.held.clone(),
                    connection_id,
                })
            }
        }
    }
}

/// Releases the connection's lock on drop.
pub struct RunGuard {
    held: Arc<DashMap<ConnectionId, DateTime<Utc>>>,
    connection_id: ConnectionId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held.remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_conflicts_until_guard_drops() {
        let locks = RunLocks::new();
        let id = ConnectionId::new();
        let guard = locks.try_acquire(id).unwrap();
        assert!(matches!(locks.try_acquire(id), Err(Error::SyncInProgress(_))));
        // Other connections are unaffected.
        let _other = locks.try_acquire(ConnectionId::new()).unwrap();
        drop(guard);
        assert!(locks.try_acquire(id).is_ok());
    }
}
