use common::{Bet, LedgerEvent, Pool, PoolId, PoolStatus};
use tokio::sync::mpsc;
use tracing::warn;

use crate::database_manager::DatabaseRequest;

/// Receives pool/bet notifications for external observers.
///
/// Called while the ledger still holds the lock of the pool being changed, so
/// implementations must not block. Events for one pool arrive in commit order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LedgerEvent);
}

impl EventSink for mpsc::UnboundedSender<LedgerEvent> {
    fn emit(&self, event: LedgerEvent) {
        if self.send(event).is_err() {
            warn!("event receiver dropped, notification discarded");
        }
    }
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: LedgerEvent) {}
}

/// A committed write, in the shape the persistence layer stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    PoolWritten(Pool),
    StatusWritten(PoolId, PoolStatus),
    /// An accepted bet and the pool totals that count it. Stored as one unit.
    BetPlaced { pool: Pool, bet: Bet },
}

/// Persistence seam. Same non-blocking contract as [`EventSink`].
pub trait Journal: Send + Sync {
    fn record(&self, mutation: Mutation);
}

impl Journal for mpsc::UnboundedSender<DatabaseRequest> {
    fn record(&self, mutation: Mutation) {
        if self.send(DatabaseRequest::Apply { mutation }).is_err() {
            warn!("database manager gone, mutation not persisted");
        }
    }
}

pub struct NoopJournal;

impl Journal for NoopJournal {
    fn record(&self, _mutation: Mutation) {}
}
