use surrealdb::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::database::DatabaseConnection;
use crate::notify::Mutation;

pub type Responder<T> = oneshot::Sender<anyhow::Result<T>>;

#[derive(Debug)]
pub enum DatabaseRequest {
    Apply {
        mutation: Mutation,
    },
    /// Answered once every request queued before it has been written.
    Flush {
        responder: Responder<()>,
    },
}

pub struct DatabaseManager<Conn: Connection> {
    db_connection: DatabaseConnection<Conn>,
    work_queue: mpsc::UnboundedReceiver<DatabaseRequest>,
    failed_writes: usize,
}

//NOTE: No functions in this impl may crash
impl<Conn: Connection> DatabaseManager<Conn> {
    pub fn new(
        db_connection: DatabaseConnection<Conn>,
        work_queue: mpsc::UnboundedReceiver<DatabaseRequest>,
    ) -> Self {
        Self {
            db_connection,
            work_queue,
            failed_writes: 0,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            match request {
                DatabaseRequest::Apply { mutation } => {
                    if let Err(e) = self.db_connection.apply(&mutation).await {
                        self.failed_writes += 1;
                        error!(?mutation, "failed to persist mutation: {:#}", e);
                    }
                }
                DatabaseRequest::Flush { responder } => {
                    let resp = if self.failed_writes == 0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("{} writes failed", self.failed_writes))
                    };
                    // we do not care if the receiver has already disappeared
                    responder.send(resp).ok();
                }
            }
        }
        info!("database manager stopped: all ledger handles dropped");
    }

    pub fn into_connection(self) -> DatabaseConnection<Conn> {
        self.db_connection
    }
}

/// Waits until everything queued so far has reached the database.
pub async fn flush(requester: &mpsc::UnboundedSender<DatabaseRequest>) -> anyhow::Result<()> {
    let (resp_tx, resp_rx) = oneshot::channel();
    requester.send(DatabaseRequest::Flush { responder: resp_tx })?;
    resp_rx.await?
}
