use chrono::{DateTime, Utc};
use log::{error, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{Collection, DocumentStore};

/// Failure of a write whose caller did not wait for the result.
#[derive(Debug, Clone, Serialize)]
pub struct StoreErrorEvent {
    pub collection: Collection,
    pub id: String,
    pub operation: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub fn report_failure(
    errors: &broadcast::Sender<StoreErrorEvent>,
    collection: Collection,
    id: String,
    operation: &'static str,
    message: String,
) {
    let event = StoreErrorEvent {
        collection,
        id,
        operation,
        message,
        at: Utc::now(),
    };
    if errors.send(event.clone()).is_err() {
        // nobody subscribed; keep the failure visible anyway
        error!(
            "Unobserved {} failure on {}/{}: {}",
            event.operation, event.collection, event.id, event.message
        );
    }
}

pub fn spawn_delete(
    store: Arc<dyn DocumentStore>,
    errors: broadcast::Sender<StoreErrorEvent>,
    collection: Collection,
    id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = store.delete(collection, &id).await {
            report_failure(&errors, collection, id, "delete", e.to_string());
        }
    })
}

pub fn spawn_error_listener(mut rx: broadcast::Receiver<StoreErrorEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => error!(
                    "Background {} failed for {}/{}: {}",
                    event.operation, event.collection, event.id, event.message
                ),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Store error listener lagged, {missed} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
