//! Confirmation broker — human-in-the-loop gating for sensitive tools.
//!
//! A registration hands back an opaque id and a single-slot channel. The
//! transport layer surfaces the id to the user; their decision comes back
//! through `resolve`. Exactly one of three things terminates a request:
//! a caller decision, the 5-minute expiry, or the parent request being
//! cancelled — and the id is removed from the broker in all three cases.
//!
//! A closed channel means "no decision received" and readers must treat it
//! as denial, distinct from an explicit `false`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

const DEFAULT_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Process-wide registry of pending approval requests.
pub struct ConfirmationBroker {
    requests: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    expiry: Duration,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }

    /// Override the auto-expiry window (tests use short windows).
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    /// Register a pending request. Returns the single-use confirmation id
    /// and the channel the decision will arrive on. The entry auto-expires
    /// after the configured window, closing the channel without a value.
    pub async fn register(self: &Arc<Self>) -> (String, oneshot::Receiver<bool>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.requests.lock().await.insert(id.clone(), tx);

        let broker = Arc::clone(self);
        let expiry_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(broker.expiry).await;
            if broker.requests.lock().await.remove(&expiry_id).is_some() {
                warn!(confirmation_id = %expiry_id, "Confirmation request timed out and was cleaned up");
            }
        });

        (id, rx)
    }

    /// Deliver the user's decision. Unknown or already-resolved ids are a
    /// logged no-op; the first resolution wins.
    pub async fn resolve(&self, id: &str, allowed: bool) {
        match self.requests.lock().await.remove(id) {
            Some(tx) => {
                let _ = tx.send(allowed);
                info!(confirmation_id = %id, allowed, "Confirmation request resolved");
            }
            None => {
                warn!(confirmation_id = %id, "Attempted to resolve a non-existent or already resolved confirmation request");
            }
        }
    }

    /// Number of requests currently pending.
    pub async fn pending(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for ConfirmationBroker {
    fn default() -> Self {
        Self::new()
    }
}
