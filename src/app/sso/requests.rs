//! Registry of in-flight SSO requests.
//!
//! A request id is live from [`PendingRequests::register`] until its
//! [`RequestGuard`] is dropped or [`PendingRequests::cancel`] is called.
//! Cancelled ids stay in a cooldown set for ten minutes so that a loop which
//! has not yet noticed the cancellation, or a flow that starts late with the
//! same id, stops instead of running.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::sync::Cache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::error::{ConsoleError, Result};

/// How long a cancelled request id is remembered.
pub const CANCEL_COOLDOWN: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct PendingRequests {
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    cancelled: Cache<String, ()>,
    generation: Arc<AtomicU64>,
}

struct PendingEntry {
    generation: u64,
    token: CancellationToken,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequests")
            .field("pending", &self.pending_count())
            .field("cancelled", &self.cancelled.entry_count())
            .finish()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::with_cooldown(CANCEL_COOLDOWN)
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancelled: Cache::builder().time_to_live(cooldown).build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Mark `request_id` as pending.
    ///
    /// Fails with `DeviceAuthorizationCancelled` when the id was cancelled
    /// within the cooldown.
    pub fn register(&self, request_id: &str) -> Result<RequestGuard> {
        if self.is_recently_cancelled(request_id) {
            debug!("Request {} was cancelled before it started", request_id);
            return Err(ConsoleError::DeviceAuthorizationCancelled);
        }

        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ConsoleError::Settings(format!("request registry poisoned: {}", e)))?;
        let entry = PendingEntry {
            generation,
            token: token.clone(),
        };
        if pending.insert(request_id.to_string(), entry).is_some() {
            warn!("Request id {} was already pending, replacing it", request_id);
        }
        debug!("Registered SSO request {}", request_id);

        Ok(RequestGuard {
            requests: self.clone(),
            request_id: request_id.to_string(),
            generation,
            token,
        })
    }

    /// Pending and not cancelled.
    pub fn is_live(&self, request_id: &str) -> bool {
        if self.is_recently_cancelled(request_id) {
            return false;
        }
        self.pending
            .lock()
            .map(|pending| pending.contains_key(request_id))
            .unwrap_or(false)
    }

    pub fn is_recently_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.contains_key(request_id)
    }

    /// Cancel `request_id`. Returns whether it was pending.
    ///
    /// Unknown ids are still remembered so a flow started afterwards with the
    /// same id aborts immediately.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.cancelled.insert(request_id.to_string(), ());

        let entry = match self.pending.lock() {
            Ok(mut pending) => pending.remove(request_id),
            Err(e) => {
                warn!("Failed to cancel request {}: {}", request_id, e);
                None
            }
        };

        match entry {
            Some(entry) => {
                info!("Cancelling SSO request {}", request_id);
                entry.token.cancel();
                true
            }
            None => {
                debug!("No pending SSO request {}", request_id);
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    fn complete(&self, request_id: &str, generation: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            // A later registration with the same id owns the slot now.
            if pending
                .get(request_id)
                .is_some_and(|current| current.generation == generation)
            {
                pending.remove(request_id);
                debug!("SSO request {} completed", request_id);
            }
        }
    }
}

/// Keeps a request registered until dropped.
pub struct RequestGuard {
    requests: PendingRequests,
    request_id: String,
    generation: u64,
    token: CancellationToken,
}

impl RequestGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.requests.is_live(&self.request_id)
    }

    /// Fail with `DeviceAuthorizationCancelled` unless the request is still live.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(ConsoleError::DeviceAuthorizationCancelled)
        }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.requests.complete(&self.request_id, self.generation);
    }
}
