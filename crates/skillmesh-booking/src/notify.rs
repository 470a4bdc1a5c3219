//! Notification outbox
//!
//! The core emits notification records and moves on; delivery is someone
//! else's problem. The trait is infallible by design so a broken channel
//! can never fail a settlement transition.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use skillmesh_types::{Notification, UserId};

/// Fire-and-forget notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Record a notification for later delivery
    async fn notify(&self, notification: Notification);
}

/// In-memory outbox, also used to observe emissions in tests
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    outbox: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications emitted so far, oldest first
    pub async fn all(&self) -> Vec<Notification> {
        self.outbox.read().await.clone()
    }

    /// Notifications for one recipient, oldest first
    pub async fn for_user(&self, user_id: &UserId) -> Vec<Notification> {
        self.outbox
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == *user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) {
        debug!(user = %notification.user_id, booking = %notification.booking_id, "notification emitted");
        self.outbox.write().await.push(notification);
    }
}
