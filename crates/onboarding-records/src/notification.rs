//! Best-effort user notifications.

use crate::{Notification, RecordsResult};
use supabase_gateway::{RecordStore, SharedBackend};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const NOTIFICATIONS_TABLE: &str = "notifications";

#[derive(Clone)]
pub struct Notifier {
    backend: SharedBackend,
}

impl Notifier {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    pub async fn send(&self, notification: &Notification) -> RecordsResult<()> {
        let row = serde_json::to_value(notification)?;
        self.backend.insert(NOTIFICATIONS_TABLE, row).await?;
        Ok(())
    }

    /// Send the welcome message on a detached task.
    ///
    /// Failures are logged and dropped; the caller never sees them.
    pub fn spawn_welcome(&self, user_id: &str, name: Option<&str>) -> JoinHandle<()> {
        let greeting = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => format!("Welcome aboard, {name}! Let's finish setting up your account."),
            None => "Welcome aboard! Let's finish setting up your account.".to_string(),
        };
        let notification = Notification {
            id: None,
            user_id: user_id.to_string(),
            title: "Welcome".to_string(),
            message: greeting,
            kind: "welcome".to_string(),
            is_read: false,
        };
        let notifier = self.clone();

        tokio::spawn(async move {
            match notifier.send(&notification).await {
                Ok(()) => debug!(user_id = %notification.user_id, "welcome notification sent"),
                Err(e) => warn!(
                    user_id = %notification.user_id,
                    error = %e,
                    "welcome notification failed"
                ),
            }
        })
    }
}
