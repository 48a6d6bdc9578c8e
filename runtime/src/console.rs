//! Console notification dispatcher for development.

use admission_core::notification::{Notification, NotificationDispatcher, NotificationError};
use futures::future::BoxFuture;
use tracing::info;

/// Logs notifications instead of sending them.
///
/// Useful for development and demos where no mail transport is configured.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotificationDispatcher;

impl ConsoleNotificationDispatcher {
    /// Create a new console dispatcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NotificationDispatcher for ConsoleNotificationDispatcher {
    fn send(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotificationError>> {
        Box::pin(async move {
            let subject = match notification.kind {
                admission_core::NotificationKind::SpotAvailable => {
                    "A spot opened up for you. Confirm your RSVP before it expires."
                },
                admission_core::NotificationKind::JoinedWaitlist => {
                    "You are on the waitlist. We will email you when a spot opens."
                },
                admission_core::NotificationKind::RsvpConfirmed => "Your RSVP is confirmed.",
            };
            info!(
                kind = %notification.kind,
                to = %notification.recipient_address,
                name = %notification.recipient_name,
                subject,
                "Notification (development mode)"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use admission_core::NotificationKind;

    #[tokio::test]
    async fn test_console_dispatch_always_succeeds() {
        let dispatcher = ConsoleNotificationDispatcher::new();
        dispatcher
            .send(Notification {
                kind: NotificationKind::RsvpConfirmed,
                recipient_name: "Ada".to_string(),
                recipient_address: "ada@example.com".to_string(),
            })
            .await
            .unwrap();
    }
}
