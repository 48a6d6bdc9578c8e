//! Notification dispatcher seam.
//!
//! Notifications are best-effort: they are sent after the state transition
//! has committed and their failure never rolls it back.

use crate::claims::UserProfile;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which message to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A spot was granted and must be confirmed.
    SpotAvailable,
    /// The user was placed on the waitlist.
    JoinedWaitlist,
    /// Attendance is confirmed.
    RsvpConfirmed,
}

impl NotificationKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SpotAvailable => "spot_available",
            Self::JoinedWaitlist => "joined_waitlist",
            Self::RsvpConfirmed => "rsvp_confirmed",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message ready for delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Message type
    pub kind: NotificationKind,
    /// Display name of the recipient
    pub recipient_name: String,
    /// Delivery address of the recipient
    pub recipient_address: String,
}

impl Notification {
    /// Address `kind` to `profile`.
    #[must_use]
    pub fn to_profile(kind: NotificationKind, profile: &UserProfile) -> Self {
        Self {
            kind,
            recipient_name: profile.name.clone(),
            recipient_address: profile.email.clone(),
        }
    }
}

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The transport rejected or failed to deliver the message.
    #[error("Failed to deliver {kind} notification: {reason}")]
    Delivery {
        /// Message type
        kind: NotificationKind,
        /// Transport detail
        reason: String,
    },
}

/// Sends admission notifications (email, push, ...).
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// [`NotificationError::Delivery`] if the transport fails. Callers log it.
    fn send(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotificationError>>;
}
