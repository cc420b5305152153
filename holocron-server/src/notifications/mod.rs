//! Delayed outbound notifications.
//!
//! Producers enqueue a payload with a delay that is resolved to an absolute
//! dispatch time immediately, so a restart never re-rolls a random window.
//! The dispatcher drains due entries in (dispatch time, id) order.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{Dispatcher, RetryPolicy};
pub use queue::NotificationQueue;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use holocron_core::UserName;

/// What to deliver and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NotificationPayload {
    ChatMessage {
        channel: String,
        text: String,
        /// Emoji to add once posted. Messages with reactions are never coalesced.
        #[serde(default)]
        reactions: Vec<String>,
    },
    SocialPost {
        text: String,
        link: Option<String>,
    },
    TalkPageMessage {
        user: UserName,
        header: String,
        body: String,
    },
}

impl NotificationPayload {
    pub fn chat(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ChatMessage {
            channel: channel.into(),
            text: text.into(),
            reactions: vec![],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat",
            Self::SocialPost { .. } => "social",
            Self::TalkPageMessage { .. } => "talk",
        }
    }
}

/// How long to hold a notification back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDelay {
    Immediate,
    Fixed(Duration),
    /// Uniformly random between the bounds, inclusive.
    Window { min: Duration, max: Duration },
}

impl DispatchDelay {
    pub fn resolve<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
        match *self {
            DispatchDelay::Immediate => now,
            DispatchDelay::Fixed(delay) => now + delay,
            DispatchDelay::Window { min, max } => {
                let (low, high) = if min <= max { (min, max) } else { (max, min) };
                let secs = rng.gen_range(low.num_seconds()..=high.num_seconds());
                now + Duration::seconds(secs)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An entry about to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub payload: NotificationPayload,
    pub dispatch_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
}

/// A persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedNotification {
    /// Insertion order; breaks ties between equal dispatch times.
    pub id: u64,
    pub payload: NotificationPayload,
    pub dispatch_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
    pub attempts: u32,
    pub status: NotificationStatus,
    /// Overdue past the restart grace: one attempt, no retries.
    pub stale: bool,
    pub last_error: Option<String>,
}
