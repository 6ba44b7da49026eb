use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Enumerated notification category. Producers pick one; recipients can
/// disable individual kinds through their preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Message,
    Mention,
    Follow,
    Payment,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::Message => "message",
            NotificationKind::Mention => "mention",
            NotificationKind::Follow => "follow",
            NotificationKind::Payment => "payment",
            NotificationKind::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub metadata: Option<serde_json::Value>,
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Producer-facing payload for the accept call. The pipeline assigns the id
/// and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub action_url: Option<String>,
}

impl NewNotification {
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            priority: self.priority,
            metadata: self.metadata,
            action_url: self.action_url,
            created_at: now,
            delivered_at: None,
            read_at: None,
        }
    }
}

/// Daily suppression window in the recipient's local time. `start > end`
/// spans midnight; `start == end` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Inclusive of `start`, exclusive of `end`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start == self.end {
            false
        } else if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub recipient_id: String,
    /// Per-kind enable flags; a kind absent from the map is enabled.
    pub kinds: HashMap<NotificationKind, bool>,
    pub do_not_disturb: bool,
    pub quiet_hours: Option<QuietHours>,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserPreferences {
    /// Everything-enabled preferences, created lazily on first lookup.
    pub fn defaults_for(recipient_id: &str) -> Self {
        UserPreferences {
            recipient_id: recipient_id.to_string(),
            kinds: HashMap::new(),
            do_not_disturb: false,
            quiet_hours: None,
            in_app_enabled: true,
            email_enabled: true,
            push_enabled: true,
            updated_at: Utc::now(),
        }
    }

    pub fn kind_enabled(&self, kind: NotificationKind) -> bool {
        self.kinds.get(&kind).copied().unwrap_or(true)
    }
}

/// A live (recipient, device) → server-instance mapping. At most one
/// non-expired entry exists per device; liveness is heartbeat-driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub recipient_id: String,
    pub device_id: String,
    pub server_instance_id: String,
    pub last_heartbeat: DateTime<Utc>,
}

/// Scheduling state of a queued delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting to be dequeued once `visible_at` passes.
    Ready { visible_at: DateTime<Utc> },
    /// Handed to a worker; reclaimed if the deadline passes without an outcome.
    InFlight { deadline: DateTime<Utc> },
    /// Pushed to a live session; reclaimed if no client ack arrives in time.
    PendingAck { deadline: DateTime<Utc> },
}

/// Record that exists from accept until the client acks (or the record is
/// dead-lettered). This is what makes delivery at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedDelivery {
    pub notification_id: Uuid,
    pub recipient_id: String,
    /// Channels selected by the preference filter at accept time.
    pub channels: Vec<Channel>,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub state: DeliveryState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let qh = QuietHours {
            start: t(9, 0),
            end: t(17, 0),
        };
        assert!(qh.contains(t(9, 0)));
        assert!(qh.contains(t(12, 0)));
        assert!(!qh.contains(t(17, 0)));
        assert!(!qh.contains(t(8, 59)));
    }

    #[test]
    fn quiet_hours_wrap_midnight() {
        let qh = QuietHours {
            start: t(22, 0),
            end: t(7, 0),
        };
        assert!(qh.contains(t(22, 0)));
        assert!(qh.contains(t(23, 30)));
        assert!(qh.contains(t(3, 0)));
        assert!(!qh.contains(t(7, 0)));
        assert!(!qh.contains(t(12, 0)));
    }

    #[test]
    fn quiet_hours_empty_window() {
        let qh = QuietHours {
            start: t(8, 0),
            end: t(8, 0),
        };
        assert!(!qh.contains(t(8, 0)));
        assert!(!qh.contains(t(20, 0)));
    }

    #[test]
    fn kind_absent_from_map_is_enabled() {
        let mut prefs = UserPreferences::defaults_for("u1");
        assert!(prefs.kind_enabled(NotificationKind::Alert));
        prefs.kinds.insert(NotificationKind::Follow, false);
        assert!(!prefs.kind_enabled(NotificationKind::Follow));
        assert!(prefs.kind_enabled(NotificationKind::Alert));
    }
}
