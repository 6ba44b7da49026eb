use chrono::{DateTime, Utc};

use crate::types::{Channel, Notification, Priority, UserPreferences};

/// Outcome of running a notification through a recipient's preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub deliver: bool,
    pub channels: Vec<Channel>,
}

impl FilterDecision {
    fn dropped() -> Self {
        FilterDecision {
            deliver: false,
            channels: Vec::new(),
        }
    }
}

/// Pure preference filter. Safe to call concurrently and repeatedly; the
/// same inputs always produce the same decision.
///
/// High priority bypasses do-not-disturb, quiet hours and per-kind mutes
/// entirely. For everything else the checks run in that order, and a drop is
/// terminal: the notification is never queued.
///
/// Quiet hours are interpreted against the wall-clock time of `now`; the
/// caller is expected to pass a timestamp in the recipient's local frame.
pub fn evaluate(
    notification: &Notification,
    prefs: &UserPreferences,
    now: DateTime<Utc>,
) -> FilterDecision {
    let high = notification.priority == Priority::High;

    if !high {
        if prefs.do_not_disturb {
            return FilterDecision::dropped();
        }
        if let Some(quiet) = &prefs.quiet_hours {
            if quiet.contains(now.time()) {
                return FilterDecision::dropped();
            }
        }
        if !prefs.kind_enabled(notification.kind) {
            return FilterDecision::dropped();
        }
    }

    let mut channels = Vec::new();
    // High priority is always pushed in-app, even if the toggle is off.
    if high || prefs.in_app_enabled {
        channels.push(Channel::InApp);
    }
    if prefs.email_enabled && high {
        channels.push(Channel::Email);
    }
    if prefs.push_enabled {
        channels.push(Channel::Push);
    }

    FilterDecision {
        deliver: true,
        channels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewNotification, NotificationKind, QuietHours};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn notification(priority: Priority) -> Notification {
        NewNotification {
            recipient_id: "u1".to_string(),
            kind: NotificationKind::Alert,
            title: "t".to_string(),
            body: "b".to_string(),
            priority,
            metadata: None,
            action_url: None,
        }
        .into_notification(Utc::now())
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        Utc.from_utc_datetime(&date.and_hms_opt(h, m, s).unwrap())
    }

    fn quiet(start: (u32, u32), end: (u32, u32)) -> QuietHours {
        QuietHours {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    #[test]
    fn default_preferences_deliver_everywhere_but_email() {
        let prefs = UserPreferences::defaults_for("u1");
        let decision = evaluate(&notification(Priority::Medium), &prefs, at(12, 0, 0));
        assert!(decision.deliver);
        assert_eq!(decision.channels, vec![Channel::InApp, Channel::Push]);
    }

    #[test]
    fn do_not_disturb_drops_non_high() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.do_not_disturb = true;
        assert!(!evaluate(&notification(Priority::Medium), &prefs, at(12, 0, 0)).deliver);
        assert!(!evaluate(&notification(Priority::Low), &prefs, at(12, 0, 0)).deliver);
    }

    #[test]
    fn high_priority_bypasses_do_not_disturb() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.do_not_disturb = true;
        let decision = evaluate(&notification(Priority::High), &prefs, at(12, 0, 0));
        assert!(decision.deliver);
        assert!(decision.channels.contains(&Channel::InApp));
    }

    #[test]
    fn quiet_hours_boundary_is_inclusive_at_start() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.quiet_hours = Some(quiet((22, 0), (7, 0)));

        // Exactly at the start of the window: dropped.
        assert!(!evaluate(&notification(Priority::Medium), &prefs, at(22, 0, 0)).deliver);
        // One second before: delivered.
        assert!(evaluate(&notification(Priority::Medium), &prefs, at(21, 59, 59)).deliver);
        // High priority inside the window: delivered.
        assert!(evaluate(&notification(Priority::High), &prefs, at(23, 30, 0)).deliver);
    }

    #[test]
    fn quiet_hours_wrap_across_midnight() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.quiet_hours = Some(quiet((22, 0), (7, 0)));

        assert!(!evaluate(&notification(Priority::Medium), &prefs, at(2, 0, 0)).deliver);
        assert!(evaluate(&notification(Priority::Medium), &prefs, at(7, 0, 0)).deliver);
    }

    #[test]
    fn disabled_kind_drops_non_high_only() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.kinds.insert(NotificationKind::Alert, false);

        assert!(!evaluate(&notification(Priority::Medium), &prefs, at(12, 0, 0)).deliver);
        assert!(evaluate(&notification(Priority::High), &prefs, at(12, 0, 0)).deliver);
    }

    #[test]
    fn email_only_for_high_priority() {
        let prefs = UserPreferences::defaults_for("u1");

        let medium = evaluate(&notification(Priority::Medium), &prefs, at(12, 0, 0));
        assert!(!medium.channels.contains(&Channel::Email));

        let high = evaluate(&notification(Priority::High), &prefs, at(12, 0, 0));
        assert!(high.channels.contains(&Channel::Email));
    }

    #[test]
    fn disabled_channels_are_excluded() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.push_enabled = false;
        prefs.email_enabled = false;

        let decision = evaluate(&notification(Priority::High), &prefs, at(12, 0, 0));
        assert_eq!(decision.channels, vec![Channel::InApp]);
    }

    #[test]
    fn identical_inputs_identical_decision() {
        let mut prefs = UserPreferences::defaults_for("u1");
        prefs.quiet_hours = Some(quiet((1, 0), (5, 0)));
        let n = notification(Priority::Medium);
        let now = at(12, 0, 0);

        let first = evaluate(&n, &prefs, now);
        let second = evaluate(&n, &prefs, now);
        assert_eq!(first, second);
    }
}
