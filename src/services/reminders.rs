use crate::db;
use crate::domain::calendar::CalendarEvent;
use crate::domain::recurrence::occurrences;
use crate::state::SharedState;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A reminder whose firing time has passed and that has not been sent.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DueReminder {
    pub reminder_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub remind_at: DateTime<Utc>,
}

/// Delivery seam for calendar reminders. Implementations decide the
/// channel; the dispatcher only marks reminders sent after `notify` succeeds.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn notify(&self, reminder: &DueReminder) -> Result<()>;
}

/// Writes reminders to the log. Used until a delivery channel is wired in.
pub struct LogNotifier;

#[async_trait]
impl ReminderNotifier for LogNotifier {
    async fn notify(&self, reminder: &DueReminder) -> Result<()> {
        tracing::info!(
            "Reminder for user {}: '{}' starts at {}",
            reminder.user_id,
            reminder.title,
            reminder.start_at
        );
        Ok(())
    }
}

/// When a reminder fires for an event starting at `start` with a lead time
/// of `minutes_before`.
pub fn remind_at(start: DateTime<Utc>, minutes_before: i32) -> DateTime<Utc> {
    start - Duration::minutes(minutes_before.max(0) as i64)
}

/// Longest gap between two occurrences (yearly, across a leap day).
const NEXT_OCCURRENCE_HORIZON_DAYS: i64 = 367;

/// Start of the next occurrence at or after `now`, or the stored start when
/// the series has already ended.
pub fn next_start(event: &CalendarEvent, now: DateTime<Utc>) -> DateTime<Utc> {
    if now <= event.start_at || !event.recurrence.repeats() {
        return event.start_at;
    }
    occurrences(
        event.start_at,
        event.end_at,
        event.recurrence,
        event.recurrence_end,
        now,
        now + Duration::days(NEXT_OCCURRENCE_HORIZON_DAYS),
    )
    .find(|o| o.start >= now)
    .map(|o| o.start)
    .unwrap_or(event.start_at)
}

/// Firing time of a reminder with a lead of `minutes_before`, relative to the
/// next occurrence of `event`.
pub fn fire_time(event: &CalendarEvent, minutes_before: i32, now: DateTime<Utc>) -> DateTime<Utc> {
    remind_at(next_start(event, now), minutes_before)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

pub async fn deliver(notifier: &dyn ReminderNotifier, due: &[DueReminder]) -> (Vec<Uuid>, DispatchReport) {
    let mut delivered = Vec::with_capacity(due.len());
    let mut report = DispatchReport::default();
    for reminder in due {
        match notifier.notify(reminder).await {
            Ok(()) => {
                report.sent += 1;
                delivered.push(reminder.reminder_id);
                tracing::debug!("Delivered reminder {} to user {}", reminder.reminder_id, reminder.user_id);
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    "Failed to deliver reminder {} to user {}: {}",
                    reminder.reminder_id,
                    reminder.user_id,
                    e
                );
            }
        }
    }
    (delivered, report)
}

/// Sends every due reminder and marks the delivered ones. Failed ones stay
/// pending and are retried on the next run.
pub async fn dispatch_due_reminders(state: &SharedState) -> Result<DispatchReport> {
    let due = db::calendar::get_due_reminders(&state.pool, Utc::now(), 200).await?;
    if due.is_empty() {
        return Ok(DispatchReport::default());
    }

    let (delivered, report) = deliver(state.notifier.as_ref(), &due).await;
    db::calendar::mark_reminders_sent(&state.pool, &delivered).await?;

    tracing::info!(
        "Reminder dispatch finished: {} sent, {} failed",
        report.sent,
        report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<Uuid>>,
        fail_for: Option<Uuid>,
    }

    #[async_trait]
    impl ReminderNotifier for Recording {
        async fn notify(&self, reminder: &DueReminder) -> Result<()> {
            if self.fail_for == Some(reminder.reminder_id) {
                anyhow::bail!("channel down");
            }
            self.seen.lock().unwrap().push(reminder.reminder_id);
            Ok(())
        }
    }

    fn due() -> DueReminder {
        let start = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
        DueReminder {
            reminder_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Science fair".into(),
            start_at: start,
            remind_at: remind_at(start, 30),
        }
    }

    #[test]
    fn remind_at_subtracts_lead_time() {
        let start = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
        assert_eq!(remind_at(start, 30), Utc.with_ymd_and_hms(2024, 10, 1, 8, 30, 0).unwrap());
        assert_eq!(remind_at(start, -5), start);
    }

    fn weekly_event(start: DateTime<Utc>) -> CalendarEvent {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "title": "Choir",
            "description": null,
            "location": null,
            "start_at": start,
            "end_at": start + Duration::hours(1),
            "all_day": false,
            "event_type": "activity",
            "visibility": "public",
            "recurrence": "weekly",
            "recurrence_end": null,
            "priority": 3,
            "notification_minutes": 0,
            "tags": [],
            "task_id": null,
            "evaluation_id": null,
            "created_by": Uuid::new_v4(),
            "updated_by": null,
            "is_active": true,
            "created_at": start,
            "updated_at": start
        }))
        .unwrap()
    }

    #[test]
    fn next_start_skips_past_occurrences() {
        let mut event = weekly_event(Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap());
        event.recurrence = crate::domain::calendar::Recurrence::Daily;
        assert_eq!(next_start(&event, Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()), event.start_at);
        assert_eq!(
            next_start(&event, Utc.with_ymd_and_hms(2024, 9, 4, 9, 0, 0).unwrap()),
            Utc.with_ymd_and_hms(2024, 9, 5, 8, 0, 0).unwrap()
        );

        event.recurrence_end = Some(Utc.with_ymd_and_hms(2024, 9, 3, 8, 0, 0).unwrap());
        assert_eq!(next_start(&event, Utc.with_ymd_and_hms(2024, 9, 10, 0, 0, 0).unwrap()), event.start_at);
    }

    #[test]
    fn recomputed_reminder_keeps_its_lead_and_targets_the_next_occurrence() {
        let now = Utc.with_ymd_and_hms(2024, 10, 20, 12, 0, 0).unwrap();
        let mut event = weekly_event(Utc.with_ymd_and_hms(2024, 9, 2, 15, 0, 0).unwrap());
        assert_eq!(fire_time(&event, 30, now), Utc.with_ymd_and_hms(2024, 10, 21, 14, 30, 0).unwrap());

        // Moving the series by an hour moves the reminder with it, still in the future.
        event.start_at = Utc.with_ymd_and_hms(2024, 9, 2, 16, 0, 0).unwrap();
        event.end_at = event.start_at + Duration::hours(1);
        let fire_at = fire_time(&event, 30, now);
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2024, 10, 21, 15, 30, 0).unwrap());
        assert!(fire_at > now);
    }

    #[tokio::test]
    async fn deliver_keeps_failed_reminders_pending() {
        let (ok, broken) = (due(), due());
        let notifier = Recording {
            seen: Mutex::new(Vec::new()),
            fail_for: Some(broken.reminder_id),
        };
        let (delivered, report) = deliver(&notifier, &[ok.clone(), broken]).await;
        assert_eq!(delivered, vec![ok.reminder_id]);
        assert_eq!(report, DispatchReport { sent: 1, failed: 1 });
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.notify(&due()).await.is_ok());
    }
}
