use crate::domain::calendar::{
    CalendarEvent, CalendarEventReminder, EventAudience, EventInput, EventType, StudentAssociation, Visibility,
};
use crate::services::reminders::{self, DueReminder};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

const EVENT_COLUMNS: &str = r#"
    id, title, description, location, start_at, end_at, all_day, event_type,
    visibility, recurrence, recurrence_end, priority, notification_minutes,
    tags, task_id, evaluation_id, created_by, updated_by, is_active,
    created_at, updated_at
"#;

const REMINDER_COLUMNS: &str = "id, event_id, user_id, minutes_before, remind_at, is_sent, sent_at, created_at";

/// Storage-side filters. Visibility is resolved afterwards, per viewer.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub event_type: Option<EventType>,
    pub visibility: Option<Visibility>,
    pub class_group_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub search: Option<String>,
    pub tags: Option<Vec<String>>,
    pub active_only: bool,
    pub limit: i64,
}

/// `%term%` for ILIKE with the wildcard characters of `term` escaped.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// `input` is expected to have gone through [`EventInput::validated`].
pub async fn create_event(pool: &PgPool, input: &EventInput, created_by: Uuid) -> Result<CalendarEvent> {
    let mut tx = pool.begin().await?;

    let event = sqlx::query_as::<_, CalendarEvent>(&format!(
        r#"
        INSERT INTO calendar_events (
            title, description, location, start_at, end_at, all_day, event_type,
            visibility, recurrence, recurrence_end, priority, notification_minutes,
            tags, task_id, evaluation_id, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {EVENT_COLUMNS}
        "#
    ))
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.location)
    .bind(input.start_at)
    .bind(input.end_at)
    .bind(input.all_day)
    .bind(input.event_type)
    .bind(input.visibility)
    .bind(input.recurrence)
    .bind(input.recurrence_end)
    .bind(input.priority)
    .bind(input.notification_minutes)
    .bind(&input.tags)
    .bind(input.task_id)
    .bind(input.evaluation_id)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await?;

    replace_audience(&mut tx, event.id, &input.audience()).await?;
    tx.commit().await?;
    Ok(event)
}

pub async fn update_event(pool: &PgPool, id: Uuid, input: &EventInput, updated_by: Uuid) -> Result<CalendarEvent> {
    let mut tx = pool.begin().await?;

    let event = sqlx::query_as::<_, CalendarEvent>(&format!(
        r#"
        UPDATE calendar_events
        SET title = $2, description = $3, location = $4, start_at = $5, end_at = $6,
            all_day = $7, event_type = $8, visibility = $9, recurrence = $10,
            recurrence_end = $11, priority = $12, notification_minutes = $13,
            tags = $14, task_id = $15, evaluation_id = $16, updated_by = $17,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {EVENT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&input.title)
    .bind(&input.description)
    .bind(&input.location)
    .bind(input.start_at)
    .bind(input.end_at)
    .bind(input.all_day)
    .bind(input.event_type)
    .bind(input.visibility)
    .bind(input.recurrence)
    .bind(input.recurrence_end)
    .bind(input.priority)
    .bind(input.notification_minutes)
    .bind(&input.tags)
    .bind(input.task_id)
    .bind(input.evaluation_id)
    .bind(updated_by)
    .fetch_one(&mut *tx)
    .await?;

    replace_audience(&mut tx, id, &input.audience()).await?;

    // Pending reminders follow the edited schedule, each with its own lead time.
    let pending = sqlx::query_as::<_, (Uuid, i32)>(
        "SELECT id, minutes_before FROM calendar_event_reminders WHERE event_id = $1 AND NOT is_sent",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;
    let now = Utc::now();
    for (reminder_id, minutes_before) in pending {
        sqlx::query("UPDATE calendar_event_reminders SET remind_at = $2 WHERE id = $1")
            .bind(reminder_id)
            .bind(reminders::fire_time(&event, minutes_before, now))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(event)
}

async fn replace_audience(tx: &mut Transaction<'_, Postgres>, event_id: Uuid, audience: &EventAudience) -> Result<()> {
    for table in ["calendar_event_classes", "calendar_event_subjects", "calendar_event_students"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE event_id = $1"))
            .bind(event_id)
            .execute(&mut **tx)
            .await?;
    }

    for class_group_id in &audience.class_group_ids {
        sqlx::query("INSERT INTO calendar_event_classes (event_id, class_group_id) VALUES ($1, $2)")
            .bind(event_id)
            .bind(class_group_id)
            .execute(&mut **tx)
            .await?;
    }
    for subject_id in &audience.subject_ids {
        sqlx::query("INSERT INTO calendar_event_subjects (event_id, subject_id) VALUES ($1, $2)")
            .bind(event_id)
            .bind(subject_id)
            .execute(&mut **tx)
            .await?;
    }
    for student in &audience.students {
        sqlx::query(
            r#"
            INSERT INTO calendar_event_students (event_id, student_id, is_visible)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, student_id) DO UPDATE SET is_visible = EXCLUDED.is_visible
            "#,
        )
        .bind(event_id)
        .bind(student.student_id)
        .bind(student.is_visible)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn deactivate_event(pool: &PgPool, id: Uuid, updated_by: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE calendar_events
        SET is_active = false, updated_by = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(updated_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_event(pool: &PgPool, id: Uuid) -> Result<Option<CalendarEvent>> {
    let event = sqlx::query_as::<_, CalendarEvent>(&format!(
        "SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(event)
}

/// Events that may have an occurrence in `[from, to]` and match the filters.
pub async fn find_events(pool: &PgPool, query: &EventQuery) -> Result<Vec<CalendarEvent>> {
    let search = query.search.as_deref().map(like_pattern);
    let events = sqlx::query_as::<_, CalendarEvent>(&format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM calendar_events e
        WHERE ($1 = false OR e.is_active)
          AND e.start_at <= $3
          AND (
                e.end_at >= $2
                OR (e.recurrence <> 'none'
                    AND (e.recurrence_end IS NULL OR e.recurrence_end + (e.end_at - e.start_at) >= $2))
              )
          AND ($4::calendar_event_type IS NULL OR e.event_type = $4)
          AND ($5::calendar_visibility IS NULL OR e.visibility = $5)
          AND ($6::uuid IS NULL OR EXISTS (
                SELECT 1 FROM calendar_event_classes x WHERE x.event_id = e.id AND x.class_group_id = $6))
          AND ($7::uuid IS NULL OR EXISTS (
                SELECT 1 FROM calendar_event_subjects x WHERE x.event_id = e.id AND x.subject_id = $7))
          AND ($8::uuid IS NULL OR EXISTS (
                SELECT 1 FROM calendar_event_students x WHERE x.event_id = e.id AND x.student_id = $8))
          AND ($9::text IS NULL OR e.title ILIKE $9 OR e.description ILIKE $9)
          AND ($10::text[] IS NULL OR e.tags && $10)
        ORDER BY e.start_at
        LIMIT $11
        "#
    ))
    .bind(query.active_only)
    .bind(query.from)
    .bind(query.to)
    .bind(query.event_type)
    .bind(query.visibility)
    .bind(query.class_group_id)
    .bind(query.subject_id)
    .bind(query.student_id)
    .bind(search)
    .bind(&query.tags)
    .bind(query.limit)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

/// Join rows for every event in `event_ids`; events without any get an
/// empty audience.
pub async fn load_audiences(pool: &PgPool, event_ids: &[Uuid]) -> Result<HashMap<Uuid, EventAudience>> {
    let mut audiences: HashMap<Uuid, EventAudience> = event_ids
        .iter()
        .map(|id| (*id, EventAudience::default()))
        .collect();
    if event_ids.is_empty() {
        return Ok(audiences);
    }

    let classes = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT event_id, class_group_id FROM calendar_event_classes WHERE event_id = ANY($1)",
    )
    .bind(event_ids)
    .fetch_all(pool)
    .await?;
    for (event_id, class_group_id) in classes {
        audiences.entry(event_id).or_default().class_group_ids.push(class_group_id);
    }

    let subjects = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT event_id, subject_id FROM calendar_event_subjects WHERE event_id = ANY($1)",
    )
    .bind(event_ids)
    .fetch_all(pool)
    .await?;
    for (event_id, subject_id) in subjects {
        audiences.entry(event_id).or_default().subject_ids.push(subject_id);
    }

    let students = sqlx::query_as::<_, (Uuid, Uuid, bool)>(
        "SELECT event_id, student_id, is_visible FROM calendar_event_students WHERE event_id = ANY($1)",
    )
    .bind(event_ids)
    .fetch_all(pool)
    .await?;
    for (event_id, student_id, is_visible) in students {
        audiences
            .entry(event_id)
            .or_default()
            .students
            .push(StudentAssociation { student_id, is_visible });
    }

    Ok(audiences)
}

/// One reminder per (event, user); scheduling again moves the firing time
/// and re-arms it.
pub async fn upsert_reminder(
    pool: &PgPool,
    event_id: Uuid,
    user_id: Uuid,
    minutes_before: i32,
    remind_at: DateTime<Utc>,
) -> Result<CalendarEventReminder> {
    let reminder = sqlx::query_as::<_, CalendarEventReminder>(&format!(
        r#"
        INSERT INTO calendar_event_reminders (event_id, user_id, minutes_before, remind_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (event_id, user_id) DO UPDATE
        SET minutes_before = EXCLUDED.minutes_before, remind_at = EXCLUDED.remind_at,
            is_sent = false, sent_at = NULL
        RETURNING {REMINDER_COLUMNS}
        "#
    ))
    .bind(event_id)
    .bind(user_id)
    .bind(minutes_before)
    .bind(remind_at)
    .fetch_one(pool)
    .await?;
    Ok(reminder)
}

pub async fn list_pending_reminders(pool: &PgPool, user_id: Uuid) -> Result<Vec<CalendarEventReminder>> {
    let reminders = sqlx::query_as::<_, CalendarEventReminder>(&format!(
        r#"
        SELECT {REMINDER_COLUMNS}
        FROM calendar_event_reminders
        WHERE user_id = $1 AND NOT is_sent
        ORDER BY remind_at
        "#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(reminders)
}

pub async fn get_due_reminders(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueReminder>> {
    let due = sqlx::query_as::<_, DueReminder>(
        r#"
        SELECT r.id AS reminder_id, r.event_id, r.user_id, e.title, e.start_at, r.remind_at
        FROM calendar_event_reminders r
        JOIN calendar_events e ON e.id = r.event_id
        WHERE NOT r.is_sent
          AND r.remind_at <= $1
          AND e.is_active
        ORDER BY r.remind_at
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(due)
}

pub async fn mark_reminders_sent(pool: &PgPool, ids: &[Uuid]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "UPDATE calendar_event_reminders SET is_sent = true, sent_at = NOW() WHERE id = ANY($1)",
    )
    .bind(ids)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("exam"), "%exam%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
