use crate::db;
use crate::db::calendar::EventQuery;
use crate::domain::calendar::{
    is_visible_to, CalendarEvent, CalendarEventReminder, EventAudience, EventInput, EventType, Recurrence,
    Visibility, VisibilityPolicy, MAX_NOTIFICATION_MINUTES,
};
use crate::domain::error::DomainError;
use crate::domain::models::Viewer;
use crate::domain::recurrence::occurrences;
use crate::services::reminders;
use crate::state::SharedState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 366;
const MAX_CANDIDATES: usize = 2000;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    event_type: Option<EventType>,
    visibility: Option<Visibility>,
    class_group_id: Option<Uuid>,
    subject_id: Option<Uuid>,
    student_id: Option<Uuid>,
    search: Option<String>,
    /// Comma separated; an event matches when it has any of them.
    tags: Option<String>,
    include_recurring: Option<bool>,
    active_only: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ReminderPayload {
    minutes_before: Option<i32>,
}

/// One occurrence of an event inside the requested window.
#[derive(Debug, Clone, Serialize)]
struct EventOccurrence {
    #[serde(flatten)]
    event: CalendarEvent,
    occurrence_start: DateTime<Utc>,
    occurrence_end: DateTime<Utc>,
    is_recurring_instance: bool,
}

#[derive(Debug, Serialize)]
struct EventWithAudience {
    #[serde(flatten)]
    event: CalendarEvent,
    #[serde(flatten)]
    audience: EventAudience,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route(
            "/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/events/:id/reminders", post(schedule_reminder))
        .route("/reminders", get(list_reminders))
        .with_state(state)
}

fn resolve_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let from = from.unwrap_or(now);
    let to = to.unwrap_or(from + Duration::days(DEFAULT_WINDOW_DAYS));
    if to < from {
        return Err(ApiError::BadRequest("'to' must not be before 'from'".to_string()));
    }
    if to - from > Duration::days(MAX_WINDOW_DAYS) {
        return Err(ApiError::BadRequest(format!(
            "the requested window must not exceed {MAX_WINDOW_DAYS} days"
        )));
    }
    Ok((from, to))
}

fn parse_tags(raw: Option<&str>) -> Option<Vec<String>> {
    let tags: Vec<String> = raw?
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    (!tags.is_empty()).then_some(tags)
}

/// Expands visible events into the occurrences overlapping the window,
/// ordered by occurrence start. Without `include_recurring` a repeating event
/// only contributes its first occurrence.
fn expand(
    events: Vec<CalendarEvent>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    include_recurring: bool,
) -> Vec<EventOccurrence> {
    let mut expanded = Vec::new();
    for event in events {
        let recurrence = if include_recurring {
            event.recurrence
        } else {
            Recurrence::Never
        };
        let series = occurrences(
            event.start_at,
            event.end_at,
            recurrence,
            event.recurrence_end,
            window_start,
            window_end,
        );
        for occurrence in series {
            expanded.push(EventOccurrence {
                is_recurring_instance: occurrence.start != event.start_at,
                occurrence_start: occurrence.start,
                occurrence_end: occurrence.end,
                event: event.clone(),
            });
        }
    }
    expanded.sort_by(|a, b| {
        a.occurrence_start
            .cmp(&b.occurrence_start)
            .then_with(|| b.event.priority.cmp(&a.event.priority))
            .then_with(|| a.event.id.cmp(&b.event.id))
    });
    expanded
}

/// The storage query asks for one row more than [`MAX_CANDIDATES`]; getting it
/// back means the window matched too much to resolve in one response.
fn ensure_complete(fetched: usize) -> Result<(), ApiError> {
    if fetched > MAX_CANDIDATES {
        return Err(ApiError::BadRequest(format!(
            "more than {MAX_CANDIDATES} events match; narrow the window or add filters"
        )));
    }
    Ok(())
}

fn can_modify(session: &UserSession, event: &CalendarEvent) -> bool {
    session.is_admin() || event.created_by == session.user_id
}

/// Deactivated events stay hidden from everyone but their creator and admins,
/// the same rule single-event reads apply.
fn listable(
    session: &UserSession,
    viewer: &Viewer,
    event: &CalendarEvent,
    audience: &EventAudience,
    policy: VisibilityPolicy,
) -> bool {
    (event.is_active || can_modify(session, event))
        && is_visible_to(viewer, event.created_by, event.visibility, audience, policy)
}

async fn load_visible_event(
    state: &SharedState,
    session: &UserSession,
    id: Uuid,
) -> ApiResult<CalendarEvent> {
    let event = db::calendar::get_event(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("event"))?;
    if !event.is_active && !can_modify(session, &event) {
        return Err(ApiError::NotFound("event"));
    }

    let viewer = db::load_viewer(&state.pool, session.user_id, session.role).await?;
    let mut audiences = db::calendar::load_audiences(&state.pool, &[event.id]).await?;
    let audience = audiences.remove(&event.id).unwrap_or_default();
    if !is_visible_to(&viewer, event.created_by, event.visibility, &audience, state.visibility_policy()) {
        return Err(ApiError::NotFound("event"));
    }
    Ok(event)
}

async fn list_events(
    session: UserSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<EventOccurrence>>> {
    let (from, to) = resolve_window(query.from, query.to, Utc::now())?;
    let storage_query = EventQuery {
        from,
        to,
        event_type: query.event_type,
        visibility: query.visibility,
        class_group_id: query.class_group_id,
        subject_id: query.subject_id,
        student_id: query.student_id,
        search: query.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        tags: parse_tags(query.tags.as_deref()),
        active_only: query.active_only.unwrap_or(true),
        limit: MAX_CANDIDATES as i64 + 1,
    };

    let candidates = db::calendar::find_events(&state.pool, &storage_query).await?;
    ensure_complete(candidates.len())?;
    let viewer = db::load_viewer(&state.pool, session.user_id, session.role).await?;
    let ids: Vec<Uuid> = candidates.iter().map(|e| e.id).collect();
    let audiences = db::calendar::load_audiences(&state.pool, &ids).await?;
    let policy = state.visibility_policy();
    let empty = EventAudience::default();

    let total = candidates.len();
    let visible: Vec<CalendarEvent> = candidates
        .into_iter()
        .filter(|e| {
            let audience = audiences.get(&e.id).unwrap_or(&empty);
            listable(&session, &viewer, e, audience, policy)
        })
        .collect();
    tracing::debug!(
        "Calendar query for {}: {} of {} candidate events visible",
        session.user_id,
        visible.len(),
        total
    );

    Ok(Json(expand(visible, from, to, query.include_recurring.unwrap_or(true))))
}

async fn create_event(
    session: UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<EventInput>,
) -> ApiResult<(StatusCode, Json<EventWithAudience>)> {
    session.require_staff()?;
    let input = payload.validated()?;
    let event = db::calendar::create_event(&state.pool, &input, session.user_id).await?;
    tracing::info!(
        "Calendar event {} ({:?}) created by {}",
        event.id,
        event.event_type,
        session.user_id
    );
    Ok((
        StatusCode::CREATED,
        Json(EventWithAudience {
            event,
            audience: input.audience(),
        }),
    ))
}

async fn get_event(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EventWithAudience>> {
    let event = load_visible_event(&state, &session, id).await?;
    let audience = if session.role.is_staff() {
        db::calendar::load_audiences(&state.pool, &[id])
            .await?
            .remove(&id)
            .unwrap_or_default()
    } else {
        EventAudience::default()
    };
    Ok(Json(EventWithAudience { event, audience }))
}

async fn update_event(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EventInput>,
) -> ApiResult<Json<EventWithAudience>> {
    let existing = db::calendar::get_event(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("event"))?;
    if !can_modify(&session, &existing) {
        return Err(ApiError::Forbidden);
    }

    let input = payload.validated()?;
    let event = db::calendar::update_event(&state.pool, id, &input, session.user_id).await?;
    tracing::info!("Calendar event {} updated by {}", id, session.user_id);
    Ok(Json(EventWithAudience {
        event,
        audience: input.audience(),
    }))
}

async fn delete_event(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let existing = db::calendar::get_event(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("event"))?;
    if !can_modify(&session, &existing) {
        return Err(ApiError::Forbidden);
    }

    db::calendar::deactivate_event(&state.pool, id, session.user_id).await?;
    tracing::info!("Calendar event {} deactivated by {}", id, session.user_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn schedule_reminder(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReminderPayload>>,
) -> ApiResult<(StatusCode, Json<CalendarEventReminder>)> {
    let event = load_visible_event(&state, &session, id).await?;
    if !event.is_active {
        return Err(ApiError::Conflict("event is no longer active".to_string()));
    }

    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let minutes = payload.minutes_before.unwrap_or(event.notification_minutes);
    if !(0..=MAX_NOTIFICATION_MINUTES).contains(&minutes) {
        return Err(DomainError::validation(format!(
            "minutes_before must be between 0 and {MAX_NOTIFICATION_MINUTES}"
        ))
        .into());
    }

    let fire_at = reminders::fire_time(&event, minutes, Utc::now());
    let reminder = db::calendar::upsert_reminder(&state.pool, id, session.user_id, minutes, fire_at).await?;
    tracing::info!("Reminder for event {} scheduled at {} for {}", id, fire_at, session.user_id);
    Ok((StatusCode::CREATED, Json(reminder)))
}

async fn list_reminders(
    session: UserSession,
    State(state): State<SharedState>,
) -> ApiResult<Json<Vec<CalendarEventReminder>>> {
    let pending = db::calendar::list_pending_reminders(&state.pool, session.user_id).await?;
    Ok(Json(pending))
}
