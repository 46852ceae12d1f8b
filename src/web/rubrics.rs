use crate::db;
use crate::db::rubrics::{NewRubric, RubricChanges, RubricFilter};
use crate::domain::error::DomainError;
use crate::domain::models::UserRole;
use crate::domain::rubric::{ParsedRubric, Rubric, RubricDetail, RubricStatus, TableFormat};
use crate::grading::{table_parser, weights};
use crate::services::rubrics::{self as rubric_service, RubricStructureInput};
use crate::state::SharedState;
use crate::web::assessments;
use crate::web::error::{ApiError, ApiResult};
use crate::web::session::UserSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct RubricMeta {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_template: bool,
    #[serde(default)]
    visible_to_families: bool,
    max_score: Option<f64>,
    subject_assignment_id: Option<Uuid>,
    status: Option<RubricStatus>,
}

#[derive(Debug, Deserialize)]
struct PreviewPayload {
    format: TableFormat,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImportPayload {
    #[serde(flatten)]
    meta: RubricMeta,
    format: TableFormat,
    content: String,
    #[serde(default = "default_true")]
    normalize_weights: bool,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    #[serde(flatten)]
    meta: RubricMeta,
    #[serde(flatten)]
    structure: RubricStructureInput,
    #[serde(default)]
    normalize_weights: bool,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    name: Option<String>,
    /// Empty string clears the description.
    description: Option<String>,
    status: Option<RubricStatus>,
    is_template: Option<bool>,
    visible_to_families: Option<bool>,
    max_score: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DuplicatePayload {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<RubricStatus>,
    /// Staff only: list templates from every teacher instead of own rubrics.
    template: Option<bool>,
    teacher_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    #[serde(flatten)]
    parsed: ParsedRubric,
    total_weight: f64,
    weights_valid: bool,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
    archived: bool,
}

fn default_true() -> bool {
    true
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_rubrics).post(create_rubric))
        .route("/preview", post(preview_table))
        .route("/import", post(import_rubric))
        .route("/:id", get(get_rubric).patch(update_rubric).delete(delete_rubric))
        .route("/:id/duplicate", post(duplicate_rubric))
        .route(
            "/:id/assessments",
            get(assessments::list_for_rubric).post(assessments::assess_student),
        )
        .with_state(state)
}

pub(crate) fn can_manage(session: &UserSession, rubric: &Rubric) -> bool {
    session.is_admin() || (session.role == UserRole::Teacher && rubric.teacher_id == session.user_id)
}

fn can_read(session: &UserSession, rubric: &Rubric) -> bool {
    match session.role {
        UserRole::Admin => true,
        UserRole::Teacher => rubric.teacher_id == session.user_id || rubric.is_template,
        UserRole::Student | UserRole::Family => {
            rubric.status == RubricStatus::Active && rubric.visible_to_families
        }
    }
}

fn clean_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name must be between 1 and {MAX_NAME_LEN} characters"
        ))
        .into());
    }
    Ok(name.to_string())
}

fn clean_max_score(raw: Option<f64>, default: f64) -> Result<f64, ApiError> {
    let value = raw.unwrap_or(default);
    if !value.is_finite() || value <= 0.0 {
        return Err(DomainError::validation("max_score must be a positive number").into());
    }
    Ok(value)
}

fn new_rubric(state: &SharedState, session: &UserSession, meta: RubricMeta) -> Result<NewRubric, ApiError> {
    let status = meta.status.unwrap_or(RubricStatus::Draft);
    if status == RubricStatus::Archived {
        return Err(DomainError::validation("a new rubric cannot start archived").into());
    }
    Ok(NewRubric {
        name: clean_name(&meta.name)?,
        description: meta
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        status,
        is_template: meta.is_template,
        visible_to_families: meta.visible_to_families,
        max_score: clean_max_score(meta.max_score, state.config.default_max_score)?,
        subject_assignment_id: meta.subject_assignment_id,
        teacher_id: session.user_id,
    })
}

async fn load_detail(state: &SharedState, id: Uuid) -> ApiResult<RubricDetail> {
    db::rubrics::get_rubric_detail(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))
}

async fn list_rubrics(
    session: UserSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Rubric>>> {
    let filter = match session.role {
        UserRole::Admin => RubricFilter {
            teacher_id: query.teacher_id,
            status: query.status,
            is_template: query.template,
            visible_to_families: None,
        },
        UserRole::Teacher if query.template == Some(true) => RubricFilter {
            teacher_id: None,
            status: query.status,
            is_template: Some(true),
            visible_to_families: None,
        },
        UserRole::Teacher => RubricFilter {
            teacher_id: Some(session.user_id),
            status: query.status,
            is_template: None,
            visible_to_families: None,
        },
        UserRole::Student | UserRole::Family => RubricFilter {
            teacher_id: None,
            status: Some(RubricStatus::Active),
            is_template: None,
            visible_to_families: Some(true),
        },
    };

    let rubrics = db::rubrics::list_rubrics(&state.pool, &filter).await?;
    Ok(Json(rubrics))
}

async fn preview_table(
    session: UserSession,
    Json(payload): Json<PreviewPayload>,
) -> ApiResult<Json<PreviewResponse>> {
    session.require_staff()?;
    let parsed = table_parser::parse_table(&payload.content, payload.format)?;
    Ok(Json(PreviewResponse {
        total_weight: weights::total_weight(&parsed.criteria),
        weights_valid: weights::validate(&parsed.criteria),
        parsed,
    }))
}

async fn import_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<ImportPayload>,
) -> ApiResult<(StatusCode, Json<RubricDetail>)> {
    session.require_staff()?;
    let new = new_rubric(&state, &session, payload.meta)?;
    let parsed = table_parser::parse_table(&payload.content, payload.format)?;
    let prepared = rubric_service::prepare(parsed, payload.normalize_weights)?;

    let detail = db::rubrics::create_rubric(&state.pool, &new, &prepared).await?;
    tracing::info!(
        "Teacher {} imported rubric {} ({} criteria x {} levels)",
        session.user_id,
        detail.rubric.id,
        detail.criteria.len(),
        detail.levels.len()
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn create_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<CreatePayload>,
) -> ApiResult<(StatusCode, Json<RubricDetail>)> {
    session.require_staff()?;
    let new = new_rubric(&state, &session, payload.meta)?;
    let parsed = rubric_service::build_structure(payload.structure)?;
    let prepared = rubric_service::prepare(parsed, payload.normalize_weights)?;

    let detail = db::rubrics::create_rubric(&state.pool, &new, &prepared).await?;
    tracing::info!("Teacher {} created rubric {}", session.user_id, detail.rubric.id);
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RubricDetail>> {
    let detail = load_detail(&state, id).await?;
    if !can_read(&session, &detail.rubric) {
        return Err(ApiError::NotFound("rubric"));
    }
    Ok(Json(detail))
}

async fn update_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePayload>,
) -> ApiResult<Json<Rubric>> {
    let rubric = db::rubrics::get_rubric(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))?;
    if !can_manage(&session, &rubric) {
        return Err(ApiError::Forbidden);
    }

    if let Some(next) = payload.status {
        if !rubric.status.can_transition_to(next) {
            return Err(DomainError::validation(format!(
                "cannot move rubric from {} to {}",
                rubric.status.as_str(),
                next.as_str()
            ))
            .into());
        }
    }

    let max_score = match payload.max_score {
        Some(raw) => {
            let value = clean_max_score(Some(raw), rubric.max_score)?;
            if value != rubric.max_score && db::rubrics::count_assessments(&state.pool, id).await? > 0 {
                return Err(ApiError::Conflict(
                    "max_score cannot change once students have been assessed".to_string(),
                ));
            }
            Some(value)
        }
        None => None,
    };

    let changes = RubricChanges {
        name: payload.name.as_deref().map(clean_name).transpose()?,
        description: payload.description.map(|d| {
            let trimmed = d.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
        status: payload.status,
        is_template: payload.is_template,
        visible_to_families: payload.visible_to_families,
        max_score,
    };

    let updated = db::rubrics::update_rubric(&state.pool, id, &changes).await?;
    Ok(Json(updated))
}

async fn delete_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    let rubric = db::rubrics::get_rubric(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))?;
    if !can_manage(&session, &rubric) {
        return Err(ApiError::Forbidden);
    }

    if db::rubrics::count_assessments(&state.pool, id).await? > 0 {
        let changes = RubricChanges {
            status: Some(RubricStatus::Archived),
            ..Default::default()
        };
        db::rubrics::update_rubric(&state.pool, id, &changes).await?;
        tracing::info!("Rubric {} has assessments, archived instead of deleted", id);
        return Ok(Json(DeleteResponse {
            deleted: false,
            archived: true,
        }));
    }

    db::rubrics::delete_rubric(&state.pool, id).await?;
    tracing::info!("Rubric {} deleted by {}", id, session.user_id);
    Ok(Json(DeleteResponse {
        deleted: true,
        archived: false,
    }))
}

async fn duplicate_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<DuplicatePayload>>,
) -> ApiResult<(StatusCode, Json<RubricDetail>)> {
    session.require_staff()?;
    let source = load_detail(&state, id).await?;
    if !can_read(&session, &source.rubric) {
        return Err(ApiError::NotFound("rubric"));
    }

    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let name = match payload.name {
        Some(name) => clean_name(&name)?,
        None => format!("{} (copy)", source.rubric.name),
    };
    let new = NewRubric {
        name,
        description: source.rubric.description.clone(),
        status: RubricStatus::Draft,
        is_template: false,
        visible_to_families: source.rubric.visible_to_families,
        max_score: source.rubric.max_score,
        subject_assignment_id: source.rubric.subject_assignment_id,
        teacher_id: session.user_id,
    };
    let prepared = rubric_service::prepare(rubric_service::to_parsed(&source), true)?;

    let detail = db::rubrics::create_rubric(&state.pool, &new, &prepared).await?;
    tracing::info!("Rubric {} duplicated into {}", id, detail.rubric.id);
    Ok((StatusCode::CREATED, Json(detail)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rubric(teacher_id: Uuid, status: RubricStatus, is_template: bool, visible: bool) -> Rubric {
        Rubric {
            id: Uuid::new_v4(),
            name: "Lab report".into(),
            description: None,
            status,
            is_template,
            visible_to_families: visible,
            criteria_count: 3,
            levels_count: 4,
            max_score: 10.0,
            subject_assignment_id: None,
            teacher_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn session(role: UserRole) -> UserSession {
        UserSession {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn owners_and_admins_manage() {
        let owner = session(UserRole::Teacher);
        let own = rubric(owner.user_id, RubricStatus::Draft, false, false);
        assert!(can_manage(&owner, &own));
        assert!(can_manage(&session(UserRole::Admin), &own));
        assert!(!can_manage(&session(UserRole::Teacher), &own));
        assert!(!can_manage(&session(UserRole::Student), &own));
    }

    #[test]
    fn teachers_read_own_rubrics_and_templates() {
        let teacher = session(UserRole::Teacher);
        assert!(can_read(&teacher, &rubric(teacher.user_id, RubricStatus::Draft, false, false)));
        assert!(can_read(&teacher, &rubric(Uuid::new_v4(), RubricStatus::Active, true, false)));
        assert!(!can_read(&teacher, &rubric(Uuid::new_v4(), RubricStatus::Active, false, false)));
    }

    #[test]
    fn families_read_only_active_shared_rubrics() {
        let family = session(UserRole::Family);
        assert!(can_read(&family, &rubric(Uuid::new_v4(), RubricStatus::Active, false, true)));
        assert!(!can_read(&family, &rubric(Uuid::new_v4(), RubricStatus::Draft, false, true)));
        assert!(!can_read(&family, &rubric(Uuid::new_v4(), RubricStatus::Active, false, false)));
    }

    #[test]
    fn import_payload_defaults_to_normalizing() {
        let payload: ImportPayload = serde_json::from_value(serde_json::json!({
            "name": "Essay",
            "format": "markdown",
            "content": "| Criterio | Bajo |\n| A | x |"
        }))
        .unwrap();
        assert!(payload.normalize_weights);
        assert_eq!(payload.format, TableFormat::Markdown);
        assert!(!payload.meta.is_template);
    }

    #[test]
    fn create_payload_reads_structure() {
        let payload: CreatePayload = serde_json::from_value(serde_json::json!({
            "name": "Oral presentation",
            "max_score": 10,
            "criteria": [{ "name": "Voice", "weight": 0.5 }, { "name": "Content", "weight": 0.5 }],
            "levels": [{ "name": "Low" }, { "name": "High", "score_value": 4 }],
            "cells": [{ "criterion_index": 0, "level_index": 1, "content": "Clear and audible" }]
        }))
        .unwrap();
        assert!(!payload.normalize_weights);
        assert_eq!(payload.meta.max_score, Some(10.0));
        assert_eq!(payload.structure.criteria.len(), 2);
        assert_eq!(payload.structure.levels[1].score_value, Some(4.0));
    }

    #[test]
    fn name_and_score_checks() {
        assert_eq!(clean_name("  Essay ").unwrap(), "Essay");
        assert!(clean_name("   ").is_err());
        assert_eq!(clean_max_score(None, 100.0).unwrap(), 100.0);
        assert!(clean_max_score(Some(0.0), 100.0).is_err());
    }
}
