use crate::db;
use crate::domain::error::DomainError;
use crate::domain::models::UserRole;
use crate::domain::rubric::{AssessmentDetail, Rubric, RubricAssessment, RubricStatus};
use crate::services::rubrics::{self as rubric_service, Selection};
use crate::state::SharedState;
use crate::web::error::{ApiError, ApiResult};
use crate::web::rubrics::can_manage;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

const MAX_COMMENT_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
pub(crate) struct AssessPayload {
    activity_assessment_id: Uuid,
    student_id: Uuid,
    selections: Vec<Selection>,
    comments: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/:id", get(get_assessment))
        .with_state(state)
}

/// Owner or admin, the assessed student, or a linked family member when the
/// rubric is shared with families.
fn can_view_directly(session: &UserSession, rubric: &Rubric, assessment: &RubricAssessment) -> bool {
    if can_manage(session, rubric) {
        return true;
    }
    session.role == UserRole::Student && assessment.student_id == session.user_id
}

pub(crate) async fn assess_student(
    session: UserSession,
    State(state): State<SharedState>,
    Path(rubric_id): Path<Uuid>,
    Json(payload): Json<AssessPayload>,
) -> ApiResult<Json<AssessmentDetail>> {
    session.require_staff()?;
    let detail = db::rubrics::get_rubric_detail(&state.pool, rubric_id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))?;
    if !can_manage(&session, &detail.rubric) {
        return Err(ApiError::Forbidden);
    }
    if detail.rubric.status != RubricStatus::Active {
        return Err(ApiError::Conflict(format!(
            "rubric is {}, only active rubrics can be used to assess",
            detail.rubric.status.as_str()
        )));
    }
    if db::get_user_role(&state.pool, payload.student_id).await? != Some(UserRole::Student) {
        return Err(DomainError::validation(format!("{} is not a student", payload.student_id)).into());
    }

    let comments = payload
        .comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if comments.as_ref().is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN) {
        return Err(DomainError::validation(format!(
            "comments must be at most {MAX_COMMENT_LEN} characters"
        ))
        .into());
    }

    let plan = rubric_service::plan_assessment(&detail, &payload.selections)?;
    let assessment = db::rubrics::upsert_assessment(
        &state.pool,
        payload.activity_assessment_id,
        rubric_id,
        payload.student_id,
        session.user_id,
        comments.as_deref(),
        &plan,
    )
    .await?;

    tracing::info!(
        "Assessment {} saved for student {} on rubric {}: {:.2}/{:.2} ({:.2}%)",
        assessment.assessment.id,
        payload.student_id,
        rubric_id,
        plan.score.total_score,
        plan.score.max_possible_score,
        plan.score.percentage
    );
    Ok(Json(assessment))
}

pub(crate) async fn list_for_rubric(
    session: UserSession,
    State(state): State<SharedState>,
    Path(rubric_id): Path<Uuid>,
) -> ApiResult<Json<Vec<RubricAssessment>>> {
    let rubric = db::rubrics::get_rubric(&state.pool, rubric_id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))?;
    if !can_manage(&session, &rubric) {
        return Err(ApiError::Forbidden);
    }

    let assessments = db::rubrics::list_assessments(&state.pool, rubric_id).await?;
    Ok(Json(assessments))
}

async fn get_assessment(
    session: UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AssessmentDetail>> {
    let detail = db::rubrics::get_assessment_detail(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("assessment"))?;
    let rubric = db::rubrics::get_rubric(&state.pool, detail.assessment.rubric_id)
        .await?
        .ok_or(ApiError::NotFound("rubric"))?;

    let allowed = if can_view_directly(&session, &rubric, &detail.assessment) {
        true
    } else if session.role == UserRole::Family && rubric.visible_to_families {
        db::is_family_of(&state.pool, session.user_id, detail.assessment.student_id).await?
    } else {
        false
    };

    if !allowed {
        // Same answer as a missing row, so ids reveal nothing.
        return Err(ApiError::NotFound("assessment"));
    }
    Ok(Json(detail))
}
