use crate::domain::rubric::{
    AssessmentDetail, ParsedRubric, Rubric, RubricAssessment, RubricAssessmentCriterion, RubricCell,
    RubricCriterion, RubricDetail, RubricLevel, RubricStatus,
};
use crate::services::rubrics::AssessmentPlan;
use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

const RUBRIC_COLUMNS: &str = r#"
    id, name, description, status, is_template, visible_to_families,
    criteria_count, levels_count, max_score, subject_assignment_id,
    teacher_id, created_at, updated_at
"#;

const ASSESSMENT_COLUMNS: &str = r#"
    id, activity_assessment_id, rubric_id, student_id, assessed_by,
    total_score, max_possible_score, percentage, is_complete, comments,
    created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct NewRubric {
    pub name: String,
    pub description: Option<String>,
    pub status: RubricStatus,
    pub is_template: bool,
    pub visible_to_families: bool,
    pub max_score: f64,
    pub subject_assignment_id: Option<Uuid>,
    pub teacher_id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct RubricFilter {
    pub teacher_id: Option<Uuid>,
    pub status: Option<RubricStatus>,
    pub is_template: Option<bool>,
    pub visible_to_families: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct RubricChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<RubricStatus>,
    pub is_template: Option<bool>,
    pub visible_to_families: Option<bool>,
    pub max_score: Option<f64>,
}

/// Stores a rubric with all its criteria, levels and cells in one
/// transaction. `parsed` must already be prepared (weights checked, one
/// cell per pair).
pub async fn create_rubric(pool: &PgPool, new: &NewRubric, parsed: &ParsedRubric) -> Result<RubricDetail> {
    let mut tx = pool.begin().await?;

    let rubric = sqlx::query_as::<_, Rubric>(&format!(
        r#"
        INSERT INTO rubrics (
            name, description, status, is_template, visible_to_families,
            criteria_count, levels_count, max_score, subject_assignment_id, teacher_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {RUBRIC_COLUMNS}
        "#
    ))
    .bind(&new.name)
    .bind(&new.description)
    .bind(new.status)
    .bind(new.is_template)
    .bind(new.visible_to_families)
    .bind(parsed.criteria.len() as i32)
    .bind(parsed.levels.len() as i32)
    .bind(new.max_score)
    .bind(new.subject_assignment_id)
    .bind(new.teacher_id)
    .fetch_one(&mut *tx)
    .await?;

    let detail = insert_structure(&mut tx, rubric, parsed).await?;
    tx.commit().await?;
    Ok(detail)
}

async fn insert_structure(
    tx: &mut Transaction<'_, Postgres>,
    rubric: Rubric,
    parsed: &ParsedRubric,
) -> Result<RubricDetail> {
    let mut criteria = Vec::with_capacity(parsed.criteria.len());
    for draft in &parsed.criteria {
        let criterion = sqlx::query_as::<_, RubricCriterion>(
            r#"
            INSERT INTO rubric_criteria (rubric_id, name, position, weight)
            VALUES ($1, $2, $3, $4)
            RETURNING id, rubric_id, name, position, weight
            "#,
        )
        .bind(rubric.id)
        .bind(&draft.name)
        .bind(draft.order)
        .bind(draft.weight)
        .fetch_one(&mut **tx)
        .await?;
        criteria.push(criterion);
    }

    let mut levels = Vec::with_capacity(parsed.levels.len());
    for draft in &parsed.levels {
        let level = sqlx::query_as::<_, RubricLevel>(
            r#"
            INSERT INTO rubric_levels (rubric_id, name, position, score_value, color)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, rubric_id, name, position, score_value, color
            "#,
        )
        .bind(rubric.id)
        .bind(&draft.name)
        .bind(draft.order)
        .bind(draft.score_value)
        .bind(&draft.color)
        .fetch_one(&mut **tx)
        .await?;
        levels.push(level);
    }

    let criterion_ids: HashMap<i32, Uuid> = criteria.iter().map(|c| (c.position, c.id)).collect();
    let level_ids: HashMap<i32, Uuid> = levels.iter().map(|l| (l.position, l.id)).collect();

    let mut cells = Vec::with_capacity(parsed.cells.len());
    for draft in &parsed.cells {
        let criterion_id = *criterion_ids
            .get(&draft.criterion_order)
            .with_context(|| format!("cell references missing criterion {}", draft.criterion_order))?;
        let level_id = *level_ids
            .get(&draft.level_order)
            .with_context(|| format!("cell references missing level {}", draft.level_order))?;
        let cell = sqlx::query_as::<_, RubricCell>(
            r#"
            INSERT INTO rubric_cells (rubric_id, criterion_id, level_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, rubric_id, criterion_id, level_id, content
            "#,
        )
        .bind(rubric.id)
        .bind(criterion_id)
        .bind(level_id)
        .bind(&draft.content)
        .fetch_one(&mut **tx)
        .await?;
        cells.push(cell);
    }

    Ok(RubricDetail {
        rubric,
        criteria,
        levels,
        cells,
    })
}

pub async fn get_rubric(pool: &PgPool, id: Uuid) -> Result<Option<Rubric>> {
    let rubric = sqlx::query_as::<_, Rubric>(&format!(
        "SELECT {RUBRIC_COLUMNS} FROM rubrics WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(rubric)
}

pub async fn get_rubric_detail(pool: &PgPool, id: Uuid) -> Result<Option<RubricDetail>> {
    let Some(rubric) = get_rubric(pool, id).await? else {
        return Ok(None);
    };

    let criteria = sqlx::query_as::<_, RubricCriterion>(
        r#"
        SELECT id, rubric_id, name, position, weight
        FROM rubric_criteria
        WHERE rubric_id = $1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let levels = sqlx::query_as::<_, RubricLevel>(
        r#"
        SELECT id, rubric_id, name, position, score_value, color
        FROM rubric_levels
        WHERE rubric_id = $1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let cells = sqlx::query_as::<_, RubricCell>(
        r#"
        SELECT cell.id, cell.rubric_id, cell.criterion_id, cell.level_id, cell.content
        FROM rubric_cells cell
        JOIN rubric_criteria c ON c.id = cell.criterion_id
        JOIN rubric_levels l ON l.id = cell.level_id
        WHERE cell.rubric_id = $1
        ORDER BY c.position, l.position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(RubricDetail {
        rubric,
        criteria,
        levels,
        cells,
    }))
}

pub async fn list_rubrics(pool: &PgPool, filter: &RubricFilter) -> Result<Vec<Rubric>> {
    let rubrics = sqlx::query_as::<_, Rubric>(&format!(
        r#"
        SELECT {RUBRIC_COLUMNS}
        FROM rubrics
        WHERE ($1::uuid IS NULL OR teacher_id = $1)
          AND ($2::rubric_status IS NULL OR status = $2)
          AND ($3::boolean IS NULL OR is_template = $3)
          AND ($4::boolean IS NULL OR visible_to_families = $4)
        ORDER BY updated_at DESC
        "#
    ))
    .bind(filter.teacher_id)
    .bind(filter.status)
    .bind(filter.is_template)
    .bind(filter.visible_to_families)
    .fetch_all(pool)
    .await?;
    Ok(rubrics)
}

pub async fn update_rubric(pool: &PgPool, id: Uuid, changes: &RubricChanges) -> Result<Rubric> {
    let rubric = sqlx::query_as::<_, Rubric>(&format!(
        r#"
        UPDATE rubrics
        SET name = COALESCE($2, name),
            description = CASE WHEN $3 THEN $4 ELSE description END,
            status = COALESCE($5, status),
            is_template = COALESCE($6, is_template),
            visible_to_families = COALESCE($7, visible_to_families),
            max_score = COALESCE($8, max_score),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {RUBRIC_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&changes.name)
    .bind(changes.description.is_some())
    .bind(changes.description.clone().flatten())
    .bind(changes.status)
    .bind(changes.is_template)
    .bind(changes.visible_to_families)
    .bind(changes.max_score)
    .fetch_one(pool)
    .await?;
    Ok(rubric)
}

pub async fn count_assessments(pool: &PgPool, rubric_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM rubric_assessments WHERE rubric_id = $1",
    )
    .bind(rubric_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn delete_rubric(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM rubrics WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Writes an assessment for (activity assessment, rubric, student). A
/// repeated call keeps the row id, recomputes the scores and replaces the
/// per-criterion rows.
pub async fn upsert_assessment(
    pool: &PgPool,
    activity_assessment_id: Uuid,
    rubric_id: Uuid,
    student_id: Uuid,
    assessed_by: Uuid,
    comments: Option<&str>,
    plan: &AssessmentPlan,
) -> Result<AssessmentDetail> {
    let mut tx = pool.begin().await?;

    let assessment = sqlx::query_as::<_, RubricAssessment>(&format!(
        r#"
        INSERT INTO rubric_assessments (
            activity_assessment_id, rubric_id, student_id, assessed_by,
            total_score, max_possible_score, percentage, is_complete, comments
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (activity_assessment_id, rubric_id, student_id) DO UPDATE
        SET assessed_by = EXCLUDED.assessed_by,
            total_score = EXCLUDED.total_score,
            max_possible_score = EXCLUDED.max_possible_score,
            percentage = EXCLUDED.percentage,
            is_complete = EXCLUDED.is_complete,
            comments = EXCLUDED.comments,
            updated_at = NOW()
        RETURNING {ASSESSMENT_COLUMNS}
        "#
    ))
    .bind(activity_assessment_id)
    .bind(rubric_id)
    .bind(student_id)
    .bind(assessed_by)
    .bind(plan.score.total_score)
    .bind(plan.score.max_possible_score)
    .bind(plan.score.percentage)
    .bind(plan.is_complete)
    .bind(comments)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM rubric_assessment_criteria WHERE assessment_id = $1")
        .bind(assessment.id)
        .execute(&mut *tx)
        .await?;

    let mut criteria = Vec::with_capacity(plan.criteria.len());
    for planned in &plan.criteria {
        let row = sqlx::query_as::<_, RubricAssessmentCriterion>(
            r#"
            INSERT INTO rubric_assessment_criteria (
                assessment_id, criterion_id, level_id, cell_id, raw_score, weighted_score
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, assessment_id, criterion_id, level_id, cell_id, raw_score, weighted_score
            "#,
        )
        .bind(assessment.id)
        .bind(planned.criterion_id)
        .bind(planned.level_id)
        .bind(planned.cell_id)
        .bind(planned.raw_score)
        .bind(planned.weighted_score)
        .fetch_one(&mut *tx)
        .await?;
        criteria.push(row);
    }

    tx.commit().await?;
    Ok(AssessmentDetail {
        assessment,
        criteria,
    })
}

pub async fn list_assessments(pool: &PgPool, rubric_id: Uuid) -> Result<Vec<RubricAssessment>> {
    let rows = sqlx::query_as::<_, RubricAssessment>(&format!(
        r#"
        SELECT {ASSESSMENT_COLUMNS}
        FROM rubric_assessments
        WHERE rubric_id = $1
        ORDER BY updated_at DESC
        "#
    ))
    .bind(rubric_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_assessment_detail(pool: &PgPool, id: Uuid) -> Result<Option<AssessmentDetail>> {
    let assessment = sqlx::query_as::<_, RubricAssessment>(&format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM rubric_assessments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(assessment) = assessment else {
        return Ok(None);
    };

    let criteria = sqlx::query_as::<_, RubricAssessmentCriterion>(
        r#"
        SELECT ac.id, ac.assessment_id, ac.criterion_id, ac.level_id, ac.cell_id,
               ac.raw_score, ac.weighted_score
        FROM rubric_assessment_criteria ac
        JOIN rubric_criteria c ON c.id = ac.criterion_id
        WHERE ac.assessment_id = $1
        ORDER BY c.position
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(AssessmentDetail {
        assessment,
        criteria,
    }))
}
