//! Rubric preparation and assessment planning. Everything here is pure; the
//! handlers persist what these functions return.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::rubric::{CellDraft, CriterionDraft, LevelDraft, ParsedRubric, RubricDetail};
use crate::grading::scoring::{self, CriterionScore, ScoreResult};
use crate::grading::{gradient, weights};

#[derive(Debug, Clone, Deserialize)]
pub struct CriterionInput {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelInput {
    pub name: String,
    pub score_value: Option<f64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellInput {
    pub criterion_index: usize,
    pub level_index: usize,
    pub content: String,
}

/// Criteria, levels and cells sent as JSON instead of a pasted table.
#[derive(Debug, Clone, Deserialize)]
pub struct RubricStructureInput {
    pub criteria: Vec<CriterionInput>,
    pub levels: Vec<LevelInput>,
    #[serde(default)]
    pub cells: Vec<CellInput>,
}

pub fn build_structure(input: RubricStructureInput) -> Result<ParsedRubric, DomainError> {
    if input.criteria.is_empty() {
        return Err(DomainError::validation("at least one criterion is required"));
    }
    if input.levels.is_empty() {
        return Err(DomainError::validation("at least one performance level is required"));
    }

    let mut criteria = Vec::with_capacity(input.criteria.len());
    for (i, c) in input.criteria.iter().enumerate() {
        let name = c.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation(format!("criterion {} has no name", i + 1)));
        }
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(DomainError::validation(format!(
                "criterion '{name}' has an invalid weight"
            )));
        }
        criteria.push(CriterionDraft {
            name: name.to_string(),
            order: i as i32,
            weight: c.weight,
        });
    }

    let palette = gradient::level_colors(input.levels.len());
    let mut levels: Vec<LevelDraft> = Vec::with_capacity(input.levels.len());
    for (i, (l, default_color)) in input.levels.iter().zip(palette).enumerate() {
        let name = l.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation(format!("level {} has no name", i + 1)));
        }
        let score_value = l.score_value.unwrap_or((i + 1) as f64);
        if !score_value.is_finite() || score_value < 0.0 {
            return Err(DomainError::validation(format!(
                "level '{name}' has an invalid score value"
            )));
        }
        if let Some(previous) = levels.last() {
            if score_value <= previous.score_value {
                return Err(DomainError::validation(
                    "level score values must increase with level order",
                ));
            }
        }
        let color = match &l.color {
            Some(raw) => normalize_color(raw).ok_or_else(|| {
                DomainError::validation(format!("level '{name}' color must look like #RRGGBB"))
            })?,
            None => default_color,
        };
        levels.push(LevelDraft {
            name: name.to_string(),
            order: i as i32,
            score_value,
            color,
        });
    }

    let mut seen = HashSet::new();
    let mut cells = Vec::with_capacity(input.cells.len());
    for cell in input.cells {
        if cell.criterion_index >= criteria.len() || cell.level_index >= levels.len() {
            return Err(DomainError::validation(format!(
                "cell ({}, {}) points outside the rubric",
                cell.criterion_index, cell.level_index
            )));
        }
        if !seen.insert((cell.criterion_index, cell.level_index)) {
            return Err(DomainError::validation(format!(
                "duplicate cell for criterion {} and level {}",
                cell.criterion_index, cell.level_index
            )));
        }
        cells.push(CellDraft {
            criterion_order: cell.criterion_index as i32,
            level_order: cell.level_index as i32,
            content: cell.content.trim().to_string(),
        });
    }

    Ok(ParsedRubric {
        criteria,
        levels,
        cells,
    })
}

fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.trim().strip_prefix('#')?;
    (hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| format!("#{}", hex.to_uppercase()))
}

/// Makes a parsed rubric ready to store: weights must form a distribution
/// (rescaled when `normalize` is set) and every criterion/level pair gets
/// exactly one cell, empty when the source had none.
pub fn prepare(parsed: ParsedRubric, normalize: bool) -> Result<ParsedRubric, DomainError> {
    if let Some(bad) = parsed
        .criteria
        .iter()
        .find(|c| !c.weight.is_finite() || c.weight < 0.0)
    {
        return Err(DomainError::validation(format!(
            "criterion '{}' has an invalid weight {}",
            bad.name, bad.weight
        )));
    }

    let criteria = if weights::validate(&parsed.criteria) {
        parsed.criteria
    } else if normalize {
        weights::normalize(&parsed.criteria)
    } else {
        return Err(DomainError::validation(format!(
            "criterion weights must sum to 1.0 (got {:.4})",
            weights::total_weight(&parsed.criteria)
        )));
    };

    let mut cells = Vec::with_capacity(criteria.len() * parsed.levels.len());
    for criterion in &criteria {
        for level in &parsed.levels {
            let content = parsed
                .cells
                .iter()
                .find(|c| c.criterion_order == criterion.order && c.level_order == level.order)
                .map(|c| c.content.clone())
                .unwrap_or_default();
            cells.push(CellDraft {
                criterion_order: criterion.order,
                level_order: level.order,
                content,
            });
        }
    }

    Ok(ParsedRubric {
        criteria,
        levels: parsed.levels,
        cells,
    })
}

/// Structure of a stored rubric, used when duplicating it.
pub fn to_parsed(detail: &RubricDetail) -> ParsedRubric {
    let criteria = detail
        .criteria
        .iter()
        .map(|c| CriterionDraft {
            name: c.name.clone(),
            order: c.position,
            weight: c.weight,
        })
        .collect();
    let levels = detail
        .levels
        .iter()
        .map(|l| LevelDraft {
            name: l.name.clone(),
            order: l.position,
            score_value: l.score_value,
            color: l.color.clone(),
        })
        .collect();
    let cells = detail
        .cells
        .iter()
        .filter_map(|cell| {
            let criterion = detail.criterion(cell.criterion_id)?;
            let level = detail.level(cell.level_id)?;
            Some(CellDraft {
                criterion_order: criterion.position,
                level_order: level.position,
                content: cell.content.clone(),
            })
        })
        .collect();
    ParsedRubric {
        criteria,
        levels,
        cells,
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Selection {
    pub criterion_id: Uuid,
    pub level_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedCriterion {
    pub criterion_id: Uuid,
    pub level_id: Uuid,
    pub cell_id: Option<Uuid>,
    pub raw_score: f64,
    pub weighted_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentPlan {
    pub criteria: Vec<PlannedCriterion>,
    pub score: ScoreResult,
    pub is_complete: bool,
}

/// Resolves level selections against the rubric and scores them.
pub fn plan_assessment(detail: &RubricDetail, selections: &[Selection]) -> Result<AssessmentPlan, DomainError> {
    let mut seen = HashSet::new();
    let mut planned = Vec::with_capacity(selections.len());
    let mut scores = Vec::with_capacity(selections.len());

    for selection in selections {
        let criterion = detail.criterion(selection.criterion_id).ok_or_else(|| {
            DomainError::validation(format!("unknown criterion {}", selection.criterion_id))
        })?;
        let level = detail.level(selection.level_id).ok_or_else(|| {
            DomainError::validation(format!("unknown level {}", selection.level_id))
        })?;
        if !seen.insert(criterion.id) {
            return Err(DomainError::validation(format!(
                "criterion '{}' selected more than once",
                criterion.name
            )));
        }

        let score = CriterionScore {
            weight: criterion.weight,
            level_value: level.score_value,
        };
        scores.push(score);
        planned.push(PlannedCriterion {
            criterion_id: criterion.id,
            level_id: level.id,
            cell_id: detail.cell_for(criterion.id, level.id).map(|c| c.id),
            raw_score: level.score_value,
            weighted_score: score.weighted(),
        });
    }

    let score = scoring::calculate(&scores, Some(detail.rubric.max_score))?;
    let is_complete = detail.criteria.iter().all(|c| seen.contains(&c.id));

    Ok(AssessmentPlan {
        criteria: planned,
        score,
        is_complete,
    })
}
