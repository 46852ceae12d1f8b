use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::grading::weights::Weighted;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "rubric_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RubricStatus {
    Draft,
    Active,
    Archived,
}

impl RubricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RubricStatus::Draft => "draft",
            RubricStatus::Active => "active",
            RubricStatus::Archived => "archived",
        }
    }

    /// draft -> active -> archived, draft -> archived. Archived is terminal.
    pub fn can_transition_to(&self, next: RubricStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (RubricStatus::Draft, RubricStatus::Active) => true,
            (RubricStatus::Draft, RubricStatus::Archived) => true,
            (RubricStatus::Active, RubricStatus::Archived) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[serde(alias = "md")]
    Markdown,
    Csv,
}

/// A criterion before it is persisted; `order` is its row position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionDraft {
    pub name: String,
    pub order: i32,
    pub weight: f64,
}

impl Weighted for CriterionDraft {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelDraft {
    pub name: String,
    pub order: i32,
    pub score_value: f64,
    pub color: String,
}

/// Cell text addressed by the `order` of its criterion and level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellDraft {
    pub criterion_order: i32,
    pub level_order: i32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedRubric {
    pub criteria: Vec<CriterionDraft>,
    pub levels: Vec<LevelDraft>,
    pub cells: Vec<CellDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rubric {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: RubricStatus,
    pub is_template: bool,
    pub visible_to_families: bool,
    pub criteria_count: i32,
    pub levels_count: i32,
    pub max_score: f64,
    pub subject_assignment_id: Option<Uuid>,
    pub teacher_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RubricCriterion {
    pub id: Uuid,
    pub rubric_id: Uuid,
    pub name: String,
    pub position: i32,
    pub weight: f64,
}

impl Weighted for RubricCriterion {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RubricLevel {
    pub id: Uuid,
    pub rubric_id: Uuid,
    pub name: String,
    pub position: i32,
    pub score_value: f64,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RubricCell {
    pub id: Uuid,
    pub rubric_id: Uuid,
    pub criterion_id: Uuid,
    pub level_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RubricDetail {
    #[serde(flatten)]
    pub rubric: Rubric,
    pub criteria: Vec<RubricCriterion>,
    pub levels: Vec<RubricLevel>,
    pub cells: Vec<RubricCell>,
}

impl RubricDetail {
    pub fn criterion(&self, id: Uuid) -> Option<&RubricCriterion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    pub fn level(&self, id: Uuid) -> Option<&RubricLevel> {
        self.levels.iter().find(|l| l.id == id)
    }

    pub fn cell_for(&self, criterion_id: Uuid, level_id: Uuid) -> Option<&RubricCell> {
        self.cells
            .iter()
            .find(|c| c.criterion_id == criterion_id && c.level_id == level_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RubricAssessment {
    pub id: Uuid,
    pub activity_assessment_id: Uuid,
    pub rubric_id: Uuid,
    pub student_id: Uuid,
    pub assessed_by: Uuid,
    pub total_score: f64,
    pub max_possible_score: f64,
    pub percentage: f64,
    pub is_complete: bool,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RubricAssessmentCriterion {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub criterion_id: Uuid,
    pub level_id: Uuid,
    pub cell_id: Option<Uuid>,
    pub raw_score: f64,
    pub weighted_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentDetail {
    #[serde(flatten)]
    pub assessment: RubricAssessment,
    pub criteria: Vec<RubricAssessmentCriterion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        assert!(RubricStatus::Draft.can_transition_to(RubricStatus::Active));
        assert!(RubricStatus::Draft.can_transition_to(RubricStatus::Archived));
        assert!(RubricStatus::Active.can_transition_to(RubricStatus::Archived));
        assert!(RubricStatus::Active.can_transition_to(RubricStatus::Active));
        assert!(!RubricStatus::Active.can_transition_to(RubricStatus::Draft));
        assert!(!RubricStatus::Archived.can_transition_to(RubricStatus::Active));
        assert!(!RubricStatus::Archived.can_transition_to(RubricStatus::Draft));
    }

    #[test]
    fn table_format_accepts_aliases() {
        let parse = |raw: &str| serde_json::from_value::<TableFormat>(serde_json::json!(raw));
        assert_eq!(parse("markdown").unwrap(), TableFormat::Markdown);
        assert_eq!(parse("md").unwrap(), TableFormat::Markdown);
        assert_eq!(parse("csv").unwrap(), TableFormat::Csv);
        assert!(parse("xlsx").is_err());
    }
}
