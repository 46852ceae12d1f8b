use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    Teacher,
    Student,
    Family,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Teacher => "TEACHER",
            UserRole::Student => "STUDENT",
            UserRole::Family => "FAMILY",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Teacher)
    }
}

impl TryFrom<&str> for UserRole {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "TEACHER" => Ok(UserRole::Teacher),
            "STUDENT" => Ok(UserRole::Student),
            "FAMILY" => Ok(UserRole::Family),
            _ => Err(()),
        }
    }
}

/// Who is looking at calendar data, with the memberships visibility rules
/// are checked against.
///
/// Families carry the class groups and subjects of their linked students;
/// `student_ids` is the student themself for a student and the linked
/// children for a family.
#[derive(Debug, Clone, Serialize)]
pub struct Viewer {
    pub user_id: Uuid,
    pub role: UserRole,
    pub class_group_ids: Vec<Uuid>,
    pub subject_ids: Vec<Uuid>,
    pub student_ids: Vec<Uuid>,
}
