use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::models::{UserRole, Viewer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "calendar_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Activity,
    Evaluation,
    Exam,
    Deadline,
    Holiday,
    Meeting,
    ParentMeeting,
    Excursion,
    SchoolEvent,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "calendar_visibility", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    TeachersOnly,
    StudentsOnly,
    FamiliesOnly,
    AdminOnly,
    ClassSpecific,
    SubjectSpecific,
    Private,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "calendar_recurrence", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[sqlx(rename = "none")]
    #[serde(rename = "none")]
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    pub fn repeats(&self) -> bool {
        !matches!(self, Recurrence::Never)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub all_day: bool,
    pub event_type: EventType,
    pub visibility: Visibility,
    pub recurrence: Recurrence,
    pub recurrence_end: Option<DateTime<Utc>>,
    pub priority: i16,
    pub notification_minutes: i32,
    pub tags: Vec<String>,
    pub task_id: Option<Uuid>,
    pub evaluation_id: Option<Uuid>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalendarEventReminder {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub minutes_before: i32,
    pub remind_at: DateTime<Utc>,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentAssociation {
    pub student_id: Uuid,
    pub is_visible: bool,
}

/// Join rows of an event: who it is scoped to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventAudience {
    pub class_group_ids: Vec<Uuid>,
    pub subject_ids: Vec<Uuid>,
    pub students: Vec<StudentAssociation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VisibilityPolicy {
    /// Lets admins read other users' private events.
    pub admin_private_override: bool,
}

/// Whether `viewer` may see an event with the given visibility and join rows.
///
/// The creator always sees their own event. Admins see everything except
/// other users' private events, which need `admin_private_override`.
///
/// A class or subject specific event reaches a non-admin through one of two
/// paths: membership in an associated class group or subject, or an explicit
/// student row with `is_visible = true` for the viewer or one of their
/// children. The explicit row works even outside every associated group.
pub fn is_visible_to(
    viewer: &Viewer,
    created_by: Uuid,
    visibility: Visibility,
    audience: &EventAudience,
    policy: VisibilityPolicy,
) -> bool {
    if viewer.user_id == created_by {
        return true;
    }
    let is_admin = viewer.role == UserRole::Admin;

    match visibility {
        Visibility::Public => true,
        Visibility::TeachersOnly => is_admin || viewer.role == UserRole::Teacher,
        Visibility::StudentsOnly => is_admin || viewer.role == UserRole::Student,
        Visibility::FamiliesOnly => is_admin || viewer.role == UserRole::Family,
        Visibility::AdminOnly => is_admin,
        Visibility::ClassSpecific => {
            is_admin || scoped_match(viewer, audience, intersects(&viewer.class_group_ids, &audience.class_group_ids))
        }
        Visibility::SubjectSpecific => {
            is_admin || scoped_match(viewer, audience, intersects(&viewer.subject_ids, &audience.subject_ids))
        }
        Visibility::Private => is_admin && policy.admin_private_override,
    }
}

/// Student join rows refine class/subject scoping: an explicit
/// `is_visible = true` grants access to that student and their families,
/// and when every one of the viewer's students is explicitly hidden the
/// membership match no longer counts.
fn scoped_match(viewer: &Viewer, audience: &EventAudience, membership: bool) -> bool {
    let associated: Vec<&StudentAssociation> = audience
        .students
        .iter()
        .filter(|a| viewer.student_ids.contains(&a.student_id))
        .collect();

    if associated.iter().any(|a| a.is_visible) {
        return true;
    }
    let all_hidden = !viewer.student_ids.is_empty()
        && viewer
            .student_ids
            .iter()
            .all(|id| associated.iter().any(|a| a.student_id == *id && !a.is_visible));
    membership && !all_hidden
}

fn intersects(left: &[Uuid], right: &[Uuid]) -> bool {
    left.iter().any(|id| right.contains(id))
}

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NOTIFICATION_MINUTES: i32 = 7 * 24 * 60;
pub const DEFAULT_PRIORITY: i16 = 3;

/// Body of create and update requests for an event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventInput {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub event_type: EventType,
    pub visibility: Visibility,
    #[serde(default = "default_recurrence")]
    pub recurrence: Recurrence,
    pub recurrence_end: Option<DateTime<Utc>>,
    pub priority: Option<i16>,
    pub notification_minutes: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub task_id: Option<Uuid>,
    pub evaluation_id: Option<Uuid>,
    #[serde(default)]
    pub class_group_ids: Vec<Uuid>,
    #[serde(default)]
    pub subject_ids: Vec<Uuid>,
    #[serde(default)]
    pub students: Vec<StudentAssociation>,
}

fn default_recurrence() -> Recurrence {
    Recurrence::Never
}

impl EventInput {
    /// Checks ranges and cross-field rules, returning a cleaned copy with
    /// trimmed text, deduplicated tags and defaults filled in.
    pub fn validated(mut self) -> Result<Self, DomainError> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() || self.title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title must be between 1 and {MAX_TITLE_LEN} characters"
            )));
        }
        if self.end_at < self.start_at {
            return Err(DomainError::validation("end_at must not be before start_at"));
        }

        let priority = self.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(1..=5).contains(&priority) {
            return Err(DomainError::validation("priority must be between 1 and 5"));
        }
        self.priority = Some(priority);

        let minutes = self.notification_minutes.unwrap_or(0);
        if !(0..=MAX_NOTIFICATION_MINUTES).contains(&minutes) {
            return Err(DomainError::validation(format!(
                "notification_minutes must be between 0 and {MAX_NOTIFICATION_MINUTES}"
            )));
        }
        self.notification_minutes = Some(minutes);

        match (self.recurrence.repeats(), self.recurrence_end) {
            (false, Some(_)) => {
                return Err(DomainError::validation(
                    "recurrence_end requires a recurring event",
                ))
            }
            (true, Some(until)) if until < self.start_at => {
                return Err(DomainError::validation(
                    "recurrence_end must not be before start_at",
                ))
            }
            _ => {}
        }

        if self.visibility == Visibility::ClassSpecific && self.class_group_ids.is_empty() && self.students.is_empty() {
            return Err(DomainError::validation(
                "class_specific events need at least one class group or student",
            ));
        }
        if self.visibility == Visibility::SubjectSpecific && self.subject_ids.is_empty() && self.students.is_empty() {
            return Err(DomainError::validation(
                "subject_specific events need at least one subject or student",
            ));
        }

        self.description = self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        self.location = self.location.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags.iter().map(|t| t.trim().to_lowercase()) {
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        self.tags = tags;
        self.class_group_ids.sort();
        self.class_group_ids.dedup();
        self.subject_ids.sort();
        self.subject_ids.dedup();
        Ok(self)
    }

    pub fn audience(&self) -> EventAudience {
        EventAudience {
            class_group_ids: self.class_group_ids.clone(),
            subject_ids: self.subject_ids.clone(),
            students: self.students.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> EventInput {
        serde_json::from_value(serde_json::json!({
            "title": "  Parent meeting  ",
            "start_at": "2024-10-01T16:00:00Z",
            "end_at": "2024-10-01T17:00:00Z",
            "event_type": "parent_meeting",
            "visibility": "families_only",
            "tags": ["Term1", "term1 ", ""]
        }))
        .unwrap()
    }

    #[test]
    fn validated_fills_defaults_and_cleans_text() {
        let event = input().validated().unwrap();
        assert_eq!(event.title, "Parent meeting");
        assert_eq!(event.priority, Some(DEFAULT_PRIORITY));
        assert_eq!(event.notification_minutes, Some(0));
        assert_eq!(event.recurrence, Recurrence::Never);
        assert_eq!(event.tags, vec!["term1".to_string()]);
    }

    #[test]
    fn validated_rejects_bad_ranges() {
        let mut event = input();
        event.end_at = event.start_at - chrono::Duration::hours(1);
        assert!(matches!(event.validated(), Err(DomainError::Validation(_))));

        let mut event = input();
        event.priority = Some(6);
        assert!(event.validated().is_err());

        let mut event = input();
        event.notification_minutes = Some(-5);
        assert!(event.validated().is_err());

        let mut event = input();
        event.title = "   ".into();
        assert!(event.validated().is_err());
    }

    #[test]
    fn validated_checks_recurrence_end() {
        let mut event = input();
        event.recurrence_end = Some(event.start_at + chrono::Duration::days(30));
        assert!(event.validated().is_err());

        let mut event = input();
        event.recurrence = Recurrence::Weekly;
        event.recurrence_end = Some(event.start_at - chrono::Duration::days(1));
        assert!(event.validated().is_err());

        let mut event = input();
        event.recurrence = Recurrence::Weekly;
        event.recurrence_end = Some(event.start_at + chrono::Duration::days(30));
        assert!(event.validated().is_ok());
    }

    #[test]
    fn scoped_visibility_needs_targets() {
        let mut event = input();
        event.visibility = Visibility::ClassSpecific;
        assert!(event.clone().validated().is_err());
        event.class_group_ids = vec![Uuid::new_v4()];
        assert!(event.validated().is_ok());
    }

    fn viewer(role: UserRole) -> Viewer {
        Viewer {
            user_id: Uuid::new_v4(),
            role,
            class_group_ids: Vec::new(),
            subject_ids: Vec::new(),
            student_ids: Vec::new(),
        }
    }

    const ALL_ROLES: [UserRole; 4] = [UserRole::Admin, UserRole::Teacher, UserRole::Student, UserRole::Family];

    #[test]
    fn public_is_visible_to_everyone() {
        for role in ALL_ROLES {
            assert!(is_visible_to(
                &viewer(role),
                Uuid::new_v4(),
                Visibility::Public,
                &EventAudience::default(),
                VisibilityPolicy::default()
            ));
        }
    }

    #[test]
    fn role_scoped_visibility() {
        let cases = [
            (Visibility::TeachersOnly, UserRole::Teacher),
            (Visibility::StudentsOnly, UserRole::Student),
            (Visibility::FamiliesOnly, UserRole::Family),
            (Visibility::AdminOnly, UserRole::Admin),
        ];
        for (visibility, allowed) in cases {
            for role in ALL_ROLES {
                let visible = is_visible_to(
                    &viewer(role),
                    Uuid::new_v4(),
                    visibility,
                    &EventAudience::default(),
                    VisibilityPolicy::default(),
                );
                assert_eq!(visible, role == allowed || role == UserRole::Admin, "{visibility:?} {role:?}");
            }
        }
    }

    #[test]
    fn class_specific_needs_membership_except_for_admins() {
        let group = Uuid::new_v4();
        let audience = EventAudience {
            class_group_ids: vec![group],
            ..Default::default()
        };
        for role in [UserRole::Teacher, UserRole::Student, UserRole::Family] {
            let mut outsider = viewer(role);
            outsider.class_group_ids = vec![Uuid::new_v4()];
            assert!(!is_visible_to(&outsider, Uuid::new_v4(), Visibility::ClassSpecific, &audience, VisibilityPolicy::default()));

            let mut member = viewer(role);
            member.class_group_ids = vec![group];
            assert!(is_visible_to(&member, Uuid::new_v4(), Visibility::ClassSpecific, &audience, VisibilityPolicy::default()));
        }
        assert!(is_visible_to(
            &viewer(UserRole::Admin),
            Uuid::new_v4(),
            Visibility::ClassSpecific,
            &audience,
            VisibilityPolicy::default()
        ));
    }

    #[test]
    fn class_specific_without_any_group_is_hidden() {
        let mut student = viewer(UserRole::Student);
        student.class_group_ids = vec![Uuid::new_v4()];
        assert!(!is_visible_to(
            &student,
            Uuid::new_v4(),
            Visibility::ClassSpecific,
            &EventAudience::default(),
            VisibilityPolicy::default()
        ));
    }

    #[test]
    fn subject_specific_matches_subjects() {
        let subject = Uuid::new_v4();
        let audience = EventAudience {
            subject_ids: vec![subject],
            ..Default::default()
        };
        let mut teacher = viewer(UserRole::Teacher);
        assert!(!is_visible_to(&teacher, Uuid::new_v4(), Visibility::SubjectSpecific, &audience, VisibilityPolicy::default()));
        teacher.subject_ids.push(subject);
        assert!(is_visible_to(&teacher, Uuid::new_v4(), Visibility::SubjectSpecific, &audience, VisibilityPolicy::default()));
    }

    #[test]
    fn student_rows_grant_and_hide() {
        let group = Uuid::new_v4();
        let mut student = viewer(UserRole::Student);
        student.student_ids = vec![student.user_id];

        let granted = EventAudience {
            class_group_ids: vec![group],
            students: vec![StudentAssociation { student_id: student.user_id, is_visible: true }],
            ..Default::default()
        };
        assert!(is_visible_to(&student, Uuid::new_v4(), Visibility::ClassSpecific, &granted, VisibilityPolicy::default()));

        student.class_group_ids = vec![group];
        let hidden = EventAudience {
            class_group_ids: vec![group],
            students: vec![StudentAssociation { student_id: student.user_id, is_visible: false }],
            ..Default::default()
        };
        assert!(!is_visible_to(&student, Uuid::new_v4(), Visibility::ClassSpecific, &hidden, VisibilityPolicy::default()));
    }

    #[test]
    fn outsiders_need_an_explicit_student_row() {
        let group = Uuid::new_v4();
        let mut outsider = viewer(UserRole::Student);
        outsider.student_ids = vec![outsider.user_id];
        outsider.class_group_ids = vec![Uuid::new_v4()];

        let groups_only = EventAudience {
            class_group_ids: vec![group],
            ..Default::default()
        };
        assert!(!is_visible_to(&outsider, Uuid::new_v4(), Visibility::ClassSpecific, &groups_only, VisibilityPolicy::default()));

        let someone_else_granted = EventAudience {
            class_group_ids: vec![group],
            students: vec![StudentAssociation { student_id: Uuid::new_v4(), is_visible: true }],
            ..Default::default()
        };
        assert!(!is_visible_to(&outsider, Uuid::new_v4(), Visibility::ClassSpecific, &someone_else_granted, VisibilityPolicy::default()));

        let granted = EventAudience {
            class_group_ids: vec![group],
            students: vec![StudentAssociation { student_id: outsider.user_id, is_visible: true }],
            ..Default::default()
        };
        assert!(is_visible_to(&outsider, Uuid::new_v4(), Visibility::ClassSpecific, &granted, VisibilityPolicy::default()));
    }

    #[test]
    fn family_sees_event_when_one_child_is_still_visible() {
        let group = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let mut family = viewer(UserRole::Family);
        family.class_group_ids = vec![group];
        family.student_ids = vec![first, second];
        let audience = EventAudience {
            class_group_ids: vec![group],
            students: vec![StudentAssociation { student_id: first, is_visible: false }],
            ..Default::default()
        };
        assert!(is_visible_to(&family, Uuid::new_v4(), Visibility::ClassSpecific, &audience, VisibilityPolicy::default()));
    }

    #[test]
    fn private_is_creator_only_unless_admin_override() {
        let creator = viewer(UserRole::Teacher);
        let audience = EventAudience::default();
        assert!(is_visible_to(&creator, creator.user_id, Visibility::Private, &audience, VisibilityPolicy::default()));

        let admin = viewer(UserRole::Admin);
        assert!(!is_visible_to(&admin, creator.user_id, Visibility::Private, &audience, VisibilityPolicy::default()));
        let policy = VisibilityPolicy { admin_private_override: true };
        assert!(is_visible_to(&admin, creator.user_id, Visibility::Private, &audience, policy));

        let teacher = viewer(UserRole::Teacher);
        assert!(!is_visible_to(&teacher, creator.user_id, Visibility::Private, &audience, policy));
    }

    #[test]
    fn recurrence_serializes_never_as_none() {
        assert_eq!(serde_json::to_string(&Recurrence::Never).unwrap(), "\"none\"");
        let parsed: Recurrence = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(parsed, Recurrence::Weekly);
        assert!(!Recurrence::Never.repeats());
    }
}
