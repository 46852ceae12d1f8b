pub mod calendar;
pub mod rubrics;
pub mod seed;

use crate::domain::models::{UserRole, Viewer};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    pub hash: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(
        r#"
        SELECT id, email, hash, name, role, is_active, created_at
        FROM users
        WHERE email = $1
          AND is_active = true
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(
        r#"
        SELECT id, email, hash, name, role, is_active, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_user_role(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRole>> {
    let role = sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(role)
}

pub async fn get_linked_students(pool: &PgPool, family_user_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT student_id FROM family_links WHERE family_user_id = $1 ORDER BY student_id",
    )
    .bind(family_user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn is_family_of(pool: &PgPool, family_user_id: Uuid, student_id: Uuid) -> Result<bool> {
    let linked = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM family_links WHERE family_user_id = $1 AND student_id = $2)",
    )
    .bind(family_user_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;
    Ok(linked)
}

/// Builds the membership view used for calendar visibility. Families see
/// through their linked students.
pub async fn load_viewer(pool: &PgPool, user_id: Uuid, role: UserRole) -> Result<Viewer> {
    let student_ids = match role {
        UserRole::Student => vec![user_id],
        UserRole::Family => get_linked_students(pool, user_id).await?,
        UserRole::Admin | UserRole::Teacher => Vec::new(),
    };
    let members = if role == UserRole::Family {
        student_ids.clone()
    } else {
        vec![user_id]
    };

    let class_group_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT class_group_id FROM class_group_members WHERE user_id = ANY($1)",
    )
    .bind(&members)
    .fetch_all(pool)
    .await?;

    let subject_ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT subject_id FROM subject_members WHERE user_id = ANY($1)",
    )
    .bind(&members)
    .fetch_all(pool)
    .await?;

    Ok(Viewer {
        user_id,
        role,
        class_group_ids,
        subject_ids,
        student_ids,
    })
}
