use crate::config::SeedAdmin;
use crate::domain::models::UserRole;
use anyhow::Result;
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use rand_core::OsRng;
use sqlx::PgPool;

/// Creates the bootstrap admin when configured. Existing accounts are left
/// alone so a changed code in the environment never resets a password.
pub async fn seed_admin(pool: &PgPool, admin: &SeedAdmin) -> Result<()> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(admin.code.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash seed admin code: {e}"))?
        .to_string();

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (email, hash, name, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(&admin.email)
    .bind(hash)
    .bind("Administrator")
    .bind(UserRole::Admin)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!("Seeded admin account {}", admin.email);
    } else {
        tracing::debug!("Seed admin {} already present", admin.email);
    }
    Ok(())
}
