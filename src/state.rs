use crate::config::Config;
use crate::domain::calendar::VisibilityPolicy;
use crate::middleware::RateLimiter;
use crate::services::reminders::ReminderNotifier;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub notifier: Arc<dyn ReminderNotifier>,
    pub login_limiter: RateLimiter,
}

impl AppState {
    pub fn visibility_policy(&self) -> VisibilityPolicy {
        VisibilityPolicy {
            admin_private_override: self.config.admin_private_override,
        }
    }
}

pub type SharedState = Arc<AppState>;
