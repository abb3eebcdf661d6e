//! User access model.

use super::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Binds a principal to a plan and to the billing provider's subscription.
/// Owned by the subscription module; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAccess {
    pub access_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub external_subscription_id: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserAccess {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// An access together with the plan it points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub access: UserAccess,
    pub plan: Plan,
}

/// Input for creating an access (seeding and administration).
#[derive(Debug, Clone)]
pub struct CreateAccess {
    pub user_id: Uuid,
    pub plan_id: String,
    pub external_subscription_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}
