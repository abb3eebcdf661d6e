//! Plan model and metered feature keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Plan id of the free tier. Its credits reset daily instead of monthly.
pub const FREE_PLAN_ID: &str = "FREE";

/// Metered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureKey {
    AiCredits,
    StorageMb,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 2] = [FeatureKey::AiCredits, FeatureKey::StorageMb];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::AiCredits => "AI_CREDITS",
            FeatureKey::StorageMb => "STORAGE_MB",
        }
    }

    /// Strict parse; unknown keys are `None` rather than a default.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AI_CREDITS" => Some(FeatureKey::AiCredits),
            "STORAGE_MB" => Some(FeatureKey::StorageMb),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a plan's credit cycle is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Calendar day, UTC.
    Daily,
    /// Monthly, anchored to the external subscription start date.
    Monthly,
}

/// Subscription tier. Reference data; never mutated by this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: String,
    pub daily_quota_credits: Option<i64>,
    pub monthly_quota_credits: Option<i64>,
    pub storage_quota_mb: Option<i64>,
    pub created_utc: DateTime<Utc>,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.plan_id == FREE_PLAN_ID
    }

    pub fn cycle_kind(&self) -> CycleKind {
        if self.is_free() {
            CycleKind::Daily
        } else {
            CycleKind::Monthly
        }
    }

    /// Quota for `feature` within one cycle. `None` means unlimited.
    pub fn quota_for(&self, feature: FeatureKey) -> Option<i64> {
        match feature {
            FeatureKey::AiCredits if self.is_free() => self.daily_quota_credits,
            FeatureKey::AiCredits => self.monthly_quota_credits,
            FeatureKey::StorageMb => self.storage_quota_mb,
        }
    }

    /// Features whose monthly cycle records the reset scheduler maintains.
    pub fn monthly_metered_features(&self) -> Vec<FeatureKey> {
        if self.is_free() {
            return Vec::new();
        }

        let mut features = Vec::with_capacity(2);
        if self.monthly_quota_credits.is_some() {
            features.push(FeatureKey::AiCredits);
        }
        if self.storage_quota_mb.is_some() {
            features.push(FeatureKey::StorageMb);
        }
        features
    }
}

/// Input for creating a plan (seeding and administration).
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub plan_id: String,
    pub daily_quota_credits: Option<i64>,
    pub monthly_quota_credits: Option<i64>,
    pub storage_quota_mb: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: &str, daily: Option<i64>, monthly: Option<i64>, storage: Option<i64>) -> Plan {
        Plan {
            plan_id: id.to_string(),
            daily_quota_credits: daily,
            monthly_quota_credits: monthly,
            storage_quota_mb: storage,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn free_tier_uses_daily_credit_quota() {
        let free = plan(FREE_PLAN_ID, Some(10), Some(300), None);
        assert_eq!(free.cycle_kind(), CycleKind::Daily);
        assert_eq!(free.quota_for(FeatureKey::AiCredits), Some(10));
        assert!(free.monthly_metered_features().is_empty());
    }

    #[test]
    fn paid_tier_meters_monthly_features() {
        let pro = plan("PRO", None, Some(500), Some(1024));
        assert_eq!(pro.cycle_kind(), CycleKind::Monthly);
        assert_eq!(pro.quota_for(FeatureKey::AiCredits), Some(500));
        assert_eq!(pro.quota_for(FeatureKey::StorageMb), Some(1024));
        assert_eq!(
            pro.monthly_metered_features(),
            vec![FeatureKey::AiCredits, FeatureKey::StorageMb]
        );
    }

    #[test]
    fn paid_tier_without_storage_quota() {
        let studio = plan("STUDIO", None, Some(2000), None);
        assert_eq!(studio.quota_for(FeatureKey::StorageMb), None);
        assert_eq!(studio.monthly_metered_features(), vec![FeatureKey::AiCredits]);
    }

    #[test]
    fn feature_key_parse_is_strict() {
        assert_eq!(FeatureKey::parse("AI_CREDITS"), Some(FeatureKey::AiCredits));
        assert_eq!(FeatureKey::parse("STORAGE_MB"), Some(FeatureKey::StorageMb));
        assert_eq!(FeatureKey::parse("ai_credits"), None);
        assert_eq!(FeatureKey::parse(""), None);
    }
}
