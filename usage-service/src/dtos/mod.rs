use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ChargeRequest {
    pub user_id: uuid::Uuid,

    #[validate(length(min = 1, message = "Feature is required"))]
    pub feature: String,

    #[validate(range(min = 1, message = "Cost must be a positive integer"))]
    pub cost: i64,
}
