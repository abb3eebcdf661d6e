use crate::dtos::ChargeRequest;
use crate::models::{ChargeReceipt, FeatureKey, UsageRecord, UsageSummary};
use crate::services::CycleRunReport;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

fn parse_feature(raw: &str) -> Result<FeatureKey, AppError> {
    FeatureKey::parse(raw)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown feature: {}", raw)))
}

/// Admit and record a metered spend. Callers must not perform the paid
/// action unless this returns 200.
pub async fn charge(
    State(state): State<AppState>,
    Json(request): Json<ChargeRequest>,
) -> Result<Json<ChargeReceipt>, AppError> {
    request.validate()?;
    let feature = parse_feature(&request.feature)?;

    let receipt = state
        .ledger
        .charge(request.user_id, feature, request.cost)
        .await?;

    Ok(Json(receipt))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path((user_id, feature)): Path<(Uuid, String)>,
) -> Result<Json<UsageSummary>, AppError> {
    let feature = parse_feature(&feature)?;
    let summary = state.ledger.usage_summary(user_id, feature).await?;
    Ok(Json(summary))
}

pub async fn open_daily_cycle(
    State(state): State<AppState>,
    Path((user_id, feature)): Path<(Uuid, String)>,
) -> Result<Json<UsageRecord>, AppError> {
    let feature = parse_feature(&feature)?;
    let record = state.ledger.open_daily_cycle(user_id, feature).await?;
    Ok(Json(record))
}

/// Manual trigger for the cycle reset pass.
pub async fn run_cycle_reset(
    State(state): State<AppState>,
) -> Result<Json<CycleRunReport>, AppError> {
    tracing::info!("Manual cycle reset run requested");
    let report = state.scheduler.run().await?;
    Ok(Json(report))
}
