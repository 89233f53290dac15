use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::balances::{BalanceSource, aggregate_balances};
use crate::domain::fval::{Timestamp, ts_now};
use crate::errors::AccountingError;
use crate::usecases::history_service::HistoryService;
use crate::usecases::report_service::ReportService;

#[derive(Clone)]
pub struct AppState {
    pub balance_sources: Arc<Vec<Arc<dyn BalanceSource>>>,
    pub report_service: Arc<ReportService>,
    pub history_service: Arc<HistoryService>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({"error": msg.into()})))
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    start_ts: Option<Timestamp>,
    end_ts: Option<Timestamp>,
}

impl PeriodQuery {
    fn resolve(&self) -> Result<(Timestamp, Timestamp), ApiError> {
        let start_ts = self.start_ts.unwrap_or(0);
        let end_ts = self.end_ts.unwrap_or_else(ts_now);
        if start_ts < 0 || end_ts < start_ts {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("invalid period {start_ts}..{end_ts}"),
            ));
        }
        Ok((start_ts, end_ts))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/balances", get(api_balances))
        .route("/api/history", get(api_history))
        .route("/api/report", get(api_report))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(skip(state))]
async fn api_balances(State(state): State<AppState>) -> Json<Value> {
    let aggregated = aggregate_balances(&state.balance_sources).await;
    let ts = ts_now();
    if !aggregated.sheet.is_empty() {
        match state
            .history_service
            .persist_balance_snapshot(ts, &aggregated.sheet)
            .await
        {
            Ok(count) => info!(rows = count, "Balance snapshot saved"),
            Err(e) => error!(error = %e, "Failed to save balance snapshot"),
        }
    }

    Json(json!({
        "timestamp": ts,
        "balances": aggregated.sheet.serialize(),
        "net_value": aggregated.sheet.net_value().to_string(),
        "warnings": aggregated.messages.warnings,
        "errors": aggregated.messages.errors,
    }))
}

#[tracing::instrument(skip(state))]
async fn api_history(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start_ts, end_ts) = q.resolve()?;
    let (actions, history_error) = state.report_service.history_in_period(start_ts, end_ts).await;
    Ok(Json(json!({
        "start_ts": start_ts,
        "end_ts": end_ts,
        "actions": actions,
        "error": history_error,
    })))
}

#[tracing::instrument(skip(state))]
async fn api_report(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start_ts, end_ts) = q.resolve()?;
    match state.report_service.compute_and_record(start_ts, end_ts).await {
        Ok(report) => Ok(Json(report.to_json())),
        Err(e @ AccountingError::UnsupportedProfitCurrency(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Report computation failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
