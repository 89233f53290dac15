use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use crate::api::{AppState, router};
use crate::api_client::MockPriceProvider;
use crate::balances::{BalanceSource, ManualBalanceSource};
use crate::config::AccountingSettings;
use crate::domain::asset::Asset;
use crate::domain::fval::{FVal, fval_from_json};
use crate::domain::models::TradeRow;
use crate::domain::repository::HistoryRepo;
use crate::history::historian::TradesHistorian;
use crate::infra::sqlite::SqliteRepo;
use crate::usecases::history_service::HistoryService;
use crate::usecases::report_service::ReportService;

fn trade_row(timestamp: i64, trade_type: &str, amount: &str, rate: &str) -> TradeRow {
    TradeRow {
        id: None,
        timestamp,
        location: "kraken".to_string(),
        pair: "BTC_EUR".to_string(),
        trade_type: trade_type.to_string(),
        amount: amount.to_string(),
        rate: rate.to_string(),
        fee: "0".to_string(),
        fee_currency: "EUR".to_string(),
        link: None,
        notes: None,
    }
}

struct TestApp {
    app: Router,
    repo: Arc<dyn HistoryRepo>,
    history_service: Arc<HistoryService>,
}

async fn setup(manual_csv: Option<String>) -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to connect to in-memory db");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    let repo: Arc<dyn HistoryRepo> = Arc::new(SqliteRepo::new(pool));

    repo.insert_trade(&trade_row(1_600_000_000, "buy", "2", "10000")).await.unwrap();
    repo.insert_trade(&trade_row(1_600_000_100, "sell", "1", "12000")).await.unwrap();

    let mut provider = MockPriceProvider::new();
    provider.set_current("BTC", "EUR", dec!(20000));
    provider.set_current("BTC", "USD", dec!(22000));
    let provider = Arc::new(provider);

    let mut sources: Vec<Arc<dyn BalanceSource>> = Vec::new();
    if let Some(path) = manual_csv {
        sources.push(Arc::new(ManualBalanceSource::new(path, provider.clone(), Asset::new("EUR"))));
    }

    let historian = Arc::new(TradesHistorian::new(Vec::new(), Some(repo.clone())));
    let report_service = Arc::new(ReportService::new(
        historian,
        provider,
        repo.clone(),
        AccountingSettings::default(),
    ));
    let history_service = Arc::new(HistoryService::new(repo.clone()));
    let state = AppState {
        balance_sources: Arc::new(sources),
        report_service,
        history_service: history_service.clone(),
    };

    TestApp {
        app: router(state),
        repo,
        history_service,
    }
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn num(v: &Value) -> FVal {
    fval_from_json(v).unwrap()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "{}_{}_{}",
        name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

#[tokio::test]
async fn test_report_endpoint_computes_and_persists() {
    let t = setup(None).await;

    let (status, json) = get_json(&t.app, "/api/report?start_ts=0&end_ts=1700000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&json["overview"]["general_trade_profit_loss"]), dec!(2000));
    assert_eq!(num(&json["overview"]["total_taxable_profit_loss"]), dec!(2000));
    assert_eq!(json["all_events"].as_array().unwrap().len(), 2);
    assert_eq!(json["profit_currency"], "EUR");

    let reports = t.repo.fetch_reports().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].end_ts, 1_700_000_000);
}

#[tokio::test]
async fn test_report_window_after_buy_still_uses_its_cost_basis() {
    let t = setup(None).await;
    let (status, json) = get_json(&t.app, "/api/report?start_ts=1600000050&end_ts=1700000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&json["overview"]["general_trade_profit_loss"]), dec!(2000));
    assert_eq!(json["all_events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_endpoint_limits_to_period() {
    let t = setup(None).await;
    let (status, json) = get_json(&t.app, "/api/history?start_ts=1600000050&end_ts=1700000000").await;
    assert_eq!(status, StatusCode::OK);
    let actions = json["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action_type"], "trade");
    assert_eq!(actions[0]["trade_type"], "sell");
    assert_eq!(json["error"], "");
}

#[tokio::test]
async fn test_inverted_period_is_rejected() {
    let t = setup(None).await;
    let (status, json) = get_json(&t.app, "/api/report?start_ts=10&end_ts=5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("invalid period"));
}

#[tokio::test]
async fn test_balances_endpoint_aggregates_and_snapshots() {
    let path = std::env::temp_dir().join(format!(
        "manual_balances_{}_{}.csv",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::write(&path, "asset,label,amount\nBTC,cold storage,0.5\n").unwrap();
    let t = setup(Some(path.to_string_lossy().to_string())).await;

    let (status, json) = get_json(&t.app, "/api/balances").await;
    std::fs::remove_file(&path).ok();
    assert_eq!(status, StatusCode::OK);
    let btc = &json["balances"]["assets"]["BTC"]["cold storage"];
    assert_eq!(num(&btc["amount"]), dec!(0.5));
    assert_eq!(num(&btc["value"]), dec!(10000));
    assert_eq!(num(&btc["usd_value"]), dec!(11000));
    assert_eq!(num(&json["net_value"]), dec!(10000));
    assert!(json["warnings"].as_array().unwrap().is_empty());

    let (_, sheet) = t.history_service.latest_balance_snapshot().await.unwrap().unwrap();
    assert_eq!(sheet.assets.get_or_zero(&Asset::new("BTC"), "cold storage").amount, dec!(0.5));
}

#[tokio::test]
async fn test_imported_asset_movement_fee_is_counted() {
    let t = setup(None).await;
    let path = temp_path("asset_movements.csv");
    std::fs::write(
        &path,
        "timestamp,location,category,asset,amount,fee\n1600000200,kraken,withdrawal,EUR,500,0.09\n",
    )
    .unwrap();
    let count = t
        .history_service
        .import_asset_movements_from_path(&path.to_string_lossy())
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(count, 1);

    let (status, json) = get_json(&t.app, "/api/report?start_ts=0&end_ts=1700000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(num(&json["overview"]["asset_movement_fees"]), dec!(0.09));
    assert_eq!(num(&json["overview"]["total_profit_loss"]), dec!(1999.91));
    let events = json["all_events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2]["event_type"], "asset_movement");
}

#[tokio::test]
async fn test_report_is_exported_as_csv() {
    let t = setup(None).await;
    let dir = temp_path("report_export");
    let historian = Arc::new(TradesHistorian::new(Vec::new(), Some(t.repo.clone())));
    let service = ReportService::new(
        historian,
        Arc::new(MockPriceProvider::new()),
        t.repo.clone(),
        AccountingSettings::default(),
    )
    .with_export_dir(Some(dir.clone()));

    service.compute_and_record(0, 1_700_000_000).await.unwrap();

    let events = std::fs::read_to_string(dir.join("all_events.csv")).unwrap();
    assert_eq!(events.lines().count(), 3);
    assert!(events.lines().nth(2).unwrap().starts_with("sell,kraken,"));
    let overview = std::fs::read_to_string(dir.join("overview.csv")).unwrap();
    let general = overview
        .lines()
        .find_map(|l| l.strip_prefix("general_trade_profit_loss,"))
        .unwrap();
    assert_eq!(crate::domain::fval::fval_from_str(general).unwrap(), dec!(2000));
    std::fs::remove_dir_all(&dir).ok();
}
