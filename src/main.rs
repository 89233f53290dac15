use axum::Router;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crypto_accounting::api::{AppState, router};
use crypto_accounting::api_client::{CryptoCompareProvider, PriceProvider};
use crypto_accounting::balances::{BalanceSource, ManualBalanceSource};
use crypto_accounting::config::Settings;
use crypto_accounting::domain::repository::HistoryRepo;
use crypto_accounting::history::historian::TradesHistorian;
use crypto_accounting::infra::sqlite::SqliteRepo;
use crypto_accounting::usecases::history_service::HistoryService;
use crypto_accounting::usecases::report_service::ReportService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = SqliteConnectOptions::from_str(&settings.database_url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let repo: Arc<dyn HistoryRepo> = Arc::new(SqliteRepo::new(pool));

    let provider: Arc<dyn PriceProvider> = Arc::new(CryptoCompareProvider::new(settings.price_api_key.clone()));

    let mut balance_sources: Vec<Arc<dyn BalanceSource>> = Vec::new();
    if let Some(path) = &settings.manual_balances_csv {
        balance_sources.push(Arc::new(ManualBalanceSource::new(
            path.clone(),
            provider.clone(),
            settings.accounting.profit_currency.clone(),
        )));
    }

    // Exchange connectors register here; imported trades come from the database.
    let historian = Arc::new(TradesHistorian::new(Vec::new(), Some(repo.clone())));
    let report_service = Arc::new(
        ReportService::new(historian, provider, repo.clone(), settings.accounting.clone())
            .with_export_dir(settings.report_export_dir.as_ref().map(PathBuf::from)),
    );

    let state = AppState {
        balance_sources: Arc::new(balance_sources),
        report_service,
        history_service: Arc::new(HistoryService::new(repo)),
    };

    info!(
        profit_currency = %settings.accounting.profit_currency,
        taxfree_after_period = ?settings.accounting.taxfree_after_period,
        "Starting accounting server",
    );
    serve(router(state), settings.port).await;
    Ok(())
}

async fn serve(app: Router, port: u16) {
    // Try to bind to the requested port; if it's in use, try a few subsequent ports.
    let max_attempts = 10;
    for offset in 0..max_attempts {
        let try_port = port + offset;
        let addr = SocketAddr::from(([127, 0, 0, 1], try_port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(%addr, "Listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "Server failed while serving");
                }
                return;
            }
            Err(e) => {
                warn!(port = try_port, error = %e, "Port unavailable, trying next");
            }
        }
    }
    error!("Failed to bind to any port in range {}..{}", port, port + max_attempts - 1);
}
