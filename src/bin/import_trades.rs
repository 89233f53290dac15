use anyhow::Result;
use dotenv::dotenv;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crypto_accounting::infra::sqlite::SqliteRepo;
use crypto_accounting::usecases::history_service::HistoryService;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/accounting.db".to_string());
    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // import_trades [--movements] <file.csv>
    let mut args: Vec<String> = env::args().skip(1).collect();
    let movements = args.first().is_some_and(|a| a == "--movements");
    if movements {
        args.remove(0);
    }
    let path = args
        .into_iter()
        .next()
        .unwrap_or_else(|| if movements { "asset_movements.csv" } else { "trades.csv" }.to_string());
    println!("Importing '{}' into {}", path, db_url);

    let service = HistoryService::new(Arc::new(SqliteRepo::new(pool)));
    if movements {
        let count = service
            .import_asset_movements_from_path(&path)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("Inserted {} asset movement rows", count);
    } else {
        let count = service
            .import_trades_from_path(&path)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("Inserted {} trade rows", count);
    }
    Ok(())
}
