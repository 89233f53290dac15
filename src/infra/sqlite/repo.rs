use crate::domain::models::{AssetMovementRow, BalanceSnapshotRow, PnlReportRecord, TradeRow};
use crate::domain::repository::{HistoryRepo, RepoResult};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteRepo {
    pub pool: SqlitePool,
}

impl SqliteRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// Appends ` WHERE timestamp >= ? AND timestamp <= ?` for whichever bounds are set.
fn push_range(qb: &mut QueryBuilder<'_, Sqlite>, from: Option<i64>, to: Option<i64>) {
    if from.is_some() || to.is_some() {
        qb.push(" WHERE ");
        let mut first = true;
        if let Some(f) = from {
            qb.push("timestamp >= ");
            qb.push_bind(f);
            first = false;
        }
        if let Some(t) = to {
            if !first {
                qb.push(" AND ");
            }
            qb.push("timestamp <= ");
            qb.push_bind(t);
        }
    }
}

#[async_trait]
impl HistoryRepo for SqliteRepo {
    async fn insert_trade(&self, trade: &TradeRow) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO trades (timestamp, location, pair, trade_type, amount, rate, fee, fee_currency, link, notes)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(trade.timestamp)
        .bind(&trade.location)
        .bind(&trade.pair)
        .bind(&trade.trade_type)
        .bind(&trade.amount)
        .bind(&trade.rate)
        .bind(&trade.fee)
        .bind(&trade.fee_currency)
        .bind(&trade.link)
        .bind(&trade.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_trades(&self, from: Option<i64>, to: Option<i64>) -> RepoResult<Vec<TradeRow>> {
        let mut qb = QueryBuilder::new(
            "SELECT id, timestamp, location, pair, trade_type, amount, rate, fee, fee_currency, link, notes FROM trades",
        );
        push_range(&mut qb, from, to);
        qb.push(" ORDER BY timestamp ASC, id ASC");
        let rows = qb
            .build_query_as::<TradeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_asset_movement(&self, movement: &AssetMovementRow) -> RepoResult<()> {
        sqlx::query("INSERT OR IGNORE INTO asset_movements (location, category, timestamp, asset, amount, fee) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
            .bind(&movement.location)
            .bind(&movement.category)
            .bind(movement.timestamp)
            .bind(&movement.asset)
            .bind(&movement.amount)
            .bind(&movement.fee)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_asset_movements(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> RepoResult<Vec<AssetMovementRow>> {
        let mut qb = QueryBuilder::new(
            "SELECT id, location, category, timestamp, asset, amount, fee FROM asset_movements",
        );
        push_range(&mut qb, from, to);
        qb.push(" ORDER BY timestamp ASC, id ASC");
        let rows = qb
            .build_query_as::<AssetMovementRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_balance_snapshot(&self, rows: &[BalanceSnapshotRow]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query("INSERT OR REPLACE INTO balance_snapshots (timestamp, category, asset, label, amount, value, usd_value) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")
                .bind(row.timestamp)
                .bind(&row.category)
                .bind(&row.asset)
                .bind(&row.label)
                .bind(&row.amount)
                .bind(&row.value)
                .bind(&row.usd_value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_latest_balance_snapshot(&self) -> RepoResult<Vec<BalanceSnapshotRow>> {
        let rows = sqlx::query_as::<_, BalanceSnapshotRow>(
            "SELECT id, timestamp, category, asset, label, amount, value, usd_value FROM balance_snapshots
             WHERE timestamp = (SELECT MAX(timestamp) FROM balance_snapshots)
             ORDER BY category ASC, asset ASC, label ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn persist_report(&self, rec: &PnlReportRecord) -> RepoResult<()> {
        sqlx::query("INSERT INTO pnl_reports (computed_at, start_ts, end_ts, profit_currency, payload) VALUES (?1, ?2, ?3, ?4, ?5)")
            .bind(&rec.computed_at)
            .bind(rec.start_ts)
            .bind(rec.end_ts)
            .bind(&rec.profit_currency)
            .bind(&rec.payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_reports(&self) -> RepoResult<Vec<PnlReportRecord>> {
        let rows = sqlx::query_as::<_, PnlReportRecord>(
            "SELECT id, computed_at, start_ts, end_ts, profit_currency, payload FROM pnl_reports ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqliteRepo {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteRepo::new(pool)
    }

    fn trade_row(timestamp: i64, amount: &str) -> TradeRow {
        TradeRow {
            id: None,
            timestamp,
            location: "kraken".to_string(),
            pair: "BTC_EUR".to_string(),
            trade_type: "buy".to_string(),
            amount: amount.to_string(),
            rate: "9000.123456789".to_string(),
            fee: "0".to_string(),
            fee_currency: "EUR".to_string(),
            link: None,
            notes: Some("ledger".to_string()),
        }
    }

    #[tokio::test]
    async fn trades_are_filtered_by_range_and_deduplicated() {
        let repo = repo().await;
        repo.insert_trade(&trade_row(300, "0.1")).await.unwrap();
        repo.insert_trade(&trade_row(100, "0.000000000000000001")).await.unwrap();
        repo.insert_trade(&trade_row(200, "2")).await.unwrap();
        repo.insert_trade(&trade_row(200, "2")).await.unwrap();

        let all = repo.fetch_trades(None, None).await.unwrap();
        let ts: Vec<_> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![100, 200, 300]);
        assert_eq!(all[0].amount, "0.000000000000000001");
        assert_eq!(all[0].rate, "9000.123456789");

        let window = repo.fetch_trades(Some(150), Some(250)).await.unwrap();
        assert_eq!(window.len(), 1);
        let upto = repo.fetch_trades(None, Some(200)).await.unwrap();
        assert_eq!(upto.len(), 2);
    }

    #[tokio::test]
    async fn latest_balance_snapshot_only() {
        let repo = repo().await;
        let row = |timestamp: i64, amount: &str| BalanceSnapshotRow {
            id: None,
            timestamp,
            category: "asset".to_string(),
            asset: "BTC".to_string(),
            label: "ledger".to_string(),
            amount: amount.to_string(),
            value: "1".to_string(),
            usd_value: "1".to_string(),
        };
        repo.insert_balance_snapshot(&[row(10, "1")]).await.unwrap();
        repo.insert_balance_snapshot(&[row(20, "2")]).await.unwrap();

        let latest = repo.fetch_latest_balance_snapshot().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].amount, "2");
    }

    #[tokio::test]
    async fn reports_round_trip() {
        let repo = repo().await;
        repo.persist_report(&PnlReportRecord {
            id: None,
            computed_at: "2020-01-01T00:00:00+00:00".to_string(),
            start_ts: 0,
            end_ts: 10,
            profit_currency: "EUR".to_string(),
            payload: "{\"overview\":{}}".to_string(),
        })
        .await
        .unwrap();
        let reports = repo.fetch_reports().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].payload, "{\"overview\":{}}");
    }
}
