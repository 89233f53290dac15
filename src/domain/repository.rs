use crate::domain::models::{AssetMovementRow, BalanceSnapshotRow, PnlReportRecord, TradeRow};
use async_trait::async_trait;

pub type RepoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait HistoryRepo: Send + Sync {
    // External trades, i.e. the ones imported or added by hand
    async fn insert_trade(&self, trade: &TradeRow) -> RepoResult<()>;
    async fn fetch_trades(&self, from: Option<i64>, to: Option<i64>) -> RepoResult<Vec<TradeRow>>;

    async fn insert_asset_movement(&self, movement: &AssetMovementRow) -> RepoResult<()>;
    async fn fetch_asset_movements(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> RepoResult<Vec<AssetMovementRow>>;

    // Serialized leaves of a balance sheet taken at one refresh
    async fn insert_balance_snapshot(&self, rows: &[BalanceSnapshotRow]) -> RepoResult<()>;
    async fn fetch_latest_balance_snapshot(&self) -> RepoResult<Vec<BalanceSnapshotRow>>;

    async fn persist_report(&self, rec: &PnlReportRecord) -> RepoResult<()>;
    async fn fetch_reports(&self) -> RepoResult<Vec<PnlReportRecord>>;
}
