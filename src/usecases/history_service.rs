use crate::csv_store::{FileCsvStore, ImportStore};
use crate::domain::asset::{Asset, BalanceType};
use crate::domain::balance::{Balance, BalanceSheet};
use crate::domain::fval::{Timestamp, fval_from_str};
use crate::domain::models::BalanceSnapshotRow;
use crate::domain::repository::{HistoryRepo, RepoResult};
use std::sync::Arc;

pub struct HistoryService {
    pub repo: Arc<dyn HistoryRepo>,
}

impl HistoryService {
    pub fn new(repo: Arc<dyn HistoryRepo>) -> Self {
        Self { repo }
    }

    /// Stores every leaf of `sheet` under one timestamp.
    pub async fn persist_balance_snapshot(&self, ts: Timestamp, sheet: &BalanceSheet) -> RepoResult<usize> {
        let mut rows = Vec::new();
        for balance_type in [BalanceType::Asset, BalanceType::Liability] {
            for (asset, label, balance) in sheet.side(balance_type).iter() {
                rows.push(BalanceSnapshotRow {
                    id: None,
                    timestamp: ts,
                    category: balance_type.to_string(),
                    asset: asset.to_string(),
                    label: label.clone(),
                    amount: balance.amount.to_string(),
                    value: balance.value.to_string(),
                    usd_value: balance.usd_value.to_string(),
                });
            }
        }
        self.repo.insert_balance_snapshot(&rows).await?;
        Ok(rows.len())
    }

    /// The most recent snapshot as a sheet. Rows that fail to parse are skipped.
    pub async fn latest_balance_snapshot(&self) -> RepoResult<Option<(Timestamp, BalanceSheet)>> {
        let rows = self.repo.fetch_latest_balance_snapshot().await?;
        let Some(ts) = rows.first().map(|r| r.timestamp) else {
            return Ok(None);
        };

        let mut sheet = BalanceSheet::new();
        for row in rows {
            let parsed = (|| -> Result<(BalanceType, Balance), crate::errors::DeserializationError> {
                let category: BalanceType = row.category.parse()?;
                let balance = Balance::with_usd_value(
                    fval_from_str(&row.amount)?,
                    fval_from_str(&row.value)?,
                    fval_from_str(&row.usd_value)?,
                );
                Ok((category, balance))
            })();
            match parsed {
                Ok((category, balance)) => {
                    sheet
                        .side_mut(category)
                        .add_balance(Asset::new(row.asset), row.label, balance);
                }
                Err(e) => {
                    tracing::warn!(error = %e, asset = %row.asset, "Skipping balance snapshot row");
                }
            }
        }
        Ok(Some((ts, sheet)))
    }

    pub async fn import_trades_from_path(&self, path: &str) -> RepoResult<usize> {
        let rows = FileCsvStore.read_trades(path)?;
        let mut count = 0usize;
        for row in &rows {
            self.repo.insert_trade(row).await?;
            count += 1;
        }
        tracing::info!(path = %path, count, "Imported trades");
        Ok(count)
    }

    pub async fn import_asset_movements_from_path(&self, path: &str) -> RepoResult<usize> {
        let rows = FileCsvStore.read_asset_movements(path)?;
        for row in &rows {
            self.repo.insert_asset_movement(row).await?;
        }
        tracing::info!(path = %path, count = rows.len(), "Imported asset movements");
        Ok(rows.len())
    }
}
