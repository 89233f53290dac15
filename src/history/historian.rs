use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::domain::fval::Timestamp;
use crate::domain::models::{AssetMovement, Trade};
use crate::domain::repository::HistoryRepo;
use crate::errors::RemoteError;
use crate::history::{HistoryAction, sort_by_timestamp};

/// An exchange or chain that can report its past actions.
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn name(&self) -> &str;

    async fn query_history(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Result<Vec<HistoryAction>, RemoteError>;
}

#[derive(Debug, Clone, Default)]
pub struct HistoryResult {
    /// Every action found, ascending by timestamp.
    pub actions: Vec<HistoryAction>,
    /// Newline-joined source failures. Empty when every source answered.
    pub error: String,
}

pub struct TradesHistorian {
    sources: Vec<Arc<dyn HistorySource>>,
    repo: Option<Arc<dyn HistoryRepo>>,
}

impl TradesHistorian {
    pub fn new(sources: Vec<Arc<dyn HistorySource>>, repo: Option<Arc<dyn HistoryRepo>>) -> Self {
        Self { sources, repo }
    }

    /// Collects all history up to `end_ts`.
    ///
    /// Sources are always queried from the beginning of time, since the cost
    /// basis of a sell inside a window depends on buys made before it.
    pub async fn create_history(&self, end_ts: Timestamp) -> HistoryResult {
        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            set.spawn(async move {
                let name = source.name().to_string();
                (idx, name, source.query_history(0, end_ts).await)
            });
        }

        // Slotted by source so equal timestamps keep the configured source order,
        // whatever order the queries finish in.
        let mut per_source: Vec<Vec<HistoryAction>> = vec![Vec::new(); self.sources.len()];
        let mut failures: Vec<(usize, String)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, name, Ok(found))) => {
                    info!(source = %name, count = found.len(), "History source answered");
                    per_source[idx] = found;
                }
                Ok((idx, _, Err(e))) => {
                    warn!(error = %e, "History source failed");
                    failures.push((idx, e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "History task panicked");
                    failures.push((usize::MAX, e.to_string()));
                }
            }
        }
        failures.sort_by_key(|(idx, _)| *idx);
        let mut errors: Vec<String> = failures.into_iter().map(|(_, e)| e).collect();
        let mut actions: Vec<HistoryAction> = per_source.into_iter().flatten().collect();

        if let Some(repo) = &self.repo {
            match self.external_actions(repo.as_ref(), end_ts).await {
                Ok(found) => actions.extend(found),
                Err(e) => errors.push(e.to_string()),
            }
        }

        sort_by_timestamp(&mut actions);
        HistoryResult {
            actions,
            error: errors.join("\n"),
        }
    }

    // Imported trades and asset movements. Rows that no longer deserialize are skipped.
    async fn external_actions(
        &self,
        repo: &dyn HistoryRepo,
        end_ts: Timestamp,
    ) -> Result<Vec<HistoryAction>, RemoteError> {
        let trade_rows = repo
            .fetch_trades(None, Some(end_ts))
            .await
            .map_err(|e| RemoteError::new("database", e))?;
        let movement_rows = repo
            .fetch_asset_movements(None, Some(end_ts))
            .await
            .map_err(|e| RemoteError::new("database", e))?;

        let mut actions = Vec::with_capacity(trade_rows.len() + movement_rows.len());
        for row in trade_rows {
            let id = row.id;
            match Trade::try_from(row) {
                Ok(trade) => actions.push(HistoryAction::Trade(trade)),
                Err(e) => warn!(id = ?id, error = %e, "Skipping external trade"),
            }
        }
        for row in movement_rows {
            let id = row.id;
            match AssetMovement::try_from(row) {
                Ok(movement) => actions.push(HistoryAction::AssetMovement(movement)),
                Err(e) => warn!(id = ?id, error = %e, "Skipping asset movement"),
            }
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::{Asset, AssetMovementCategory, Location};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedSource {
        name: String,
        timestamps: Vec<Timestamp>,
        asked: Mutex<Vec<(Timestamp, Timestamp)>>,
    }

    #[async_trait]
    impl HistorySource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn query_history(
            &self,
            start_ts: Timestamp,
            end_ts: Timestamp,
        ) -> Result<Vec<HistoryAction>, RemoteError> {
            self.asked.lock().unwrap().push((start_ts, end_ts));
            Ok(self
                .timestamps
                .iter()
                .map(|ts| {
                    HistoryAction::AssetMovement(AssetMovement {
                        location: Location::Kraken,
                        category: AssetMovementCategory::Deposit,
                        timestamp: *ts,
                        asset: Asset::new("BTC"),
                        amount: dec!(1),
                        fee: dec!(0),
                    })
                })
                .collect())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl HistorySource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn query_history(&self, _: Timestamp, _: Timestamp) -> Result<Vec<HistoryAction>, RemoteError> {
            Err(RemoteError::new("broken", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_create_history_merges_sorts_and_collects_errors() {
        let first = Arc::new(FixedSource {
            name: "first".into(),
            timestamps: vec![30, 10],
            asked: Mutex::new(Vec::new()),
        });
        let second = Arc::new(FixedSource {
            name: "second".into(),
            timestamps: vec![20],
            asked: Mutex::new(Vec::new()),
        });
        let historian = TradesHistorian::new(
            vec![first.clone(), second.clone(), Arc::new(BrokenSource)],
            None,
        );

        let result = historian.create_history(100).await;
        let ts: Vec<_> = result.actions.iter().map(HistoryAction::timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert_eq!(result.error, "broken: connection refused");
        assert_eq!(*first.asked.lock().unwrap(), vec![(0, 100)]);
    }

    struct DelayedSource {
        delay_ms: u64,
        category: AssetMovementCategory,
    }

    #[async_trait]
    impl HistorySource for DelayedSource {
        fn name(&self) -> &str {
            self.category.as_str()
        }

        async fn query_history(&self, _: Timestamp, _: Timestamp) -> Result<Vec<HistoryAction>, RemoteError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(vec![HistoryAction::AssetMovement(AssetMovement {
                location: Location::Kraken,
                category: self.category,
                timestamp: 50,
                asset: Asset::new("BTC"),
                amount: dec!(1),
                fee: dec!(0),
            })])
        }
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_source_order_regardless_of_latency() {
        let slow_first: Arc<dyn HistorySource> = Arc::new(DelayedSource {
            delay_ms: 50,
            category: AssetMovementCategory::Deposit,
        });
        let fast_second: Arc<dyn HistorySource> = Arc::new(DelayedSource {
            delay_ms: 0,
            category: AssetMovementCategory::Withdrawal,
        });
        let historian = TradesHistorian::new(vec![slow_first, fast_second], None);

        let result = historian.create_history(100).await;
        let categories: Vec<_> = result
            .actions
            .iter()
            .map(|a| match a {
                HistoryAction::AssetMovement(m) => m.category,
                other => panic!("unexpected action {other:?}"),
            })
            .collect();
        assert_eq!(
            categories,
            vec![AssetMovementCategory::Deposit, AssetMovementCategory::Withdrawal]
        );
        assert!(result.error.is_empty());
    }
}
