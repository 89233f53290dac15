//! Balance sources and their concurrent aggregation into one sheet.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::accounting::MessagesAggregator;
use crate::api_client::PriceProvider;
use crate::csv_store::{FileCsvStore, ImportStore};
use crate::domain::asset::Asset;
use crate::domain::balance::{Balance, BalanceSheet};
use crate::errors::RemoteError;

/// Anything holding balances: an exchange account, a chain address, a manual list.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn query_balances(&self) -> Result<BalanceSheet, RemoteError>;
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedBalances {
    pub sheet: BalanceSheet,
    /// Sources that answered, by name.
    pub per_source: BTreeMap<String, BalanceSheet>,
    pub messages: MessagesAggregator,
}

/// Queries every source concurrently and merges the answers into one sheet.
/// A failing source contributes nothing and leaves a warning.
pub async fn aggregate_balances(sources: &[Arc<dyn BalanceSource>]) -> AggregatedBalances {
    let mut set = JoinSet::new();
    for source in sources {
        let source = Arc::clone(source);
        set.spawn(async move {
            let name = source.name().to_string();
            (name, source.query_balances().await)
        });
    }

    let mut out = AggregatedBalances::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(sheet))) => {
                info!(source = %name, net_value = %sheet.net_value(), "Balance source answered");
                out.sheet += &sheet;
                out.per_source.insert(name, sheet);
            }
            Ok((name, Err(e))) => {
                warn!(source = %name, error = %e, "Balance source failed");
                out.messages
                    .add_warning(format!("Could not query balances of {name}: {}", e.message));
            }
            Err(e) => {
                out.messages
                    .add_error(format!("Balance query task failed: {e}"));
            }
        }
    }
    out
}

/// Balances listed by hand in a CSV file, valued at current prices.
pub struct ManualBalanceSource {
    path: String,
    provider: Arc<dyn PriceProvider>,
    profit_currency: Asset,
}

impl ManualBalanceSource {
    pub fn new(path: impl Into<String>, provider: Arc<dyn PriceProvider>, profit_currency: Asset) -> Self {
        Self {
            path: path.into(),
            provider,
            profit_currency,
        }
    }
}

#[async_trait]
impl BalanceSource for ManualBalanceSource {
    fn name(&self) -> &str {
        "manual"
    }

    async fn query_balances(&self) -> Result<BalanceSheet, RemoteError> {
        let entries = FileCsvStore
            .read_manual_balances(&self.path)
            .map_err(|e| RemoteError::new(self.name(), e))?;

        let usd = Asset::new("USD");
        let mut sheet = BalanceSheet::new();
        for entry in entries {
            let price = self
                .provider
                .current_price(&entry.asset, &self.profit_currency)
                .await
                .map_err(|e| RemoteError::new(self.name(), e))?;
            let usd_price = self
                .provider
                .current_price(&entry.asset, &usd)
                .await
                .map_err(|e| RemoteError::new(self.name(), e))?;
            let balance = Balance::with_usd_value(entry.amount, entry.amount * price, entry.amount * usd_price);
            sheet
                .side_mut(entry.balance_type)
                .add_balance(entry.asset, entry.label, balance);
        }
        Ok(sheet)
    }
}
