use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use crate::api_client::PriceProvider;
use crate::domain::asset::Asset;
use crate::domain::fval::{FVal, ONE, Timestamp};
use crate::errors::PriceError;
use crate::history::HistoryAction;

/// Historical price source the accounting core reads from. Synchronous: every
/// price a run needs is fetched before the run starts.
pub trait PriceLookup: Send + Sync {
    fn query_historical_price(
        &self,
        from_asset: &Asset,
        to_asset: &Asset,
        timestamp: Timestamp,
    ) -> Result<FVal, PriceError>;
}

#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    prices: HashMap<(Asset, Asset, Timestamp), FVal>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from_asset: Asset, to_asset: Asset, timestamp: Timestamp, price: FVal) {
        self.prices.insert((from_asset, to_asset, timestamp), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Fetches the price in `profit_currency` of every asset touched by `actions`
    /// at the time it was touched. Failures are logged and left out; the
    /// accountant reports them when it misses the price.
    pub async fn prefetch(
        &mut self,
        provider: &dyn PriceProvider,
        actions: &[HistoryAction],
        profit_currency: &Asset,
    ) {
        let mut needed: BTreeSet<(Asset, Timestamp)> = BTreeSet::new();
        for action in actions {
            let ts = action.timestamp();
            for asset in action.assets() {
                needed.insert((asset, ts));
            }
        }
        needed.retain(|(asset, ts)| {
            asset != profit_currency
                && !self
                    .prices
                    .contains_key(&(asset.clone(), profit_currency.clone(), *ts))
        });

        info!(count = needed.len(), currency = %profit_currency, "Prefetching historical prices");
        for (asset, ts) in needed {
            match provider.historical_price(&asset, profit_currency, ts).await {
                Ok(price) => self.insert(asset, profit_currency.clone(), ts, price),
                Err(e) => warn!(asset = %asset, timestamp = ts, error = %e, "Price prefetch failed"),
            }
        }
    }
}

impl PriceLookup for PriceCache {
    fn query_historical_price(
        &self,
        from_asset: &Asset,
        to_asset: &Asset,
        timestamp: Timestamp,
    ) -> Result<FVal, PriceError> {
        if from_asset == to_asset {
            return Ok(ONE);
        }
        if let Some(price) = self
            .prices
            .get(&(from_asset.clone(), to_asset.clone(), timestamp))
        {
            return Ok(*price);
        }
        match self
            .prices
            .get(&(to_asset.clone(), from_asset.clone(), timestamp))
        {
            Some(inverse) if !inverse.is_zero() => Ok(ONE / *inverse),
            _ => Err(PriceError::NoPriceForGivenTimestamp {
                from: from_asset.to_string(),
                to: to_asset.to_string(),
                timestamp,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockPriceProvider;
    use crate::domain::asset::{Location, TradeType};
    use crate::domain::models::Trade;
    use rust_decimal_macros::dec;

    #[test]
    fn test_same_asset_and_inverse_lookup() {
        let mut cache = PriceCache::new();
        let eur = Asset::new("EUR");
        let btc = Asset::new("BTC");
        assert_eq!(cache.query_historical_price(&eur, &eur, 5).unwrap(), ONE);
        assert!(cache.query_historical_price(&btc, &eur, 5).is_err());

        cache.insert(btc.clone(), eur.clone(), 5, dec!(4));
        assert_eq!(cache.query_historical_price(&btc, &eur, 5).unwrap(), dec!(4));
        assert_eq!(cache.query_historical_price(&eur, &btc, 5).unwrap(), dec!(0.25));
    }

    #[tokio::test]
    async fn test_prefetch_collects_trade_assets() {
        let mut provider = MockPriceProvider::new();
        provider.set_historical("ETH", "EUR", dec!(10));
        provider.set_historical("BTC", "EUR", dec!(1000));
        let actions = vec![HistoryAction::Trade(Trade {
            timestamp: 1446979735,
            location: Location::Kraken,
            pair: "ETH_EUR".to_string(),
            trade_type: TradeType::Buy,
            amount: dec!(1),
            rate: dec!(10),
            cost: dec!(10),
            cost_currency: Asset::new("EUR"),
            fee: dec!(0),
            fee_currency: Asset::new("EUR"),
            link: None,
        })];

        let mut cache = PriceCache::new();
        cache.prefetch(&provider, &actions, &Asset::new("EUR")).await;
        // EUR is the profit currency and is never fetched
        assert_eq!(cache.len(), 1);
        let eth = cache
            .query_historical_price(&Asset::new("ETH"), &Asset::new("EUR"), 1446979735)
            .unwrap();
        assert_eq!(eth, dec!(10));
    }
}
