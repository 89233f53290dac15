use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::asset::{Asset, AssetMovementCategory, Location, TradeType, pair_get_assets};
use crate::domain::fval::{FVal, Timestamp, fval_from_str};
use crate::errors::DeserializationError;

// Trade in the common history format. `pair` is "BASE_QUOTE"; `cost` is paid in `cost_currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: Timestamp,
    pub location: Location,
    pub pair: String,
    pub trade_type: TradeType,
    pub amount: FVal,
    pub rate: FVal,
    pub cost: FVal,
    pub cost_currency: Asset,
    pub fee: FVal,
    pub fee_currency: Asset,
    #[serde(default)]
    pub link: Option<String>,
}

impl Trade {
    pub fn assets(&self) -> Result<(Asset, Asset), DeserializationError> {
        pair_get_assets(&self.pair)
    }

    /// The side of the pair that is not `cost_currency`.
    pub fn other_asset(&self) -> Result<Asset, DeserializationError> {
        let (base, quote) = self.assets()?;
        if base == self.cost_currency {
            Ok(quote)
        } else if quote == self.cost_currency {
            Ok(base)
        } else {
            Err(DeserializationError::new(format!(
                "cost currency {} is not part of pair {}",
                self.cost_currency, self.pair
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginPosition {
    pub location: Location,
    pub open_time: Timestamp,
    pub close_time: Timestamp,
    pub profit_loss: FVal,
    pub pl_currency: Asset,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub location: Location,
    pub open_time: Timestamp,
    pub close_time: Timestamp,
    pub currency: Asset,
    pub fee: FVal,
    pub earned: FVal,
    pub amount_lent: FVal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMovement {
    pub location: Location,
    pub category: AssetMovementCategory,
    pub timestamp: Timestamp,
    pub asset: Asset,
    pub amount: FVal,
    pub fee: FVal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthereumTransaction {
    pub timestamp: Timestamp,
    pub block_number: u64,
    pub hash: String,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: FVal,
    pub gas: FVal,
    /// `None` when the source did not report it; the last seen price is used then.
    pub gas_price: Option<FVal>,
    pub gas_used: FVal,
}

// Persisted rows. Every decimal column is TEXT so no precision is lost in sqlite.

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRow {
    pub id: Option<i64>,
    pub timestamp: i64,
    pub location: String,
    pub pair: String,
    pub trade_type: String,
    pub amount: String,
    pub rate: String,
    pub fee: String,
    pub fee_currency: String,
    pub link: Option<String>,
    pub notes: Option<String>,
}

impl TryFrom<TradeRow> for Trade {
    type Error = DeserializationError;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        let (_, quote) = pair_get_assets(&row.pair)?;
        let amount = fval_from_str(&row.amount)?;
        let rate = fval_from_str(&row.rate)?;
        if row.timestamp < 0 {
            return Err(DeserializationError::new(format!(
                "negative timestamp {} in trade row",
                row.timestamp
            )));
        }
        let cost = amount.checked_mul(rate).ok_or_else(|| {
            DeserializationError::new(format!("trade cost {amount} * {rate} is out of range"))
        })?;
        Ok(Trade {
            timestamp: row.timestamp,
            location: row.location.parse()?,
            trade_type: row.trade_type.parse()?,
            amount,
            rate,
            cost,
            cost_currency: quote,
            fee: fval_from_str(&row.fee)?,
            fee_currency: Asset::new(row.fee_currency),
            pair: row.pair,
            link: row.link,
        })
    }
}

impl From<&Trade> for TradeRow {
    fn from(trade: &Trade) -> Self {
        TradeRow {
            id: None,
            timestamp: trade.timestamp,
            location: trade.location.to_string(),
            pair: trade.pair.clone(),
            trade_type: trade.trade_type.to_string(),
            amount: trade.amount.to_string(),
            rate: trade.rate.to_string(),
            fee: trade.fee.to_string(),
            fee_currency: trade.fee_currency.to_string(),
            link: trade.link.clone(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssetMovementRow {
    pub id: Option<i64>,
    pub location: String,
    pub category: String,
    pub timestamp: i64,
    pub asset: String,
    pub amount: String,
    pub fee: String,
}

impl TryFrom<AssetMovementRow> for AssetMovement {
    type Error = DeserializationError;

    fn try_from(row: AssetMovementRow) -> Result<Self, Self::Error> {
        if row.timestamp < 0 {
            return Err(DeserializationError::new(format!(
                "negative timestamp {} in asset movement row",
                row.timestamp
            )));
        }
        Ok(AssetMovement {
            location: row.location.parse()?,
            category: row.category.parse()?,
            timestamp: row.timestamp,
            asset: Asset::new(row.asset),
            amount: fval_from_str(&row.amount)?,
            fee: fval_from_str(&row.fee)?,
        })
    }
}

// One serialized leaf of a balance sheet (balance_snapshots)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceSnapshotRow {
    pub id: Option<i64>,
    pub timestamp: i64,
    pub category: String,
    pub asset: String,
    pub label: String,
    pub amount: String,
    pub value: String,
    pub usd_value: String,
}

// Persisted profit/loss report (pnl_reports)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PnlReportRecord {
    pub id: Option<i64>,
    pub computed_at: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub profit_currency: String,
    /// Report serialized as JSON text.
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(amount: &str, location: &str) -> TradeRow {
        TradeRow {
            id: Some(1),
            timestamp: 1500000000,
            location: location.to_string(),
            pair: "BTC_EUR".to_string(),
            trade_type: "buy".to_string(),
            amount: amount.to_string(),
            rate: "2000.5".to_string(),
            fee: "0.1".to_string(),
            fee_currency: "EUR".to_string(),
            link: None,
            notes: None,
        }
    }

    #[test]
    fn test_trade_from_row() {
        let trade = Trade::try_from(row("2", "kraken")).unwrap();
        assert_eq!(trade.cost, dec!(4001));
        assert_eq!(trade.cost_currency, Asset::new("EUR"));
        assert_eq!(trade.other_asset().unwrap(), Asset::new("BTC"));
        assert_eq!(trade.location, Location::Kraken);

        let back = TradeRow::from(&trade);
        assert_eq!(back.amount, "2");
        assert_eq!(back.trade_type, "buy");
    }

    #[test]
    fn test_malformed_trade_rows_fail() {
        assert!(Trade::try_from(row("two", "kraken")).is_err());
        assert!(Trade::try_from(row("2", "nowhere")).is_err());
        let mut bad_ts = row("2", "kraken");
        bad_ts.timestamp = -5;
        assert!(Trade::try_from(bad_ts).is_err());
    }

    #[test]
    fn test_trade_row_with_overflowing_cost_fails() {
        let mut huge = row("100000000000000000000", "kraken");
        huge.pair = "SHIB_EUR".to_string();
        huge.rate = "10000000000".to_string();
        let err = Trade::try_from(huge).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_asset_movement_from_row() {
        let row = AssetMovementRow {
            id: None,
            location: "kraken".to_string(),
            category: "withdrawal".to_string(),
            timestamp: 1500000000,
            asset: "EUR".to_string(),
            amount: "500".to_string(),
            fee: "0.09".to_string(),
        };
        let movement = AssetMovement::try_from(row.clone()).unwrap();
        assert_eq!(movement.category, AssetMovementCategory::Withdrawal);
        assert_eq!(movement.fee, dec!(0.09));

        let bad = AssetMovementRow {
            category: "airdrop".to_string(),
            ..row
        };
        assert!(AssetMovement::try_from(bad).is_err());
    }
}
