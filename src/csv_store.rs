use csv::ReaderBuilder;
use serde::Deserialize;
use std::error::Error;
use std::fs::File;
use std::io::Read;
use tracing::warn;

use crate::domain::asset::{Asset, BalanceType};
use crate::domain::fval::{FVal, fval_from_str};
use crate::domain::models::{AssetMovement, AssetMovementRow, Trade, TradeRow};

#[derive(Debug, Deserialize)]
struct TradeCsv {
    timestamp: i64,
    location: String,
    pair: String,
    trade_type: String,
    amount: String,
    rate: String,
    #[serde(default)]
    fee: Option<String>,
    #[serde(default)]
    fee_currency: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetMovementCsv {
    timestamp: i64,
    location: String,
    category: String,
    asset: String,
    amount: String,
    #[serde(default)]
    fee: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ManualBalanceCsv {
    asset: String,
    label: String,
    amount: String,
    #[serde(default)]
    balance_type: Option<String>,
}

/// A balance the user tracks by hand, e.g. coins in cold storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualBalance {
    pub asset: Asset,
    pub label: String,
    pub amount: FVal,
    pub balance_type: BalanceType,
}

pub trait ImportStore {
    fn read_trades(&self, path: &str) -> Result<Vec<TradeRow>, Box<dyn Error + Send + Sync>>;
    fn read_asset_movements(&self, path: &str) -> Result<Vec<AssetMovementRow>, Box<dyn Error + Send + Sync>>;
    fn read_manual_balances(&self, path: &str) -> Result<Vec<ManualBalance>, Box<dyn Error + Send + Sync>>;
}

pub struct FileCsvStore;

impl ImportStore for FileCsvStore {
    fn read_trades(&self, path: &str) -> Result<Vec<TradeRow>, Box<dyn Error + Send + Sync>> {
        read_trades_from(File::open(path)?)
    }

    fn read_asset_movements(&self, path: &str) -> Result<Vec<AssetMovementRow>, Box<dyn Error + Send + Sync>> {
        read_asset_movements_from(File::open(path)?)
    }

    fn read_manual_balances(&self, path: &str) -> Result<Vec<ManualBalance>, Box<dyn Error + Send + Sync>> {
        read_manual_balances_from(File::open(path)?)
    }
}

/// Reads external trades. Rows that do not form a valid trade are skipped.
pub fn read_trades_from<R: Read>(reader: R) -> Result<Vec<TradeRow>, Box<dyn Error + Send + Sync>> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize::<TradeCsv>().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping unreadable trade row");
                continue;
            }
        };
        let fee_currency = match record.fee_currency.filter(|c| !c.is_empty()) {
            Some(c) => c,
            // fee defaults to the quote currency
            None => record.pair.rsplit('_').next().unwrap_or_default().to_string(),
        };
        let row = TradeRow {
            id: None,
            timestamp: record.timestamp,
            location: record.location.to_lowercase(),
            pair: record.pair.to_uppercase(),
            trade_type: record.trade_type.to_lowercase(),
            amount: record.amount,
            rate: record.rate,
            fee: record.fee.filter(|f| !f.is_empty()).unwrap_or_else(|| "0".to_string()),
            fee_currency: fee_currency.to_uppercase(),
            link: record.link.filter(|l| !l.is_empty()),
            notes: record.notes.filter(|n| !n.is_empty()),
        };
        // validate before accepting
        if let Err(e) = Trade::try_from(row.clone()) {
            warn!(line = line + 2, error = %e, "Skipping invalid trade row");
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Reads deposits and withdrawals. Invalid rows are skipped like trades.
pub fn read_asset_movements_from<R: Read>(reader: R) -> Result<Vec<AssetMovementRow>, Box<dyn Error + Send + Sync>> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize::<AssetMovementCsv>().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping unreadable asset movement row");
                continue;
            }
        };
        let row = AssetMovementRow {
            id: None,
            location: record.location.to_lowercase(),
            category: record.category.to_lowercase(),
            timestamp: record.timestamp,
            asset: record.asset.to_uppercase(),
            amount: record.amount,
            fee: record.fee.filter(|f| !f.is_empty()).unwrap_or_else(|| "0".to_string()),
        };
        if let Err(e) = AssetMovement::try_from(row.clone()) {
            warn!(line = line + 2, error = %e, "Skipping invalid asset movement row");
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_manual_balances_from<R: Read>(reader: R) -> Result<Vec<ManualBalance>, Box<dyn Error + Send + Sync>> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut balances = Vec::new();
    for result in rdr.deserialize() {
        let record: ManualBalanceCsv = result?;
        let balance_type = match record.balance_type.as_deref() {
            None | Some("") => BalanceType::Asset,
            Some(s) => s.to_lowercase().parse()?,
        };
        balances.push(ManualBalance {
            asset: Asset::new(record.asset.to_uppercase()),
            label: record.label,
            amount: fval_from_str(&record.amount)?,
            balance_type,
        });
    }
    Ok(balances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_read_trades_skips_invalid_rows() {
        let csv = "\
timestamp,location,pair,trade_type,amount,rate,fee,fee_currency,link,notes
1500000000,Kraken,btc_eur,buy,1.5,2000,0.1,EUR,,first
1500000100,kraken,BTCEUR,buy,1,2000,,,,
1500000200,nowhere,BTC_EUR,sell,1,2100,,,,
1500000300,binance,ETH_BTC,sell,2,0.05,,,,
";
        let rows = read_trades_from(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pair, "BTC_EUR");
        assert_eq!(rows[0].location, "kraken");
        assert_eq!(rows[0].notes.as_deref(), Some("first"));
        assert_eq!(rows[1].fee, "0");
        assert_eq!(rows[1].fee_currency, "BTC");
    }

    #[test]
    fn test_read_trades_skips_out_of_range_cost() {
        let csv = "\
timestamp,location,pair,trade_type,amount,rate
1500000000,kraken,SHIB_EUR,buy,100000000000000000000,10000000000
1500000100,kraken,SHIB_EUR,buy,1000000,0.00001
";
        let rows = read_trades_from(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, "1000000");
    }

    #[test]
    fn test_read_asset_movements() {
        let csv = "\
timestamp,location,category,asset,amount,fee
1500000000,Kraken,Withdrawal,eur,500,0.09
1500000100,kraken,deposit,BTC,1,
1500000200,kraken,airdrop,BTC,1,
1500000300,kraken,deposit,BTC,lots,
";
        let rows = read_asset_movements_from(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].location, "kraken");
        assert_eq!(rows[0].category, "withdrawal");
        assert_eq!(rows[0].asset, "EUR");
        assert_eq!(rows[1].fee, "0");
    }

    #[test]
    fn test_read_manual_balances() {
        let csv = "\
asset,label,amount,balance_type
btc,cold storage,0.5,
EUR,credit card,1200,liability
";
        let balances = read_manual_balances_from(csv.as_bytes()).unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].asset, Asset::new("BTC"));
        assert_eq!(balances[0].amount, dec!(0.5));
        assert_eq!(balances[0].balance_type, BalanceType::Asset);
        assert_eq!(balances[1].balance_type, BalanceType::Liability);
    }

    #[test]
    fn test_bad_manual_amount_fails() {
        let csv = "asset,label,amount\nBTC,ledger,lots\n";
        assert!(read_manual_balances_from(csv.as_bytes()).is_err());
    }
}
