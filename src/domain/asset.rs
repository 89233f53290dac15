use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::errors::DeserializationError;

pub const FIAT_CURRENCIES: [&str; 5] = ["EUR", "USD", "GBP", "JPY", "CNY"];

/// Identifier of a fungible unit of value. Compared by identity only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn identifier(&self) -> &str {
        &self.0
    }

    pub fn is_fiat(&self) -> bool {
        FIAT_CURRENCIES.contains(&self.0.as_str())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Implements the wire-string mapping for a plain enum from one static table.
macro_rules! wire_enum {
    ($name:ident, $table:ident, $lookup:ident, [$(($variant:ident, $wire:literal)),+ $(,)?]) => {
        static $table: &[($name, &str)] = &[$(($name::$variant, $wire)),+];
        static $lookup: Lazy<HashMap<&'static str, $name>> =
            Lazy::new(|| $table.iter().map(|(v, s)| (*s, *v)).collect());

        impl $name {
            pub fn as_str(&self) -> &'static str {
                $table
                    .iter()
                    .find(|(v, _)| v == self)
                    .map(|(_, s)| *s)
                    .unwrap_or("unknown")
            }
        }

        impl std::str::FromStr for $name {
            type Err = DeserializationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $lookup.get(s).copied().ok_or_else(|| {
                    DeserializationError::new(format!(
                        "failed to deserialize {} from \"{}\"",
                        stringify!($name),
                        s
                    ))
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse::<$name>().map_err(serde::de::Error::custom)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    External,
    Kraken,
    Poloniex,
    Bittrex,
    Binance,
    Bitmex,
    Coinbase,
    Blockchain,
}

wire_enum!(
    Location,
    LOCATION_TABLE,
    LOCATION_LOOKUP,
    [
        (External, "external"),
        (Kraken, "kraken"),
        (Poloniex, "poloniex"),
        (Bittrex, "bittrex"),
        (Binance, "binance"),
        (Bitmex, "bitmex"),
        (Coinbase, "coinbase"),
        (Blockchain, "blockchain"),
    ]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeType {
    Buy,
    Sell,
    SettlementBuy,
    SettlementSell,
}

wire_enum!(
    TradeType,
    TRADE_TYPE_TABLE,
    TRADE_TYPE_LOOKUP,
    [
        (Buy, "buy"),
        (Sell, "sell"),
        (SettlementBuy, "settlement_buy"),
        (SettlementSell, "settlement_sell"),
    ]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceType {
    Asset,
    Liability,
}

wire_enum!(
    BalanceType,
    BALANCE_TYPE_TABLE,
    BALANCE_TYPE_LOOKUP,
    [(Asset, "asset"), (Liability, "liability")]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetMovementCategory {
    Deposit,
    Withdrawal,
}

wire_enum!(
    AssetMovementCategory,
    MOVEMENT_CATEGORY_TABLE,
    MOVEMENT_CATEGORY_LOOKUP,
    [(Deposit, "deposit"), (Withdrawal, "withdrawal")]
);

/// Splits a "BASE_QUOTE" pair.
pub fn pair_get_assets(pair: &str) -> Result<(Asset, Asset), DeserializationError> {
    match pair.split_once('_') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('_') => {
            Ok((Asset::new(base), Asset::new(quote)))
        }
        _ => Err(DeserializationError::new(format!("invalid trade pair \"{pair}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_wire_strings() {
        assert_eq!(Location::Kraken.as_str(), "kraken");
        assert_eq!("poloniex".parse::<Location>().unwrap(), Location::Poloniex);
        assert!("mtgox".parse::<Location>().is_err());
        let json = serde_json::to_string(&TradeType::SettlementSell).unwrap();
        assert_eq!(json, "\"settlement_sell\"");
        let back: TradeType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TradeType::SettlementSell);
    }

    #[test]
    fn test_pair_get_assets() {
        let (base, quote) = pair_get_assets("ETH_EUR").unwrap();
        assert_eq!(base, Asset::new("ETH"));
        assert_eq!(quote, Asset::new("EUR"));
        assert!(pair_get_assets("ETHEUR").is_err());
        assert!(pair_get_assets("_EUR").is_err());
    }

    #[test]
    fn test_fiat_detection() {
        assert!(Asset::new("EUR").is_fiat());
        assert!(!Asset::new("BTC").is_fiat());
    }
}
