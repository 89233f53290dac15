use dotenv::dotenv;
use std::env;
use tracing::warn;

use crate::domain::asset::Asset;

/// One year; lots held longer than this are sold tax free.
pub const DEFAULT_TAXFREE_AFTER_PERIOD: i64 = 31536000;

/// Settings the accounting run depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingSettings {
    pub profit_currency: Asset,
    /// `None` disables the tax-free rule.
    pub taxfree_after_period: Option<i64>,
    pub include_crypto2crypto: bool,
    pub ignored_assets: Vec<Asset>,
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            profit_currency: Asset::new("EUR"),
            taxfree_after_period: Some(DEFAULT_TAXFREE_AFTER_PERIOD),
            include_crypto2crypto: true,
            ignored_assets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub accounting: AccountingSettings,
    pub price_api_key: Option<String>,
    pub manual_balances_csv: Option<String>,
    /// Every computed report is also written here as CSV when set.
    pub report_export_dir: Option<String>,
    pub port: u16,
}

impl Settings {
    /// Reads `.env` and the process environment. Unparseable values fall back
    /// to their defaults with a warning.
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = AccountingSettings::default();

        let profit_currency = env::var("PROFIT_CURRENCY")
            .map(|s| Asset::new(s.trim().to_uppercase()))
            .unwrap_or(defaults.profit_currency);

        let taxfree_after_period = match env::var("TAXFREE_AFTER_PERIOD") {
            Ok(raw) => parse_taxfree_after_period(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Invalid TAXFREE_AFTER_PERIOD, using default");
                defaults.taxfree_after_period
            }),
            Err(_) => defaults.taxfree_after_period,
        };

        let include_crypto2crypto = env::var("INCLUDE_CRYPTO2CRYPTO")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.include_crypto2crypto);

        let ignored_assets = env::var("IGNORED_ASSETS")
            .map(|s| parse_asset_list(&s))
            .unwrap_or_default();

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid PORT, using 3001");
                3001
            }),
            Err(_) => 3001,
        };

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/accounting.db".to_string()),
            accounting: AccountingSettings {
                profit_currency,
                taxfree_after_period,
                include_crypto2crypto,
                ignored_assets,
            },
            price_api_key: env::var("PRICE_API_KEY").ok().filter(|k| !k.is_empty()),
            manual_balances_csv: env::var("MANUAL_BALANCES_CSV").ok().filter(|p| !p.is_empty()),
            report_export_dir: env::var("REPORT_EXPORT_DIR").ok().filter(|p| !p.is_empty()),
            port,
        }
    }
}

/// `-1` disables the tax-free rule. Any other negative value is invalid.
pub fn parse_taxfree_after_period(raw: &str) -> Option<Option<i64>> {
    match raw.trim().parse::<i64>() {
        Ok(-1) => Some(None),
        Ok(v) if v >= 0 => Some(Some(v)),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_asset_list(raw: &str) -> Vec<Asset> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Asset::new(s.to_uppercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_taxfree_after_period() {
        assert_eq!(parse_taxfree_after_period("-1"), Some(None));
        assert_eq!(parse_taxfree_after_period(" 86400 "), Some(Some(86400)));
        assert_eq!(parse_taxfree_after_period("-5"), None);
        assert_eq!(parse_taxfree_after_period("a year"), None);
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_bool("True"));
        assert!(!parse_bool("0"));
        assert_eq!(parse_asset_list("doge, ,shib"), vec![Asset::new("DOGE"), Asset::new("SHIB")]);
    }
}
