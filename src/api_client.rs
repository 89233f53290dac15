use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::asset::Asset;
use crate::domain::fval::{FVal, ONE, Timestamp, fval_from_json};
use crate::errors::PriceError;

#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn historical_price(
        &self,
        from_asset: &Asset,
        to_asset: &Asset,
        timestamp: Timestamp,
    ) -> Result<FVal, PriceError>;

    async fn current_price(&self, from_asset: &Asset, to_asset: &Asset) -> Result<FVal, PriceError>;
}

const CRYPTOCOMPARE_URL: &str = "https://min-api.cryptocompare.com/data";

pub struct CryptoCompareProvider {
    client: Client,
    api_key: Option<String>,
}

impl CryptoCompareProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }

    async fn query(&self, path: &str, params: &[(&str, String)]) -> Result<Value, PriceError> {
        let mut request = self
            .client
            .get(format!("{CRYPTOCOMPARE_URL}/{path}"))
            .header("Accept", "application/json")
            .query(params);
        if let Some(key) = &self.api_key {
            request = request.header("authorization", format!("Apikey {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PriceError::Remote(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| PriceError::Remote(e.to_string()))?;

        if body.get("Response").and_then(Value::as_str) == Some("Error") {
            let message = body
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(PriceError::Remote(message.to_string()));
        }
        Ok(body)
    }
}

fn price_from(value: Option<&Value>) -> Option<FVal> {
    value.and_then(|v| fval_from_json(v).ok())
}

#[async_trait]
impl PriceProvider for CryptoCompareProvider {
    async fn historical_price(
        &self,
        from_asset: &Asset,
        to_asset: &Asset,
        timestamp: Timestamp,
    ) -> Result<FVal, PriceError> {
        if from_asset == to_asset {
            return Ok(ONE);
        }
        let params = [
            ("fsym", from_asset.to_string()),
            ("tsyms", to_asset.to_string()),
            ("ts", timestamp.to_string()),
        ];
        let body = self.query("pricehistorical", &params).await?;
        // {"BTC": {"EUR": 1234.5}}
        price_from(
            body.get(from_asset.identifier())
                .and_then(|inner| inner.get(to_asset.identifier())),
        )
        .filter(|p| !p.is_zero())
        .ok_or_else(|| PriceError::NoPriceForGivenTimestamp {
            from: from_asset.to_string(),
            to: to_asset.to_string(),
            timestamp,
        })
    }

    async fn current_price(&self, from_asset: &Asset, to_asset: &Asset) -> Result<FVal, PriceError> {
        if from_asset == to_asset {
            return Ok(ONE);
        }
        let params = [("fsym", from_asset.to_string()), ("tsyms", to_asset.to_string())];
        let body = self.query("price", &params).await?;
        price_from(body.get(to_asset.identifier())).ok_or_else(|| {
            PriceError::Remote(format!("no current price for {from_asset} in {to_asset}"))
        })
    }
}

// Fixed-price provider for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct MockPriceProvider {
    pub historical: HashMap<(String, String), FVal>,
    pub current: HashMap<(String, String), FVal>,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_historical(&mut self, from: &str, to: &str, price: FVal) {
        self.historical.insert((from.to_string(), to.to_string()), price);
    }

    pub fn set_current(&mut self, from: &str, to: &str, price: FVal) {
        self.current.insert((from.to_string(), to.to_string()), price);
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    async fn historical_price(
        &self,
        from_asset: &Asset,
        to_asset: &Asset,
        timestamp: Timestamp,
    ) -> Result<FVal, PriceError> {
        if from_asset == to_asset {
            return Ok(ONE);
        }
        self.historical
            .get(&(from_asset.to_string(), to_asset.to_string()))
            .copied()
            .ok_or_else(|| PriceError::NoPriceForGivenTimestamp {
                from: from_asset.to_string(),
                to: to_asset.to_string(),
                timestamp,
            })
    }

    async fn current_price(&self, from_asset: &Asset, to_asset: &Asset) -> Result<FVal, PriceError> {
        if from_asset == to_asset {
            return Ok(ONE);
        }
        self.current
            .get(&(from_asset.to_string(), to_asset.to_string()))
            .copied()
            .ok_or_else(|| PriceError::Remote(format!("no mock price for {from_asset}")))
    }
}
