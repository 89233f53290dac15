//! Balance arithmetic model.
//!
//! Every balance supplier reports through these types so that contributions from
//! many independent sources can be summed without precision loss or mixing assets.
//! Operators between concrete types are infallible; operands coming from outside
//! (JSON mappings) go through [`coerce_to_balance`] first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::domain::asset::{Asset, BalanceType};
use crate::domain::fval::{FVal, ZERO, fval_from_json, is_close};
use crate::errors::{AssetMismatch, BalanceError, InputError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub amount: FVal,
    /// Value of `amount` in the reporting currency.
    pub value: FVal,
    /// Legacy USD value, kept alongside for older consumers.
    pub usd_value: FVal,
}

impl Balance {
    pub fn new(amount: FVal, value: FVal) -> Self {
        Self {
            amount,
            value,
            usd_value: value,
        }
    }

    pub fn with_usd_value(amount: FVal, value: FVal, usd_value: FVal) -> Self {
        Self {
            amount,
            value,
            usd_value,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero() && self.value.is_zero() && self.usd_value.is_zero()
    }

    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
            value: self.value.abs(),
            usd_value: self.usd_value.abs(),
        }
    }

    pub fn is_close(&self, other: &Balance, max_diff: FVal) -> bool {
        is_close(self.amount, other.amount, max_diff)
            && is_close(self.value, other.value, max_diff)
            && is_close(self.usd_value, other.usd_value, max_diff)
    }

    pub fn try_add(&self, other: &Value) -> Result<Balance, InputError> {
        Ok(*self + coerce_to_balance(other)?)
    }

    pub fn try_sub(&self, other: &Value) -> Result<Balance, InputError> {
        Ok(*self - coerce_to_balance(other)?)
    }

    /// Scales by a JSON scalar. Only integers and decimal strings are accepted.
    pub fn try_mul(&self, scalar: &Value) -> Result<Balance, InputError> {
        let factor = match scalar {
            Value::Number(n) if n.is_i64() || n.is_u64() => fval_from_json(scalar)
                .map_err(|e| InputError::new(format!("invalid multiplier {n}: {e}")))?,
            Value::String(s) => fval_from_json(scalar)
                .map_err(|e| InputError::new(format!("invalid multiplier \"{s}\": {e}")))?,
            other => {
                return Err(InputError::new(format!(
                    "tried to multiply balance with {other}; only integers and decimals are allowed"
                )));
            }
        };
        Ok(*self * factor)
    }

    /// Decimal fields become strings, never JSON floats.
    pub fn serialize(&self) -> Value {
        json!({
            "amount": self.amount.to_string(),
            "value": self.value.to_string(),
            "usd_value": self.usd_value.to_string(),
        })
    }
}

/// Turns an external operand into a [`Balance`].
///
/// The mapping needs `amount` plus at least one of `value` / `usd_value`. When only
/// one of the two value keys is present it fills both fields.
pub fn coerce_to_balance(value: &Value) -> Result<Balance, InputError> {
    let map = value.as_object().ok_or_else(|| {
        InputError::new(format!("tried to combine a balance with a non-balance value {value}"))
    })?;
    let amount = field(map, "amount")?
        .ok_or_else(|| InputError::new("balance mapping is missing the \"amount\" key"))?;
    let plain_value = field(map, "value")?;
    let usd_value = field(map, "usd_value")?;
    let (value, usd_value) = match (plain_value, usd_value) {
        (Some(v), Some(u)) => (v, u),
        (Some(v), None) => (v, v),
        (None, Some(u)) => (u, u),
        (None, None) => {
            return Err(InputError::new(
                "balance mapping is missing both the \"value\" and \"usd_value\" keys",
            ));
        }
    };
    Ok(Balance::with_usd_value(amount, value, usd_value))
}

fn field(map: &Map<String, Value>, key: &str) -> Result<Option<FVal>, InputError> {
    map.get(key)
        .map(|v| {
            fval_from_json(v).map_err(|e| InputError::new(format!("invalid \"{key}\" in balance: {e}")))
        })
        .transpose()
}

impl Add for Balance {
    type Output = Balance;

    fn add(self, other: Balance) -> Balance {
        Balance {
            amount: self.amount + other.amount,
            value: self.value + other.value,
            usd_value: self.usd_value + other.usd_value,
        }
    }
}

impl Sub for Balance {
    type Output = Balance;

    fn sub(self, other: Balance) -> Balance {
        Balance {
            amount: self.amount - other.amount,
            value: self.value - other.value,
            usd_value: self.usd_value - other.usd_value,
        }
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, other: Balance) {
        *self = *self + other;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, other: Balance) {
        *self = *self - other;
    }
}

impl Neg for Balance {
    type Output = Balance;

    fn neg(self) -> Balance {
        Balance {
            amount: -self.amount,
            value: -self.value,
            usd_value: -self.usd_value,
        }
    }
}

impl Mul<FVal> for Balance {
    type Output = Balance;

    fn mul(self, factor: FVal) -> Balance {
        Balance {
            amount: self.amount * factor,
            value: self.value * factor,
            usd_value: self.usd_value * factor,
        }
    }
}

impl Mul<i64> for Balance {
    type Output = Balance;

    fn mul(self, factor: i64) -> Balance {
        self * FVal::from(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: Asset,
    pub balance: Balance,
}

impl AssetBalance {
    pub fn new(asset: Asset, balance: Balance) -> Self {
        Self { asset, balance }
    }

    fn check_same_asset(&self, other: &AssetBalance) -> Result<(), AssetMismatch> {
        if self.asset != other.asset {
            return Err(AssetMismatch {
                left: self.asset.to_string(),
                right: other.asset.to_string(),
            });
        }
        Ok(())
    }

    pub fn try_add(&self, other: &AssetBalance) -> Result<AssetBalance, AssetMismatch> {
        self.check_same_asset(other)?;
        Ok(AssetBalance::new(self.asset.clone(), self.balance + other.balance))
    }

    pub fn try_sub(&self, other: &AssetBalance) -> Result<AssetBalance, AssetMismatch> {
        self.check_same_asset(other)?;
        Ok(AssetBalance::new(self.asset.clone(), self.balance - other.balance))
    }

    /// Combines with an external operand, which must itself describe an asset balance.
    pub fn try_add_value(&self, other: &Value) -> Result<AssetBalance, BalanceError> {
        let other = coerce_to_asset_balance(other)?;
        Ok(self.try_add(&other)?)
    }

    pub fn try_sub_value(&self, other: &Value) -> Result<AssetBalance, BalanceError> {
        let other = coerce_to_asset_balance(other)?;
        Ok(self.try_sub(&other)?)
    }

    pub fn serialize(&self) -> Value {
        let mut out = self.balance.serialize();
        if let Value::Object(ref mut m) = out {
            m.insert("asset".to_string(), Value::String(self.asset.to_string()));
        }
        out
    }
}

fn coerce_to_asset_balance(value: &Value) -> Result<AssetBalance, InputError> {
    let asset = value
        .get("asset")
        .and_then(|a| a.as_str())
        .ok_or_else(|| InputError::new(format!("{value} is not an asset balance")))?;
    Ok(AssetBalance::new(Asset::new(asset), coerce_to_balance(value)?))
}

impl Neg for AssetBalance {
    type Output = AssetBalance;

    fn neg(self) -> AssetBalance {
        AssetBalance::new(self.asset, -self.balance)
    }
}

impl Mul<FVal> for AssetBalance {
    type Output = AssetBalance;

    fn mul(self, factor: FVal) -> AssetBalance {
        AssetBalance::new(self.asset, self.balance * factor)
    }
}

/// Distinguishes simultaneous positions of one asset, e.g. "lending" vs "collateral".
pub type Label = String;

/// Two-level ordered map `asset -> label -> balance`.
///
/// Reading an unset pair yields the zero balance without inserting anything;
/// only [`BalanceMap::entry_mut`] and [`BalanceMap::add_balance`] create entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceMap(BTreeMap<Asset, BTreeMap<Label, Balance>>);

impl BalanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_zero(&self, asset: &Asset, label: &str) -> Balance {
        self.0
            .get(asset)
            .and_then(|labels| labels.get(label))
            .copied()
            .unwrap_or_default()
    }

    pub fn entry_mut(&mut self, asset: Asset, label: impl Into<Label>) -> &mut Balance {
        self.0.entry(asset).or_default().entry(label.into()).or_default()
    }

    pub fn add_balance(&mut self, asset: Asset, label: impl Into<Label>, balance: Balance) {
        *self.entry_mut(asset, label) += balance;
    }

    pub fn labels(&self, asset: &Asset) -> Option<&BTreeMap<Label, Balance>> {
        self.0.get(asset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Asset, &Label, &Balance)> {
        self.0
            .iter()
            .flat_map(|(asset, labels)| labels.iter().map(move |(label, b)| (asset, label, b)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|labels| labels.is_empty())
    }

    pub fn total_value(&self) -> FVal {
        self.iter().fold(ZERO, |acc, (_, _, b)| acc + b.value)
    }

    fn combine(&self, other: &BalanceMap, op: fn(Balance, Balance) -> Balance) -> BalanceMap {
        let mut out = self.clone();
        for (asset, label, balance) in other.iter() {
            let entry = out.entry_mut(asset.clone(), label.clone());
            *entry = op(*entry, *balance);
        }
        out
    }

    fn from_json(value: &Value, side: &str) -> Result<BalanceMap, InputError> {
        let assets = value
            .as_object()
            .ok_or_else(|| InputError::new(format!("\"{side}\" must be a mapping of assets")))?;
        let mut out = BalanceMap::new();
        for (asset, labels) in assets {
            let labels = labels.as_object().ok_or_else(|| {
                InputError::new(format!("\"{side}.{asset}\" must be a mapping of labels"))
            })?;
            for (label, leaf) in labels {
                out.add_balance(Asset::new(asset.as_str()), label.as_str(), coerce_to_balance(leaf)?);
            }
        }
        Ok(out)
    }

    pub fn serialize(&self) -> Value {
        let out: Map<String, Value> = self
            .0
            .iter()
            .map(|(asset, labels)| {
                let labels: Map<String, Value> = labels
                    .iter()
                    .map(|(label, b)| (label.clone(), b.serialize()))
                    .collect();
                (asset.to_string(), Value::Object(labels))
            })
            .collect();
        Value::Object(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    pub assets: BalanceMap,
    pub liabilities: BalanceMap,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side(&self, balance_type: BalanceType) -> &BalanceMap {
        match balance_type {
            BalanceType::Asset => &self.assets,
            BalanceType::Liability => &self.liabilities,
        }
    }

    pub fn side_mut(&mut self, balance_type: BalanceType) -> &mut BalanceMap {
        match balance_type {
            BalanceType::Asset => &mut self.assets,
            BalanceType::Liability => &mut self.liabilities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.liabilities.is_empty()
    }

    pub fn total_assets_value(&self) -> FVal {
        self.assets.total_value()
    }

    pub fn total_liabilities_value(&self) -> FVal {
        self.liabilities.total_value()
    }

    pub fn net_value(&self) -> FVal {
        self.total_assets_value() - self.total_liabilities_value()
    }

    /// Parses a `{"assets": .., "liabilities": ..}` mapping. Any other top-level
    /// key, or a missing one, is rejected.
    pub fn from_json(value: &Value) -> Result<BalanceSheet, InputError> {
        let map = value.as_object().ok_or_else(|| {
            InputError::new(format!("tried to combine a balance sheet with {value}"))
        })?;
        let has_exact_keys =
            map.len() == 2 && map.contains_key("assets") && map.contains_key("liabilities");
        if !has_exact_keys {
            return Err(InputError::new(
                "balance sheet mapping must have exactly the \"assets\" and \"liabilities\" keys",
            ));
        }
        Ok(BalanceSheet {
            assets: BalanceMap::from_json(&map["assets"], "assets")?,
            liabilities: BalanceMap::from_json(&map["liabilities"], "liabilities")?,
        })
    }

    pub fn try_add(&self, other: &Value) -> Result<BalanceSheet, InputError> {
        Ok(self + &BalanceSheet::from_json(other)?)
    }

    pub fn try_sub(&self, other: &Value) -> Result<BalanceSheet, InputError> {
        Ok(self - &BalanceSheet::from_json(other)?)
    }

    pub fn serialize(&self) -> Value {
        json!({
            "assets": self.assets.serialize(),
            "liabilities": self.liabilities.serialize(),
        })
    }
}

impl Add for &BalanceSheet {
    type Output = BalanceSheet;

    fn add(self, other: &BalanceSheet) -> BalanceSheet {
        BalanceSheet {
            assets: self.assets.combine(&other.assets, |a, b| a + b),
            liabilities: self.liabilities.combine(&other.liabilities, |a, b| a + b),
        }
    }
}

impl Sub for &BalanceSheet {
    type Output = BalanceSheet;

    fn sub(self, other: &BalanceSheet) -> BalanceSheet {
        BalanceSheet {
            assets: self.assets.combine(&other.assets, |a, b| a - b),
            liabilities: self.liabilities.combine(&other.liabilities, |a, b| a - b),
        }
    }
}

impl Add for BalanceSheet {
    type Output = BalanceSheet;

    fn add(self, other: BalanceSheet) -> BalanceSheet {
        &self + &other
    }
}

impl Sub for BalanceSheet {
    type Output = BalanceSheet;

    fn sub(self, other: BalanceSheet) -> BalanceSheet {
        &self - &other
    }
}

impl AddAssign<&BalanceSheet> for BalanceSheet {
    fn add_assign(&mut self, other: &BalanceSheet) {
        *self = &*self + other;
    }
}

impl SubAssign<&BalanceSheet> for BalanceSheet {
    fn sub_assign(&mut self, other: &BalanceSheet) {
        *self = &*self - other;
    }
}
