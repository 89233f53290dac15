//! FIFO cost basis.
//!
//! Every asset keeps a queue of acquisitions (buy lots), oldest first. A spend
//! consumes lots from the front. Lots older than the tax-free period at spend time
//! contribute to the tax-free bought cost, every other lot to the taxable one.
//!
//! Callers process one asset's queue from a single thread in timestamp order.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

use crate::accounting::messages::MessagesAggregator;
use crate::domain::asset::{Asset, Location};
use crate::domain::fval::{FVal, Timestamp, ZERO, timestamp_to_date};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionEvent {
    pub timestamp: Timestamp,
    pub location: Location,
    pub description: String,
    pub amount: FVal,
    /// Same as `amount` at creation, reduced as spends consume the lot.
    pub remaining_amount: FVal,
    /// Profit currency paid per unit.
    pub rate: FVal,
    /// Profit currency paid in fees per unit.
    pub fee_rate: FVal,
}

impl AcquisitionEvent {
    pub fn new(
        timestamp: Timestamp,
        location: Location,
        description: impl Into<String>,
        amount: FVal,
        rate: FVal,
        fee_rate: FVal,
    ) -> Self {
        Self {
            timestamp,
            location,
            description: description.into(),
            amount,
            remaining_amount: amount,
            rate,
            fee_rate,
        }
    }

    /// remaining_amount * rate + remaining_amount * fee_rate
    pub fn acquisition_cost(&self) -> FVal {
        self.remaining_amount * self.rate + self.remaining_amount * self.fee_rate
    }

    pub fn serialize(&self) -> Value {
        json!({
            "time": self.timestamp,
            "description": self.description,
            "location": self.location.to_string(),
            "amount": self.amount.to_string(),
            "rate": self.rate.to_string(),
            "fee_rate": self.fee_rate.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendEvent {
    pub timestamp: Timestamp,
    pub location: Location,
    pub amount: FVal,
    pub rate: FVal,
    pub fee_rate: FVal,
    /// Gain in profit currency, fees not counted.
    pub gain: FVal,
}

#[derive(Debug, Clone, Default)]
pub struct CostBasisEvents {
    pub used_acquisitions: Vec<AcquisitionEvent>,
    pub acquisitions: VecDeque<AcquisitionEvent>,
    pub spends: Vec<SpendEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedAcquisition {
    pub amount: FVal,
    pub event: AcquisitionEvent,
}

impl MatchedAcquisition {
    pub fn serialize(&self) -> Value {
        let mut out = self.event.serialize();
        if let Value::Object(ref mut m) = out {
            m.insert("used_amount".to_string(), Value::String(self.amount.to_string()));
        }
        out
    }
}

/// Result of matching one spend against the acquisition queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CostBasisInfo {
    /// Part of the spent amount that falls inside the taxable window.
    pub taxable_amount: FVal,
    /// Profit currency paid to acquire `taxable_amount`.
    pub taxable_bought_cost: FVal,
    /// Profit currency paid to acquire the tax-free remainder.
    pub taxfree_bought_cost: FVal,
    pub matched_acquisitions: Vec<MatchedAcquisition>,
    /// False when not enough acquisitions were documented for the spend.
    pub is_complete: bool,
}

impl CostBasisInfo {
    pub fn serialize(&self) -> Value {
        json!({
            "is_complete": self.is_complete,
            "matched_acquisitions": self
                .matched_acquisitions
                .iter()
                .map(MatchedAcquisition::serialize)
                .collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetDetails {
    pub taxfree_amount_left: FVal,
    pub average_buy_rate: FVal,
}

#[derive(Debug)]
pub struct CostBasisCalculator {
    taxfree_after_period: Option<i64>,
    profit_currency: Asset,
    events: HashMap<Asset, CostBasisEvents>,
}

impl CostBasisCalculator {
    pub fn new(profit_currency: Asset, taxfree_after_period: Option<i64>) -> Self {
        Self {
            taxfree_after_period,
            profit_currency,
            events: HashMap::new(),
        }
    }

    pub fn reset(&mut self, profit_currency: Asset) {
        self.profit_currency = profit_currency;
        self.events.clear();
    }

    // WETH shares its cost basis with ETH
    fn cost_basis_asset(asset: &Asset) -> Asset {
        if asset.identifier() == "WETH" {
            Asset::new("ETH")
        } else {
            asset.clone()
        }
    }

    pub fn events(&self, asset: &Asset) -> Option<&CostBasisEvents> {
        self.events.get(&Self::cost_basis_asset(asset))
    }

    fn events_mut(&mut self, asset: &Asset) -> &mut CostBasisEvents {
        self.events.entry(Self::cost_basis_asset(asset)).or_default()
    }

    pub fn add_acquisition(&mut self, asset: &Asset, event: AcquisitionEvent) {
        debug!(
            asset = %asset,
            amount = %event.amount,
            rate = %event.rate,
            fee_rate = %event.fee_rate,
            location = %event.location,
            time = %timestamp_to_date(event.timestamp),
            "Adding acquisition",
        );
        self.events_mut(asset).acquisitions.push_back(event);
    }

    /// Records that `amount` of `asset` was obtained at `rate` profit currency per unit.
    #[allow(clippy::too_many_arguments)]
    pub fn obtain_asset(
        &mut self,
        location: Location,
        timestamp: Timestamp,
        description: &str,
        asset: &Asset,
        amount: FVal,
        rate: FVal,
        fee_in_profit_currency: FVal,
    ) {
        let fee_rate = if amount.is_zero() { ZERO } else { fee_in_profit_currency / amount };
        let event = AcquisitionEvent::new(timestamp, location, description, amount, rate, fee_rate);
        self.add_acquisition(asset, event);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spend_asset(
        &mut self,
        location: Location,
        timestamp: Timestamp,
        asset: &Asset,
        amount: FVal,
        rate: FVal,
        fee_in_profit_currency: FVal,
        gain_in_profit_currency: FVal,
    ) {
        let fee_rate = if amount.is_zero() { ZERO } else { fee_in_profit_currency / amount };
        self.events_mut(asset).spends.push(SpendEvent {
            timestamp,
            location,
            amount,
            rate,
            fee_rate,
            gain: gain_in_profit_currency,
        });
    }

    /// Matches a spend of `selling_amount` against the acquisition queue of
    /// `selling_asset`, oldest lot first, consuming what it uses.
    ///
    /// Selling more than was ever documented is not an error: the unmatched
    /// remainder has no cost basis and is fully taxable. The user is told through
    /// `messages` and the result is flagged incomplete.
    pub fn search_buys_calculate_profit(
        &mut self,
        selling_amount: FVal,
        selling_asset: &Asset,
        timestamp: Timestamp,
        messages: &mut MessagesAggregator,
    ) -> CostBasisInfo {
        let taxfree_after_period = self.taxfree_after_period;
        let profit_currency = self.profit_currency.clone();
        let asset_events = self.events_mut(selling_asset);

        if asset_events.acquisitions.is_empty() {
            messages.add_error(format!(
                "No documented acquisition found for {} before {}. Let us know how you \
                 acquired it via a ledger action",
                selling_asset,
                timestamp_to_date(timestamp),
            ));
            return CostBasisInfo {
                taxable_amount: selling_amount,
                taxable_bought_cost: ZERO,
                taxfree_bought_cost: ZERO,
                matched_acquisitions: Vec::new(),
                is_complete: false,
            };
        }

        let mut remaining_sold_amount = selling_amount;
        let mut taxfree_bought_cost = ZERO;
        let mut taxable_bought_cost = ZERO;
        let mut taxable_amount = ZERO;
        let mut taxfree_amount = ZERO;
        let mut matched_acquisitions = Vec::new();

        while remaining_sold_amount > ZERO {
            let Some(acquisition) = asset_events.acquisitions.front_mut() else {
                break;
            };
            let at_taxfree_period = match taxfree_after_period {
                Some(period) => acquisition.timestamp + period < timestamp,
                None => false,
            };
            let tax_status = if at_taxfree_period { "TAX-FREE" } else { "TAXABLE" };

            if remaining_sold_amount < acquisition.remaining_amount {
                let buying_cost = remaining_sold_amount * acquisition.rate
                    + acquisition.fee_rate * remaining_sold_amount;
                if at_taxfree_period {
                    taxfree_amount += remaining_sold_amount;
                    taxfree_bought_cost += buying_cost;
                } else {
                    taxable_amount += remaining_sold_amount;
                    taxable_bought_cost += buying_cost;
                }
                debug!(
                    tax_status,
                    used_amount = %remaining_sold_amount,
                    from_amount = %acquisition.amount,
                    asset = %selling_asset,
                    acquisition_rate = %acquisition.rate,
                    profit_currency = %profit_currency,
                    time = %timestamp_to_date(acquisition.timestamp),
                    "Spend uses up part of historical acquisition",
                );
                acquisition.remaining_amount -= remaining_sold_amount;
                matched_acquisitions.push(MatchedAcquisition {
                    amount: remaining_sold_amount,
                    event: acquisition.clone(),
                });
                remaining_sold_amount = ZERO;
                break;
            }

            let used_amount = acquisition.remaining_amount;
            let cost = acquisition.acquisition_cost();
            remaining_sold_amount -= used_amount;
            if at_taxfree_period {
                taxfree_amount += used_amount;
                taxfree_bought_cost += cost;
            } else {
                taxable_amount += used_amount;
                taxable_bought_cost += cost;
            }
            debug!(
                tax_status,
                bought_amount = %used_amount,
                asset = %selling_asset,
                acquisition_rate = %acquisition.rate,
                profit_currency = %profit_currency,
                time = %timestamp_to_date(acquisition.timestamp),
                "Spend uses up entire historical acquisition",
            );
            acquisition.remaining_amount = ZERO;
            if let Some(used) = asset_events.acquisitions.pop_front() {
                matched_acquisitions.push(MatchedAcquisition {
                    amount: used_amount,
                    event: used.clone(),
                });
                asset_events.used_acquisitions.push(used);
            }
        }

        let mut is_complete = true;
        if remaining_sold_amount > ZERO {
            messages.add_error(format!(
                "Not enough documented acquisitions found for {} before {}. Only found \
                 acquisitions for {} {} and miss {} {}. Let us know how you acquired it via \
                 a ledger action",
                selling_asset,
                timestamp_to_date(timestamp),
                taxable_amount + taxfree_amount,
                selling_asset,
                remaining_sold_amount,
                selling_asset,
            ));
            taxable_amount = selling_amount - taxfree_amount;
            is_complete = false;
        }

        CostBasisInfo {
            taxable_amount,
            taxable_bought_cost,
            taxfree_bought_cost,
            matched_acquisitions,
            is_complete,
        }
    }

    /// Consumes `amount` of `asset` from the acquisition queue without computing
    /// any profit. Returns false if there is no history for the asset or not
    /// enough of it. In the latter case every lot has still been drained.
    pub fn reduce_asset_amount(&mut self, asset: &Asset, amount: FVal) -> bool {
        if amount.is_zero() {
            return true;
        }

        let asset_events = self.events_mut(asset);
        if asset_events.acquisitions.is_empty() {
            return false;
        }

        let mut remaining_amount = amount;
        while let Some(acquisition) = asset_events.acquisitions.front_mut() {
            if remaining_amount < acquisition.remaining_amount {
                acquisition.remaining_amount -= remaining_amount;
                return true;
            }
            remaining_amount -= acquisition.remaining_amount;
            asset_events.acquisitions.pop_front();
            if remaining_amount.is_zero() {
                return true;
            }
        }

        remaining_amount.is_zero()
    }

    /// Amount the processed history says we should still hold.
    pub fn get_calculated_asset_amount(&self, asset: &Asset) -> Option<FVal> {
        let asset_events = self.events(asset)?;
        if asset_events.acquisitions.is_empty() {
            return None;
        }
        Some(asset_events.acquisitions.iter().map(|a| a.remaining_amount).sum())
    }

    /// Per asset: how much of what is left has passed the tax-free period at `now`,
    /// and the average rate the remaining lots were bought at.
    pub fn calculate_asset_details(&self, now: Timestamp) -> BTreeMap<Asset, AssetDetails> {
        self.events
            .iter()
            .map(|(asset, events)| {
                let mut taxfree_amount_left = ZERO;
                let mut amount_sum = ZERO;
                let mut weighted = ZERO;
                for acquisition in &events.acquisitions {
                    if let Some(period) = self.taxfree_after_period {
                        if acquisition.timestamp + period < now {
                            taxfree_amount_left += acquisition.remaining_amount;
                        }
                    }
                    amount_sum += acquisition.remaining_amount;
                    weighted += acquisition.remaining_amount * acquisition.rate;
                }
                let average_buy_rate = if amount_sum.is_zero() { ZERO } else { weighted / amount_sum };
                (
                    asset.clone(),
                    AssetDetails {
                        taxfree_amount_left,
                        average_buy_rate,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fval::{default_max_diff, is_close};
    use rust_decimal_macros::dec;

    const YEAR_IN_SECONDS: i64 = 31536000;

    fn btc() -> Asset {
        Asset::new("BTC")
    }

    fn calculator() -> CostBasisCalculator {
        CostBasisCalculator::new(Asset::new("EUR"), Some(YEAR_IN_SECONDS))
    }

    fn add_lot(calc: &mut CostBasisCalculator, amount: FVal, timestamp: Timestamp, rate: FVal, fee_rate: FVal) {
        calc.add_acquisition(
            &btc(),
            AcquisitionEvent::new(timestamp, Location::Kraken, "trade", amount, rate, fee_rate),
        );
    }

    fn lots(calc: &CostBasisCalculator) -> Vec<FVal> {
        calc.events(&btc())
            .map(|e| e.acquisitions.iter().map(|a| a.remaining_amount).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_calculate_spend_cost_basis_after_year() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(5), 1446979735, dec!(268.1), dec!(0.0001));
        add_lot(&mut calc, dec!(15), 1467378304, dec!(612.45), dec!(0.0019));
        add_lot(&mut calc, dec!(3), 1477378304, dec!(603.415), dec!(0.0017));

        let mut messages = MessagesAggregator::new();
        let info = calc.search_buys_calculate_profit(dec!(8), &btc(), 1480683904, &mut messages);

        assert_eq!(info.taxable_amount, dec!(3), "3 out of 8 should be taxable (within a year)");
        assert!(is_close(info.taxfree_bought_cost, dec!(1340.5005), default_max_diff()));
        assert!(is_close(info.taxable_bought_cost, dec!(1837.3557), default_max_diff()));
        assert!(info.is_complete);
        assert_eq!(info.matched_acquisitions.len(), 2);
        assert_eq!(info.matched_acquisitions[0].amount, dec!(5));
        assert_eq!(info.matched_acquisitions[1].amount, dec!(3));
        assert_eq!(info.matched_acquisitions[1].event.remaining_amount, dec!(12));

        assert_eq!(lots(&calc), vec![dec!(12), dec!(3)], "first buy should have been used");
        assert_eq!(calc.events(&btc()).unwrap().used_acquisitions.len(), 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_calculate_spend_cost_basis_1_buy_consumed_by_1_sell() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(5), 1446979735, dec!(268.1), ZERO);

        let mut messages = MessagesAggregator::new();
        let info = calc.search_buys_calculate_profit(dec!(5), &btc(), 1467378304, &mut messages);

        assert_eq!(info.taxable_amount, dec!(5));
        assert_eq!(info.taxfree_bought_cost, ZERO);
        assert_eq!(info.taxable_bought_cost, dec!(1340.5));
        assert!(info.is_complete);
        assert!(lots(&calc).is_empty(), "only buy should have been used");
    }

    #[test]
    fn test_one_buy_used_by_two_sells() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(5), 1446979735, dec!(268.1), dec!(0.0001));
        let mut messages = MessagesAggregator::new();

        let first = calc.search_buys_calculate_profit(dec!(3), &btc(), 1467378304, &mut messages);
        assert_eq!(first.taxable_amount, dec!(3));
        assert!(is_close(first.taxable_bought_cost, dec!(804.3003), default_max_diff()));
        assert_eq!(lots(&calc), vec![dec!(2)]);

        let second = calc.search_buys_calculate_profit(dec!(2), &btc(), 1467378404, &mut messages);
        assert_eq!(second.taxable_amount, dec!(2));
        assert!(is_close(second.taxable_bought_cost, dec!(536.2002), default_max_diff()));
        assert!(lots(&calc).is_empty());
    }

    #[test]
    fn test_sell_more_than_bought_has_zero_cost_remainder() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(1), 1446979735, dec!(100), ZERO);
        add_lot(&mut calc, dec!(1), 1500000000, dec!(200), ZERO);

        let mut messages = MessagesAggregator::new();
        let info = calc.search_buys_calculate_profit(dec!(5), &btc(), 1500000100, &mut messages);

        // first lot is past the tax-free period, the rest is taxable with no cost for 3 of it
        assert_eq!(info.taxfree_bought_cost, dec!(100));
        assert_eq!(info.taxable_bought_cost, dec!(200));
        assert_eq!(info.taxable_amount, dec!(4));
        assert!(!info.is_complete);
        assert!(lots(&calc).is_empty());
        assert_eq!(messages.errors.len(), 1);
    }

    #[test]
    fn test_sell_without_any_acquisition() {
        let mut calc = calculator();
        let mut messages = MessagesAggregator::new();
        let info = calc.search_buys_calculate_profit(dec!(2), &btc(), 1500000000, &mut messages);
        assert_eq!(info.taxable_amount, dec!(2));
        assert_eq!(info.taxable_bought_cost, ZERO);
        assert_eq!(info.taxfree_bought_cost, ZERO);
        assert!(!info.is_complete);
        assert_eq!(messages.errors.len(), 1);
    }

    #[test]
    fn test_disabled_taxfree_period_makes_everything_taxable() {
        let mut calc = CostBasisCalculator::new(Asset::new("EUR"), None);
        add_lot(&mut calc, dec!(5), 1000, dec!(10), ZERO);
        let mut messages = MessagesAggregator::new();
        let info = calc.search_buys_calculate_profit(dec!(5), &btc(), 1_900_000_000, &mut messages);
        assert_eq!(info.taxable_amount, dec!(5));
        assert_eq!(info.taxfree_bought_cost, ZERO);
        assert_eq!(info.taxable_bought_cost, dec!(50));
    }

    #[test]
    fn test_reduce_asset_amount_without_history() {
        let mut calc = calculator();
        assert!(!calc.reduce_asset_amount(&btc(), dec!(1)));
        assert!(calc.reduce_asset_amount(&btc(), ZERO));
    }

    #[test]
    fn test_reduce_asset_amount_exact_and_partial() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(1), 1446979735, dec!(100), ZERO);
        add_lot(&mut calc, dec!(2), 1446979736, dec!(100), ZERO);
        assert!(calc.reduce_asset_amount(&btc(), dec!(1.5)));
        assert_eq!(lots(&calc), vec![dec!(1.5)]);
        assert!(calc.reduce_asset_amount(&btc(), dec!(1.5)));
        assert!(lots(&calc).is_empty());
    }

    #[test]
    fn test_reduce_asset_amount_more_than_available_still_drains() {
        // Failing reduction keeps its side effect: all lots are consumed.
        let mut calc = calculator();
        add_lot(&mut calc, dec!(1), 1446979735, dec!(100), ZERO);
        add_lot(&mut calc, dec!(2), 1446979736, dec!(100), ZERO);
        assert!(!calc.reduce_asset_amount(&btc(), dec!(4)));
        assert!(lots(&calc).is_empty());
        assert_eq!(calc.get_calculated_asset_amount(&btc()), None);
    }

    #[test]
    fn test_weth_shares_eth_cost_basis() {
        let mut calc = calculator();
        calc.obtain_asset(Location::External, 1000, "buy", &Asset::new("ETH"), dec!(2), dec!(100), dec!(1));
        assert_eq!(calc.get_calculated_asset_amount(&Asset::new("WETH")), Some(dec!(2)));
        assert!(calc.reduce_asset_amount(&Asset::new("WETH"), dec!(1)));
        assert_eq!(calc.get_calculated_asset_amount(&Asset::new("ETH")), Some(dec!(1)));
        let lot = &calc.events(&Asset::new("ETH")).unwrap().acquisitions[0];
        assert_eq!(lot.fee_rate, dec!(0.5));
    }

    #[test]
    fn test_calculate_asset_details() {
        let mut calc = calculator();
        add_lot(&mut calc, dec!(1), 1000, dec!(100), ZERO);
        add_lot(&mut calc, dec!(3), 1000 + YEAR_IN_SECONDS, dec!(200), ZERO);
        let details = calc.calculate_asset_details(1000 + YEAR_IN_SECONDS + 10);
        let btc_details = &details[&btc()];
        assert_eq!(btc_details.taxfree_amount_left, dec!(1));
        assert_eq!(btc_details.average_buy_rate, dec!(175));
    }
}
