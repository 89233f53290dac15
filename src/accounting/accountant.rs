use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::accounting::cost_basis::AssetDetails;
use crate::accounting::events::{BuyRecord, ProfitLossEvent, SellRecord, TaxableEvents};
use crate::config::AccountingSettings;
use crate::domain::asset::{Asset, TradeType};
use crate::domain::fval::{FVal, Timestamp, ZERO, is_close, timestamp_to_date, ts_now};
use crate::domain::models::{AssetMovement, EthereumTransaction, Loan, MarginPosition, Trade};
use crate::errors::{AccountingError, PriceError};
use crate::history::{HistoryAction, sort_by_timestamp};
use crate::price::PriceLookup;

/// Gas price assumed for transactions that did not report one, in wei.
pub const DEFAULT_GAS_PRICE_WEI: i64 = 2_000_000_000;

fn wei_per_eth() -> FVal {
    FVal::from(1_000_000_000_000_000_000_i64)
}

// cost and amount * rate may differ by rounding at the exchange
fn trade_cost_max_diff() -> FVal {
    FVal::new(1, 5)
}

fn checked_mul(a: FVal, b: FVal, what: &str) -> Result<FVal, AccountingError> {
    a.checked_mul(b)
        .ok_or_else(|| AccountingError::CorruptData(format!("{what} {a} * {b} is out of range")))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitLossOverview {
    pub loan_profit: FVal,
    pub margin_positions_profit: FVal,
    pub settlement_losses: FVal,
    pub ethereum_transaction_gas_costs: FVal,
    pub asset_movement_fees: FVal,
    pub general_trade_profit_loss: FVal,
    pub taxable_trade_profit_loss: FVal,
    pub total_taxable_profit_loss: FVal,
    pub total_profit_loss: FVal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitLossReport {
    pub start_ts: Timestamp,
    pub end_ts: Timestamp,
    pub profit_currency: Asset,
    pub overview: ProfitLossOverview,
    pub all_events: Vec<ProfitLossEvent>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProfitLossReport {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct Accountant {
    settings: AccountingSettings,
    events: TaxableEvents,
    ignored_assets: HashSet<Asset>,
    last_gas_price: FVal,
}

impl Accountant {
    pub fn new(settings: AccountingSettings, prices: Arc<dyn PriceLookup>) -> Result<Self, AccountingError> {
        if !settings.profit_currency.is_fiat() {
            return Err(AccountingError::UnsupportedProfitCurrency(
                settings.profit_currency.to_string(),
            ));
        }
        let events = TaxableEvents::new(
            prices,
            settings.profit_currency.clone(),
            settings.taxfree_after_period,
            settings.include_crypto2crypto,
        );
        let ignored_assets = settings.ignored_assets.iter().cloned().collect();
        Ok(Self {
            settings,
            events,
            ignored_assets,
            last_gas_price: FVal::from(DEFAULT_GAS_PRICE_WEI),
        })
    }

    /// Runs the whole history through the cost basis engine and returns the
    /// profit/loss of everything that happened between `start_ts` and `end_ts`.
    ///
    /// Actions before `start_ts` still build up the cost basis. A broken action
    /// is skipped with a user warning and never stops the run.
    pub fn process_history(
        &mut self,
        start_ts: Timestamp,
        end_ts: Timestamp,
        mut actions: Vec<HistoryAction>,
    ) -> ProfitLossReport {
        self.events.reset(start_ts, end_ts);
        self.last_gas_price = FVal::from(DEFAULT_GAS_PRICE_WEI);
        sort_by_timestamp(&mut actions);
        info!(
            start = %timestamp_to_date(start_ts),
            end = %timestamp_to_date(end_ts),
            actions = actions.len(),
            "Processing history",
        );

        let mut processed = 0usize;
        for action in &actions {
            let timestamp = action.timestamp();
            if timestamp > end_ts {
                break;
            }
            if self.is_ignored(action) {
                debug!(kind = action.kind(), timestamp, "Skipping action of ignored asset");
                continue;
            }
            if let Err(e) = self.process_action(action) {
                self.events.messages.add_warning(format!(
                    "Skipping {} at {} during history processing due to: {}",
                    action.kind(),
                    timestamp_to_date(timestamp),
                    e,
                ));
                continue;
            }
            processed += 1;
        }
        info!(processed, "History processing finished");

        self.build_report(start_ts, end_ts)
    }

    fn is_ignored(&self, action: &HistoryAction) -> bool {
        match action {
            HistoryAction::Trade(trade) => match trade.assets() {
                Ok((base, quote)) => {
                    self.ignored_assets.contains(&base) || self.ignored_assets.contains(&quote)
                }
                Err(_) => false,
            },
            other => other.assets().iter().any(|a| self.ignored_assets.contains(a)),
        }
    }

    fn process_action(&mut self, action: &HistoryAction) -> Result<(), AccountingError> {
        match action {
            HistoryAction::Trade(trade) => self.process_trade(trade),
            HistoryAction::Loan(loan) => self.process_loan(loan),
            HistoryAction::MarginPosition(margin) => self.process_margin_position(margin),
            HistoryAction::AssetMovement(movement) => self.process_asset_movement(movement),
            HistoryAction::EthereumTransaction(tx) => self.process_transaction(tx),
        }
    }

    fn fee_in_profit_currency(&self, trade: &Trade) -> Result<FVal, PriceError> {
        self.events
            .fee_in_profit_currency(trade.fee, &trade.fee_currency, trade.timestamp)
    }

    fn process_trade(&mut self, trade: &Trade) -> Result<(), AccountingError> {
        let expected_cost = checked_mul(trade.amount, trade.rate, "trade amount times rate")?;
        if !is_close(trade.cost, expected_cost, trade_cost_max_diff()) {
            return Err(AccountingError::CorruptData(format!(
                "trade cost {} does not match amount {} times rate {}",
                trade.cost, trade.amount, trade.rate
            )));
        }
        let other_asset = trade
            .other_asset()
            .map_err(|e| AccountingError::CorruptData(e.to_string()))?;

        match trade.trade_type {
            TradeType::Buy => {
                let buy = BuyRecord {
                    location: trade.location,
                    bought_asset: other_asset,
                    bought_amount: trade.amount,
                    paid_with_asset: trade.cost_currency.clone(),
                    trade_rate: trade.rate,
                    fee: trade.fee,
                    fee_currency: trade.fee_currency.clone(),
                    timestamp: trade.timestamp,
                };
                self.events.add_buy_and_corresponding_sell(&buy)?;
            }
            TradeType::Sell | TradeType::SettlementSell => {
                let selling_asset_rate = self
                    .events
                    .get_rate_in_profit_currency(&trade.cost_currency, trade.timestamp)?;
                let selling_rate = checked_mul(selling_asset_rate, trade.rate, "selling rate")?;
                let sell = SellRecord {
                    location: trade.location,
                    selling_asset: other_asset,
                    selling_amount: trade.amount,
                    receiving_asset: Some(trade.cost_currency.clone()),
                    receiving_amount: trade.cost,
                    gain_in_profit_currency: checked_mul(selling_rate, trade.amount, "sell gain")?,
                    total_fee_in_profit_currency: self.fee_in_profit_currency(trade)?,
                    trade_rate: trade.rate,
                    rate_in_profit_currency: selling_rate,
                    timestamp: trade.timestamp,
                };
                self.events.add_sell_and_corresponding_buy(&sell)?;
            }
            TradeType::SettlementBuy => {
                // The cost currency is forcefully sold to cover a closed loan or margin position
                let rate = self
                    .events
                    .get_rate_in_profit_currency(&trade.cost_currency, trade.timestamp)?;
                let sell = SellRecord {
                    location: trade.location,
                    selling_asset: trade.cost_currency.clone(),
                    selling_amount: trade.cost,
                    receiving_asset: None,
                    receiving_amount: ZERO,
                    gain_in_profit_currency: checked_mul(rate, trade.cost, "settlement gain")?,
                    total_fee_in_profit_currency: self.fee_in_profit_currency(trade)?,
                    trade_rate: trade.rate,
                    rate_in_profit_currency: rate,
                    timestamp: trade.timestamp,
                };
                self.events.add_sell(&sell, true, false);
            }
        }
        Ok(())
    }

    fn process_loan(&mut self, loan: &Loan) -> Result<(), AccountingError> {
        self.events
            .add_loan_gain(loan.location, &loan.currency, loan.earned, loan.fee, loan.close_time)?;
        Ok(())
    }

    fn process_margin_position(&mut self, margin: &MarginPosition) -> Result<(), AccountingError> {
        self.events.add_margin_position(
            margin.location,
            &margin.pl_currency,
            margin.profit_loss,
            ZERO,
            margin.close_time,
        )?;
        Ok(())
    }

    fn process_asset_movement(&mut self, movement: &AssetMovement) -> Result<(), AccountingError> {
        self.events
            .add_asset_movement_fee(movement.location, &movement.asset, movement.fee, movement.timestamp)?;
        Ok(())
    }

    fn process_transaction(&mut self, tx: &EthereumTransaction) -> Result<(), AccountingError> {
        let gas_price = match tx.gas_price {
            Some(price) => {
                self.last_gas_price = price;
                price
            }
            None => self.last_gas_price,
        };
        let eth_burned_as_gas = checked_mul(tx.gas_used, gas_price, "gas used times gas price")? / wei_per_eth();
        self.events.add_tx_gas_cost(eth_burned_as_gas, tx.timestamp)?;
        Ok(())
    }

    fn build_report(&self, start_ts: Timestamp, end_ts: Timestamp) -> ProfitLossReport {
        let ev = &self.events;
        let sum_other_actions = ev.loan_profit + ev.margin_positions_profit_loss
            - ev.settlement_losses
            - ev.asset_movement_fees
            - ev.eth_transactions_gas_costs;
        let overview = ProfitLossOverview {
            loan_profit: ev.loan_profit,
            margin_positions_profit: ev.margin_positions_profit_loss,
            settlement_losses: ev.settlement_losses,
            ethereum_transaction_gas_costs: ev.eth_transactions_gas_costs,
            asset_movement_fees: ev.asset_movement_fees,
            general_trade_profit_loss: ev.general_trade_profit_loss,
            taxable_trade_profit_loss: ev.taxable_trade_profit_loss,
            total_taxable_profit_loss: sum_other_actions + ev.taxable_trade_profit_loss,
            total_profit_loss: sum_other_actions + ev.general_trade_profit_loss,
        };
        ProfitLossReport {
            start_ts,
            end_ts,
            profit_currency: self.settings.profit_currency.clone(),
            overview,
            all_events: ev.events.clone(),
            warnings: ev.messages.warnings.clone(),
            errors: ev.messages.errors.clone(),
        }
    }

    /// Tax-free amount left and average buy rate per asset, as of now.
    pub fn calculate_asset_details(&self) -> BTreeMap<Asset, AssetDetails> {
        self.events.cost_basis.calculate_asset_details(ts_now())
    }
}
