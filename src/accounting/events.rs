//! Taxable events: turns buys, sells, loans, margin positions and fees into
//! cost basis updates and running profit/loss totals in the profit currency.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::accounting::cost_basis::CostBasisCalculator;
use crate::accounting::messages::MessagesAggregator;
use crate::domain::asset::{Asset, Location};
use crate::domain::fval::{FVal, ONE, Timestamp, ZERO, timestamp_to_date};
use crate::errors::PriceError;
use crate::price::PriceLookup;

/// Holding ETH before this time also means holding the same amount of ETC.
pub const ETH_DAO_FORK_TS: Timestamp = 1469020840;
/// Holding BTC before this time also means holding the same amount of BCH.
pub const BTC_BCH_FORK_TS: Timestamp = 1501593374;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Buy,
    Sell,
    TxGasCost,
    AssetMovement,
    LoanSettlement,
    InterestRatePayment,
    MarginPositionClose,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Buy => "buy",
            EventType::Sell => "sell",
            EventType::TxGasCost => "tx_gas_cost",
            EventType::AssetMovement => "asset_movement",
            EventType::LoanSettlement => "loan_settlement",
            EventType::InterestRatePayment => "interest_rate_payment",
            EventType::MarginPositionClose => "margin_position_close",
        }
    }
}

/// One row of the profit/loss report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitLossEvent {
    pub event_type: EventType,
    pub location: Location,
    pub paid_in_profit_currency: FVal,
    pub paid_asset: Option<Asset>,
    pub paid_in_asset: FVal,
    pub taxable_amount: FVal,
    pub taxable_bought_cost_in_profit_currency: FVal,
    pub received_asset: Option<Asset>,
    pub taxable_received_in_profit_currency: FVal,
    pub received_in_asset: FVal,
    pub net_profit_or_loss: FVal,
    pub time: Timestamp,
    pub is_virtual: bool,
    pub cost_basis: Option<Value>,
}

impl ProfitLossEvent {
    fn empty(event_type: EventType, location: Location, time: Timestamp) -> Self {
        Self {
            event_type,
            location,
            paid_in_profit_currency: ZERO,
            paid_asset: None,
            paid_in_asset: ZERO,
            taxable_amount: ZERO,
            taxable_bought_cost_in_profit_currency: ZERO,
            received_asset: None,
            taxable_received_in_profit_currency: ZERO,
            received_in_asset: ZERO,
            net_profit_or_loss: ZERO,
            time,
            is_virtual: false,
            cost_basis: None,
        }
    }
}

/// `bought_amount` of `bought_asset` paid for with `paid_with_asset`, at
/// `trade_rate` units of `paid_with_asset` per unit bought.
#[derive(Debug, Clone)]
pub struct BuyRecord {
    pub location: Location,
    pub bought_asset: Asset,
    pub bought_amount: FVal,
    pub paid_with_asset: Asset,
    pub trade_rate: FVal,
    pub fee: FVal,
    pub fee_currency: Asset,
    pub timestamp: Timestamp,
}

/// `selling_amount` of `selling_asset` given away for `receiving_amount` of
/// `receiving_asset`. `receiving_asset` is `None` for loan settlements.
#[derive(Debug, Clone)]
pub struct SellRecord {
    pub location: Location,
    pub selling_asset: Asset,
    pub selling_amount: FVal,
    pub receiving_asset: Option<Asset>,
    pub receiving_amount: FVal,
    /// Profit currency received, fees not counted.
    pub gain_in_profit_currency: FVal,
    pub total_fee_in_profit_currency: FVal,
    /// Units of `receiving_asset` per unit of `selling_asset`.
    pub trade_rate: FVal,
    /// Profit currency per unit of `selling_asset`.
    pub rate_in_profit_currency: FVal,
    pub timestamp: Timestamp,
}

/// Taxable part of a sell's gain: the taxable share of the proceeds minus the
/// matching share of the fee.
pub fn taxable_gain_for_sell(
    taxable_amount: FVal,
    rate_in_profit_currency: FVal,
    total_fee_in_profit_currency: FVal,
    selling_amount: FVal,
) -> FVal {
    let fee_share = if selling_amount.is_zero() {
        ZERO
    } else {
        total_fee_in_profit_currency * (taxable_amount / selling_amount)
    };
    rate_in_profit_currency * taxable_amount - fee_share
}

pub struct TaxableEvents {
    prices: Arc<dyn PriceLookup>,
    pub cost_basis: CostBasisCalculator,
    pub profit_currency: Asset,
    pub include_crypto2crypto: bool,
    query_start_ts: Timestamp,
    query_end_ts: Timestamp,

    pub general_trade_profit_loss: FVal,
    pub taxable_trade_profit_loss: FVal,
    pub loan_profit: FVal,
    pub settlement_losses: FVal,
    pub margin_positions_profit_loss: FVal,
    pub asset_movement_fees: FVal,
    pub eth_transactions_gas_costs: FVal,

    pub events: Vec<ProfitLossEvent>,
    pub messages: MessagesAggregator,
}

impl TaxableEvents {
    pub fn new(
        prices: Arc<dyn PriceLookup>,
        profit_currency: Asset,
        taxfree_after_period: Option<i64>,
        include_crypto2crypto: bool,
    ) -> Self {
        Self {
            prices,
            cost_basis: CostBasisCalculator::new(profit_currency.clone(), taxfree_after_period),
            profit_currency,
            include_crypto2crypto,
            query_start_ts: 0,
            query_end_ts: 0,
            general_trade_profit_loss: ZERO,
            taxable_trade_profit_loss: ZERO,
            loan_profit: ZERO,
            settlement_losses: ZERO,
            margin_positions_profit_loss: ZERO,
            asset_movement_fees: ZERO,
            eth_transactions_gas_costs: ZERO,
            events: Vec::new(),
            messages: MessagesAggregator::new(),
        }
    }

    pub fn reset(&mut self, start_ts: Timestamp, end_ts: Timestamp) {
        self.cost_basis.reset(self.profit_currency.clone());
        self.query_start_ts = start_ts;
        self.query_end_ts = end_ts;
        self.general_trade_profit_loss = ZERO;
        self.taxable_trade_profit_loss = ZERO;
        self.loan_profit = ZERO;
        self.settlement_losses = ZERO;
        self.margin_positions_profit_loss = ZERO;
        self.asset_movement_fees = ZERO;
        self.eth_transactions_gas_costs = ZERO;
        self.events.clear();
        self.messages = MessagesAggregator::new();
    }

    fn in_query_period(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.query_start_ts && timestamp <= self.query_end_ts
    }

    pub fn get_rate_in_profit_currency(&self, asset: &Asset, timestamp: Timestamp) -> Result<FVal, PriceError> {
        if *asset == self.profit_currency {
            return Ok(ONE);
        }
        self.prices
            .query_historical_price(asset, &self.profit_currency, timestamp)
    }

    // Buying before a chain split also gets you the forked coin at the same cost.
    fn handle_prefork_acquisitions(&mut self, buy: &BuyRecord, buy_rate: FVal) {
        let forked = match buy.bought_asset.identifier() {
            "ETH" if buy.timestamp < ETH_DAO_FORK_TS => "ETC",
            "BTC" if buy.timestamp < BTC_BCH_FORK_TS => "BCH",
            _ => return,
        };
        let virtual_buy = BuyRecord {
            bought_asset: Asset::new(forked),
            fee: ZERO,
            ..buy.clone()
        };
        self.record_buy(&virtual_buy, buy_rate, ZERO, true);
    }

    // Spending before a chain split also spends the forked coin.
    fn handle_prefork_spends(&mut self, asset: &Asset, amount: FVal, timestamp: Timestamp) {
        let forked = match asset.identifier() {
            "ETH" if timestamp < ETH_DAO_FORK_TS => "ETC",
            "BTC" if timestamp < BTC_BCH_FORK_TS => "BCH",
            _ => return,
        };
        if !self.cost_basis.reduce_asset_amount(&Asset::new(forked), amount) {
            debug!(asset = forked, amount = %amount, "Not enough prefork acquisitions to reduce");
        }
    }

    pub(crate) fn fee_in_profit_currency(&self, fee: FVal, fee_currency: &Asset, timestamp: Timestamp) -> Result<FVal, PriceError> {
        if fee.is_zero() {
            return Ok(ZERO);
        }
        Ok(self.get_rate_in_profit_currency(fee_currency, timestamp)? * fee)
    }

    pub fn add_buy(&mut self, buy: &BuyRecord, is_virtual: bool) -> Result<(), PriceError> {
        let paid_with_asset_rate = self.get_rate_in_profit_currency(&buy.paid_with_asset, buy.timestamp)?;
        let fee_cost = self.fee_in_profit_currency(buy.fee, &buy.fee_currency, buy.timestamp)?;
        self.record_buy(buy, paid_with_asset_rate * buy.trade_rate, fee_cost, is_virtual);
        Ok(())
    }

    // All prices are already resolved here, so recording a buy cannot fail.
    fn record_buy(&mut self, buy: &BuyRecord, buy_rate: FVal, fee_cost: FVal, is_virtual: bool) {
        self.handle_prefork_acquisitions(buy, buy_rate);

        let gross_cost = buy.bought_amount * buy_rate;
        let cost = gross_cost + fee_cost;
        let description = if is_virtual { "virtual buy" } else { "buy" };
        self.cost_basis.obtain_asset(
            buy.location,
            buy.timestamp,
            description,
            &buy.bought_asset,
            buy.bought_amount,
            buy_rate,
            fee_cost,
        );
        debug!(
            bought_amount = %buy.bought_amount,
            bought_asset = %buy.bought_asset,
            paid_amount = %(buy.bought_amount * buy.trade_rate),
            paid_with = %buy.paid_with_asset,
            rate_in_profit_currency = %buy_rate,
            is_virtual,
            time = %timestamp_to_date(buy.timestamp),
            "Buying",
        );

        if self.in_query_period(buy.timestamp) {
            self.events.push(ProfitLossEvent {
                paid_in_profit_currency: cost,
                paid_asset: Some(buy.paid_with_asset.clone()),
                paid_in_asset: buy.bought_amount * buy.trade_rate,
                received_asset: Some(buy.bought_asset.clone()),
                received_in_asset: buy.bought_amount,
                is_virtual,
                ..ProfitLossEvent::empty(EventType::Buy, buy.location, buy.timestamp)
            });
        }
    }

    /// Records a buy and, for crypto-to-crypto trades, the implied sell of the
    /// asset paid with. The sell is valued with whichever side gives less gain.
    ///
    /// Every price is looked up before anything is recorded, so on error the
    /// trade leaves no trace.
    pub fn add_buy_and_corresponding_sell(&mut self, buy: &BuyRecord) -> Result<(), PriceError> {
        let sold_asset_rate = self.get_rate_in_profit_currency(&buy.paid_with_asset, buy.timestamp)?;
        let fee_in_profit_currency = self.fee_in_profit_currency(buy.fee, &buy.fee_currency, buy.timestamp)?;
        self.record_buy(buy, sold_asset_rate * buy.trade_rate, fee_in_profit_currency, false);

        if buy.paid_with_asset.is_fiat() || !self.include_crypto2crypto {
            return Ok(());
        }

        // Token sales and presales may have no price for the bought asset yet
        let bought_asset_rate = self
            .get_rate_in_profit_currency(&buy.bought_asset, buy.timestamp)
            .ok();
        let sold_amount = buy.trade_rate * buy.bought_amount;
        let with_sold_asset_gain = sold_asset_rate * sold_amount;

        let (receiving_asset, receiving_amount, trade_rate, rate_in_profit_currency, gain) =
            match bought_asset_rate {
                Some(rate) if rate * buy.bought_amount <= with_sold_asset_gain && !buy.trade_rate.is_zero() => (
                    buy.bought_asset.clone(),
                    buy.bought_amount,
                    ONE / buy.trade_rate,
                    rate / buy.trade_rate,
                    rate * buy.bought_amount,
                ),
                _ => (
                    self.profit_currency.clone(),
                    with_sold_asset_gain,
                    sold_asset_rate,
                    sold_asset_rate,
                    with_sold_asset_gain,
                ),
            };

        let sell = SellRecord {
            location: buy.location,
            selling_asset: buy.paid_with_asset.clone(),
            selling_amount: sold_amount,
            receiving_asset: Some(receiving_asset),
            receiving_amount,
            gain_in_profit_currency: gain,
            total_fee_in_profit_currency: fee_in_profit_currency,
            trade_rate,
            rate_in_profit_currency,
            timestamp: buy.timestamp,
        };
        self.add_sell(&sell, false, true);
        Ok(())
    }

    /// Records a sell and, when receiving crypto, the implied buy of it.
    /// The buy's price is looked up first, so on error nothing is recorded.
    pub fn add_sell_and_corresponding_buy(&mut self, sell: &SellRecord) -> Result<(), PriceError> {
        let virtual_buy = match &sell.receiving_asset {
            Some(receiving_asset)
                if !receiving_asset.is_fiat() && self.include_crypto2crypto && !sell.trade_rate.is_zero() =>
            {
                let selling_asset_rate = self.get_rate_in_profit_currency(&sell.selling_asset, sell.timestamp)?;
                let trade_rate = ONE / sell.trade_rate;
                // TODO: the virtual buy does not carry a share of the trade fee yet
                let buy = BuyRecord {
                    location: sell.location,
                    bought_asset: receiving_asset.clone(),
                    bought_amount: sell.receiving_amount,
                    paid_with_asset: sell.selling_asset.clone(),
                    trade_rate,
                    fee: ZERO,
                    fee_currency: receiving_asset.clone(),
                    timestamp: sell.timestamp,
                };
                Some((buy, selling_asset_rate * trade_rate))
            }
            _ => None,
        };

        self.add_sell(sell, false, false);
        if let Some((buy, buy_rate)) = virtual_buy {
            self.record_buy(&buy, buy_rate, ZERO, true);
        }
        Ok(())
    }

    pub fn add_sell(&mut self, sell: &SellRecord, loan_settlement: bool, is_virtual: bool) {
        self.cost_basis.spend_asset(
            sell.location,
            sell.timestamp,
            &sell.selling_asset,
            sell.selling_amount,
            sell.rate_in_profit_currency,
            sell.total_fee_in_profit_currency,
            sell.gain_in_profit_currency,
        );
        debug!(
            selling_amount = %sell.selling_amount,
            selling_asset = %sell.selling_asset,
            receiving_amount = %sell.receiving_amount,
            receiving_asset = ?sell.receiving_asset.as_ref().map(Asset::identifier),
            rate_in_profit_currency = %sell.rate_in_profit_currency,
            gain = %sell.gain_in_profit_currency,
            fee = %sell.total_fee_in_profit_currency,
            loan_settlement,
            time = %timestamp_to_date(sell.timestamp),
            "Selling",
        );

        self.handle_prefork_spends(&sell.selling_asset, sell.selling_amount, sell.timestamp);
        let info = self.cost_basis.search_buys_calculate_profit(
            sell.selling_amount,
            &sell.selling_asset,
            sell.timestamp,
            &mut self.messages,
        );

        // Without crypto2crypto a sell for crypto only moves the cost basis
        if let Some(receiving) = &sell.receiving_asset {
            if !receiving.is_fiat() && !self.include_crypto2crypto {
                return;
            }
        }

        let mut general_profit_loss = ZERO;
        let mut taxable_profit_loss = ZERO;
        let mut taxable_gain = ZERO;
        if !loan_settlement {
            taxable_gain = taxable_gain_for_sell(
                info.taxable_amount,
                sell.rate_in_profit_currency,
                sell.total_fee_in_profit_currency,
                sell.selling_amount,
            );
            general_profit_loss = sell.gain_in_profit_currency
                - (info.taxfree_bought_cost + info.taxable_bought_cost + sell.total_fee_in_profit_currency);
            taxable_profit_loss = taxable_gain - info.taxable_bought_cost;
        }

        if !self.in_query_period(sell.timestamp) {
            return;
        }

        if loan_settlement {
            let settlement_loss = sell.gain_in_profit_currency + sell.total_fee_in_profit_currency;
            self.settlement_losses += settlement_loss;
            debug!(loss = %settlement_loss, currency = %self.profit_currency, "Loan settlement loss");
            self.events.push(ProfitLossEvent {
                paid_in_profit_currency: settlement_loss,
                paid_asset: Some(sell.selling_asset.clone()),
                paid_in_asset: sell.selling_amount,
                net_profit_or_loss: -settlement_loss,
                cost_basis: Some(info.serialize()),
                ..ProfitLossEvent::empty(EventType::LoanSettlement, sell.location, sell.timestamp)
            });
        } else {
            debug!(
                taxable_pl = %taxable_profit_loss,
                general_pl = %general_profit_loss,
                currency = %self.profit_currency,
                "Sell profit/loss",
            );
            self.events.push(ProfitLossEvent {
                paid_asset: Some(sell.selling_asset.clone()),
                paid_in_asset: sell.selling_amount,
                taxable_amount: info.taxable_amount,
                taxable_bought_cost_in_profit_currency: info.taxable_bought_cost,
                received_asset: sell.receiving_asset.clone(),
                taxable_received_in_profit_currency: taxable_gain,
                received_in_asset: sell.receiving_amount,
                net_profit_or_loss: taxable_profit_loss,
                is_virtual,
                cost_basis: Some(info.serialize()),
                ..ProfitLossEvent::empty(EventType::Sell, sell.location, sell.timestamp)
            });
        }

        self.general_trade_profit_loss += general_profit_loss;
        self.taxable_trade_profit_loss += taxable_profit_loss;
    }

    /// Interest earned from lending. The net gain becomes a zero-cost acquisition.
    pub fn add_loan_gain(
        &mut self,
        location: Location,
        gained_asset: &Asset,
        gained_amount: FVal,
        fee_in_asset: FVal,
        close_time: Timestamp,
    ) -> Result<(), PriceError> {
        let rate = self.get_rate_in_profit_currency(gained_asset, close_time)?;
        let net_gain_amount = gained_amount - fee_in_asset;
        if net_gain_amount <= ZERO {
            self.messages.add_warning(format!(
                "Ignoring loan of {} closed at {} with non positive net gain {}",
                gained_asset,
                timestamp_to_date(close_time),
                net_gain_amount,
            ));
            return Ok(());
        }
        let gain_in_profit_currency = net_gain_amount * rate;
        self.cost_basis.obtain_asset(
            location,
            close_time,
            "loan gain",
            gained_asset,
            net_gain_amount,
            ZERO,
            ZERO,
        );

        if self.in_query_period(close_time) {
            self.loan_profit += gain_in_profit_currency;
            self.events.push(ProfitLossEvent {
                received_asset: Some(gained_asset.clone()),
                taxable_received_in_profit_currency: gain_in_profit_currency,
                received_in_asset: gained_amount,
                net_profit_or_loss: gain_in_profit_currency,
                ..ProfitLossEvent::empty(EventType::InterestRatePayment, location, close_time)
            });
        }
        Ok(())
    }

    /// A closed margin position. A gain is a zero-cost acquisition, a loss
    /// consumes holdings of the asset.
    pub fn add_margin_position(
        &mut self,
        location: Location,
        gained_asset: &Asset,
        gained_amount: FVal,
        fee_in_asset: FVal,
        timestamp: Timestamp,
    ) -> Result<(), PriceError> {
        let rate = self.get_rate_in_profit_currency(gained_asset, timestamp)?;
        let net_gain_amount = gained_amount - fee_in_asset;
        let gain_in_profit_currency = net_gain_amount * rate;

        if net_gain_amount > ZERO {
            self.cost_basis.obtain_asset(
                location,
                timestamp,
                "margin position gain",
                gained_asset,
                net_gain_amount,
                ZERO,
                ZERO,
            );
        } else if !self.cost_basis.reduce_asset_amount(gained_asset, -net_gain_amount) {
            debug!(asset = %gained_asset, amount = %net_gain_amount, "Margin loss exceeds documented holdings");
        }

        if self.in_query_period(timestamp) {
            self.margin_positions_profit_loss += gain_in_profit_currency;
            self.events.push(ProfitLossEvent {
                received_asset: Some(gained_asset.clone()),
                taxable_received_in_profit_currency: gain_in_profit_currency,
                received_in_asset: net_gain_amount,
                net_profit_or_loss: gain_in_profit_currency,
                ..ProfitLossEvent::empty(EventType::MarginPositionClose, location, timestamp)
            });
        }
        Ok(())
    }

    pub fn add_asset_movement_fee(
        &mut self,
        location: Location,
        asset: &Asset,
        fee: FVal,
        timestamp: Timestamp,
    ) -> Result<(), PriceError> {
        if fee.is_zero() || !self.in_query_period(timestamp) {
            return Ok(());
        }
        let rate = self.get_rate_in_profit_currency(asset, timestamp)?;
        let cost = rate * fee;
        self.asset_movement_fees += cost;
        self.events.push(ProfitLossEvent {
            paid_in_profit_currency: cost,
            paid_asset: Some(asset.clone()),
            paid_in_asset: fee,
            net_profit_or_loss: -cost,
            ..ProfitLossEvent::empty(EventType::AssetMovement, location, timestamp)
        });
        Ok(())
    }

    pub fn add_tx_gas_cost(&mut self, eth_burned_as_gas: FVal, timestamp: Timestamp) -> Result<(), PriceError> {
        if !self.in_query_period(timestamp) {
            return Ok(());
        }
        let eth = Asset::new("ETH");
        let rate = self.get_rate_in_profit_currency(&eth, timestamp)?;
        let cost = eth_burned_as_gas * rate;
        self.eth_transactions_gas_costs += cost;
        self.events.push(ProfitLossEvent {
            paid_in_profit_currency: cost,
            paid_asset: Some(eth),
            paid_in_asset: eth_burned_as_gas,
            net_profit_or_loss: -cost,
            ..ProfitLossEvent::empty(EventType::TxGasCost, Location::Blockchain, timestamp)
        });
        Ok(())
    }
}
