pub mod historian;

use serde::{Deserialize, Serialize};

use crate::domain::asset::Asset;
use crate::domain::fval::Timestamp;
use crate::domain::models::{AssetMovement, EthereumTransaction, Loan, MarginPosition, Trade};

/// Anything that can be ordered on the history timeline.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl Timestamped for Trade {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Timestamped for AssetMovement {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Timestamped for EthereumTransaction {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

// Loans and margin positions are placed on the timeline when they close.
impl Timestamped for Loan {
    fn timestamp(&self) -> Timestamp {
        self.close_time
    }
}

impl Timestamped for MarginPosition {
    fn timestamp(&self) -> Timestamp {
        self.close_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum HistoryAction {
    Trade(Trade),
    Loan(Loan),
    MarginPosition(MarginPosition),
    AssetMovement(AssetMovement),
    EthereumTransaction(EthereumTransaction),
}

impl HistoryAction {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            HistoryAction::Trade(t) => t.timestamp(),
            HistoryAction::Loan(l) => l.timestamp(),
            HistoryAction::MarginPosition(m) => m.timestamp(),
            HistoryAction::AssetMovement(m) => m.timestamp(),
            HistoryAction::EthereumTransaction(tx) => tx.timestamp(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HistoryAction::Trade(_) => "trade",
            HistoryAction::Loan(_) => "loan",
            HistoryAction::MarginPosition(_) => "margin_position",
            HistoryAction::AssetMovement(_) => "asset_movement",
            HistoryAction::EthereumTransaction(_) => "ethereum_transaction",
        }
    }

    /// Assets whose price is needed to account for this action.
    pub fn assets(&self) -> Vec<Asset> {
        match self {
            HistoryAction::Trade(t) => {
                let mut assets = match t.assets() {
                    Ok((base, quote)) => vec![base, quote],
                    Err(_) => Vec::new(),
                };
                if !t.fee.is_zero() && !assets.contains(&t.fee_currency) {
                    assets.push(t.fee_currency.clone());
                }
                assets
            }
            HistoryAction::Loan(l) => vec![l.currency.clone()],
            HistoryAction::MarginPosition(m) => vec![m.pl_currency.clone()],
            HistoryAction::AssetMovement(m) => vec![m.asset.clone()],
            HistoryAction::EthereumTransaction(_) => vec![Asset::new("ETH")],
        }
    }
}

impl Timestamped for HistoryAction {
    fn timestamp(&self) -> Timestamp {
        HistoryAction::timestamp(self)
    }
}

pub fn sort_by_timestamp<T: Timestamped>(items: &mut [T]) {
    items.sort_by_key(|item| item.timestamp());
}

/// Restricts an ascending list to the items with `start_ts <= ts <= end_ts`.
///
/// Single forward scan; the list is assumed sorted, so the result is the
/// contiguous run between the first item at or after `start_ts` and the last
/// item at or before `end_ts`.
pub fn limit_trade_list_to_period<T: Timestamped>(
    list: &[T],
    start_ts: Timestamp,
    end_ts: Timestamp,
) -> &[T] {
    let mut start_idx = None;
    let mut end_idx = list.len();
    for (idx, item) in list.iter().enumerate() {
        let ts = item.timestamp();
        match start_idx {
            None if ts >= start_ts => {
                if ts > end_ts {
                    return &[];
                }
                start_idx = Some(idx);
            }
            Some(_) if ts > end_ts => {
                end_idx = idx;
                break;
            }
            _ => {}
        }
    }

    match start_idx {
        Some(s) => &list[s..end_idx],
        None => &[],
    }
}
