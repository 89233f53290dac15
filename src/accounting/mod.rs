pub mod accountant;
pub mod cost_basis;
pub mod events;
pub mod messages;

pub use accountant::{Accountant, ProfitLossOverview, ProfitLossReport};
pub use messages::MessagesAggregator;
