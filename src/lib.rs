//! Balance aggregation and FIFO cost-basis profit/loss accounting for crypto
//! assets, served over a small HTTP API.

pub mod accounting;
pub mod api;
pub mod api_client;
pub mod balances;
pub mod config;
pub mod csv_history;
pub mod csv_store;
pub mod domain;
pub mod errors;
pub mod history;
pub mod infra;
pub mod price;
pub mod usecases;

#[cfg(test)]
mod tests;
