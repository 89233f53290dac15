pub mod asset;
pub mod balance;
pub mod fval;
pub mod models;
pub mod repository;
