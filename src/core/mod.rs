pub mod adapter;
pub mod cache;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod market_data;
pub mod order_book;
pub mod status;
pub mod symbols;
pub mod tracker;
pub mod traits;
pub mod types;
pub mod user_stream;
