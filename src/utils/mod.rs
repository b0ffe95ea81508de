pub mod exchange_factory;
pub mod rate_source;
