//! 工具模块

pub mod config;

pub use config::{CollateralConfig, ExchangeConfig, MarketEntry, OracleConfig};
