//! 交易引擎模块
//!
//! 市场生命周期的全部入口：订单路由、结算引擎、市场管理、权限与ID生成

pub mod admin;
pub mod capability;
pub mod id_generator;
pub mod market;
pub mod market_registry;
pub mod order_router;
pub mod settlement;

pub use admin::{MarketAdmin, MarketSummary};
pub use capability::{Capability, CapabilityRegistry};
pub use id_generator::MarketIdGenerator;
pub use market::{Market, MarketConfig, MarketState, MarketStats, SettlementInfo};
pub use market_registry::{MarketHandle, MarketRegistry, OperationGuard};
pub use order_router::{
    CancelOrderRequest, OrderRouter, OrderStatistics, SubmitOrderRequest, SubmitOrderResponse,
};
pub use settlement::{BatchSettlementResponse, SettlementEngine, MAX_SETTLEMENT_BATCH};
