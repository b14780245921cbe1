//! 市场事件模块
//!
//! 订单生命周期、结算进度与管理操作的事件广播

pub mod broadcaster;

pub use broadcaster::{MarketEvent, MarketEventBroadcaster};
