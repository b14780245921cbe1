//! # MEXCHANGE-RS
//!
//! 指标交易市场引擎 - 持仓生命周期与结算管线
//!
//! ## 核心能力
//!
//! - **订单准入**: 路由权限/tick对齐/数量边界/GTD过期校验
//! - **成交执行**: 单步全量成交、抵押品划拨、持仓创建
//! - **市场生命周期**: ACTIVE → SETTLEMENT_REQUESTED → SETTLED 状态机
//! - **预言机桥接**: 两阶段数据请求（request → settle），不阻塞等待
//! - **批量结算**: 全量校验后按仓位计算赔付、释放抵押品
//! - **事件广播**: 每个状态变更入口推送结构化事件
//!
//! ## 架构设计
//!
//! ```text
//! OrderRouter / SettlementEngine / MarketAdmin (exchange/)
//!     ↓
//! Market 聚合 (exchange/market.rs) ← MarketRegistry 持有
//!     ↓
//! OrderBook 协作方 (matching/) | OracleManager (oracle/)
//!     ↓                            ↓
//! CollateralLedger (ledger/)    OracleResolutionService (oracle/resolution.rs)
//! ```
//!
//! ## 精度约定
//!
//! 价格/数量/内部金额均为 18 位定点 u128（`PRICE_PRECISION = 1e18`），
//! 抵押账本使用代币原生精度；所有乘加运算溢出即中止操作，绝不饱和截断。

#![allow(dead_code)]

// ============================================================================
// 外部依赖
// ============================================================================

// 并发工具
pub use crossbeam;
pub use dashmap;
pub use parking_lot;

// 序列化
pub use serde;
pub use serde_json;

// 时间
pub use chrono;

// 日志
pub use log;

// 错误处理
pub use anyhow;
pub use thiserror;

// UUID
pub use uuid;

// ============================================================================
// 内部模块
// ============================================================================

/// 领域类型 - 订单与持仓
pub mod core;

/// 定点数学 - 精度转换/溢出防护/赔付计算
pub mod math;

/// 抵押账本边界 (外部协作方接口 + 内存参考实现)
pub mod ledger;

/// 订单簿协作方 (价格档位有序结构)
pub mod matching;

/// 预言机管理 - 指标配置/数据请求/历史值
pub mod oracle;

/// 市场引擎核心业务逻辑
pub mod exchange;

/// 市场事件广播系统
pub mod market;

/// 工具模块
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use crate::core::order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use crate::core::position::{Position, PositionDirection};
pub use crate::exchange::admin::MarketAdmin;
pub use crate::exchange::capability::{Capability, CapabilityRegistry};
pub use crate::exchange::market::{Market, MarketConfig, MarketState, MarketStats, SettlementInfo};
pub use crate::exchange::market_registry::MarketRegistry;
pub use crate::exchange::order_router::{OrderRouter, SubmitOrderRequest, SubmitOrderResponse};
pub use crate::exchange::settlement::SettlementEngine;
pub use crate::ledger::{CollateralLedger, InMemoryLedger};
pub use crate::market::broadcaster::{MarketEvent, MarketEventBroadcaster};
pub use crate::math::precision::PRICE_PRECISION;
pub use crate::oracle::manager::OracleManager;
pub use crate::oracle::resolution::{OracleResolutionService, SimulatedResolutionService};

// ============================================================================
// 全局错误类型
// ============================================================================

/// 交易所错误类型
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Capability denied: {0}")]
    CapabilityDenied(String),

    #[error("Market error: {0}")]
    MarketError(String),

    #[error("Order error: {0}")]
    OrderError(String),

    #[error("Position error: {0}")]
    PositionError(String),

    #[error("Settlement error: {0}")]
    SettlementError(String),

    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("Reentrant call: {0}")]
    ReentrantCall(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

// ============================================================================
// 测试模块
// ============================================================================
