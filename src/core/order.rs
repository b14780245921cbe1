//! 订单类型定义
//!
//! 订单是成交的最小单元：准入通过后进入订单簿，市价单或穿越对手价的
//! 限价单在同一准入调用内立即执行成交。

use serde::{Deserialize, Serialize};

/// 买卖方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// 对手方向
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// 订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// 限价单
    Limit,
    /// 市价单（按对手最优价立即成交）
    Market,
}

/// 订单有效期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeInForce {
    /// 撤销前有效
    Gtc,
    /// 指定时刻前有效；准入时已过期的订单直接拒绝，不进簿
    Gtd { expires_at: i64 },
}

impl TimeInForce {
    /// 给定时刻是否已过期（仅 GTD 生效）
    pub fn is_expired(&self, now: i64) -> bool {
        match self {
            TimeInForce::Gtd { expires_at } => *expires_at <= now,
            TimeInForce::Gtc => false,
        }
    }
}

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 已进簿等待成交
    Resting,
    /// 全部成交
    Filled,
    /// 已撤单
    Cancelled,
}

/// 订单记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 订单ID（每市场单调递增）
    pub order_id: u64,

    /// 指标代码
    pub metric_id: String,

    /// 交易者身份
    pub trader: String,

    /// 买卖方向
    pub side: OrderSide,

    /// 数量（18位定点）
    pub quantity: u128,

    /// 价格（18位定点；市价单为成交时的对手最优价）
    pub price: u128,

    /// 订单类型
    pub order_type: OrderType,

    /// 有效期
    pub time_in_force: TimeInForce,

    /// 已成交数量
    pub filled_quantity: u128,

    /// 订单状态
    pub status: OrderStatus,

    /// 提交时间（Unix 秒）
    pub submitted_at: i64,

    /// 最后更新时间
    pub updated_at: i64,
}

impl Order {
    /// 剩余未成交数量
    pub fn remaining_quantity(&self) -> u128 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// 准入时是否已过期
    pub fn is_expired(&self, now: i64) -> bool {
        self.time_in_force.is_expired(now)
    }
}
