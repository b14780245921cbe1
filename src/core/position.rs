//! 持仓类型定义
//!
//! 每次成交创建且仅创建一个持仓记录（本系统不合并成交）。
//! 抵押品在创建时于抵押账本划拨，结算时恰好释放一次。

use serde::{Deserialize, Serialize};

use crate::core::order::OrderSide;

/// 持仓方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionDirection {
    Long,
    Short,
}

impl From<OrderSide> for PositionDirection {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionDirection::Long,
            OrderSide::Sell => PositionDirection::Short,
        }
    }
}

/// 持仓记录
///
/// 生命周期：成交创建 → 结算读取 → 恰好一次标记结算（记录赔付）→ 永不删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 持仓ID（每市场单调递增）
    pub position_id: u64,

    /// 持有人
    pub owner: String,

    /// 多空方向
    pub direction: PositionDirection,

    /// 数量（18位定点）
    pub quantity: u128,

    /// 开仓价（18位定点）
    pub entry_price: u128,

    /// 划拨的抵押品（抵押账本原生精度，非内部18位精度）
    pub collateral: u128,

    /// 来源订单ID
    pub order_id: u64,

    /// 是否已结算
    pub is_settled: bool,

    /// 赔付金额（原生精度，结算时写入）
    pub payout: u128,

    /// 带符号盈亏（18位定点，结算时写入）
    pub pnl: i128,

    /// 开仓时间（Unix 秒）
    pub opened_at: i64,

    /// 结算时间
    pub settled_at: Option<i64>,
}

impl Position {
    pub fn new(
        position_id: u64,
        owner: String,
        side: OrderSide,
        quantity: u128,
        entry_price: u128,
        collateral: u128,
        order_id: u64,
        now: i64,
    ) -> Self {
        Self {
            position_id,
            owner,
            direction: side.into(),
            quantity,
            entry_price,
            collateral,
            order_id,
            is_settled: false,
            payout: 0,
            pnl: 0,
            opened_at: now,
            settled_at: None,
        }
    }
}
