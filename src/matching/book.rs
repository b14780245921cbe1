//! 价格档位订单簿
//!
//! 基于 BTreeMap 的双边档位结构：买方取最高价、卖方取最低价。
//! 只维护排序与量的聚合，不做撮合遍历。

use std::collections::{BTreeMap, HashMap};

use crate::core::order::OrderSide;

/// 订单簿接口（外部协作方边界）
pub trait OrderBook: Send + Sync {
    /// 插入挂单
    fn insert(&mut self, order_id: u64, side: OrderSide, price: u128, quantity: u128);

    /// 移除挂单，返回是否存在
    fn remove(&mut self, order_id: u64) -> bool;

    /// 最优买价
    fn best_bid(&self) -> Option<u128>;

    /// 最优卖价
    fn best_ask(&self) -> Option<u128>;

    /// 买卖价差（任一侧为空时为 None）
    fn spread(&self) -> Option<u128>;

    /// 单侧挂单总量
    fn resting_volume(&self, side: OrderSide) -> u128;

    /// 清空订单簿，返回被丢弃的订单ID
    fn clear(&mut self) -> Vec<u64>;

    /// 挂单总数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 档位记录
#[derive(Debug, Clone, Copy)]
struct RestingOrder {
    side: OrderSide,
    price: u128,
    quantity: u128,
}

/// BTreeMap 档位订单簿
#[derive(Default)]
pub struct LevelBook {
    /// 买方档位 (price -> order_ids，同价按时间先后)
    bids: BTreeMap<u128, Vec<u64>>,

    /// 卖方档位
    asks: BTreeMap<u128, Vec<u64>>,

    /// 订单索引
    index: HashMap<u64, RestingOrder>,
}

impl LevelBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn side_levels(&mut self, side: OrderSide) -> &mut BTreeMap<u128, Vec<u64>> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }
}

impl OrderBook for LevelBook {
    fn insert(&mut self, order_id: u64, side: OrderSide, price: u128, quantity: u128) {
        self.index.insert(order_id, RestingOrder { side, price, quantity });
        self.side_levels(side).entry(price).or_default().push(order_id);
    }

    fn remove(&mut self, order_id: u64) -> bool {
        let Some(resting) = self.index.remove(&order_id) else {
            return false;
        };

        let levels = self.side_levels(resting.side);
        if let Some(ids) = levels.get_mut(&resting.price) {
            ids.retain(|id| *id != order_id);
            if ids.is_empty() {
                levels.remove(&resting.price);
            }
        }
        true
    }

    fn best_bid(&self) -> Option<u128> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<u128> {
        self.asks.keys().next().copied()
    }

    fn spread(&self) -> Option<u128> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.saturating_sub(bid)),
            _ => None,
        }
    }

    fn resting_volume(&self, side: OrderSide) -> u128 {
        self.index
            .values()
            .filter(|r| r.side == side)
            .fold(0u128, |acc, r| acc.saturating_add(r.quantity))
    }

    fn clear(&mut self) -> Vec<u64> {
        let ids: Vec<u64> = self.index.keys().copied().collect();
        self.bids.clear();
        self.asks.clear();
        self.index.clear();
        ids
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
