//! 市场ID生成器
//!
//! 为每个市场维护独立的订单序列与持仓序列，保证同一市场内严格递增

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 市场ID生成器
///
/// 订单与持仓各用一条独立序列：
/// 1. 订单ID在成交回报与事件流中做外部可见标识
/// 2. 持仓ID是结算批次的寻址单元
/// 3. 使用u64存储，fetch_add保证并发安全
pub struct MarketIdGenerator {
    /// 订单序列计数器 (metric_id -> AtomicU64)
    order_sequences: DashMap<String, AtomicU64>,

    /// 持仓序列计数器 (metric_id -> AtomicU64)
    position_sequences: DashMap<String, AtomicU64>,
}

impl MarketIdGenerator {
    pub fn new() -> Self {
        Self {
            order_sequences: DashMap::new(),
            position_sequences: DashMap::new(),
        }
    }

    /// 生成下一个订单ID
    ///
    /// # 说明
    /// - 同一市场的订单ID严格递增
    /// - 不同市场的序列相互独立
    pub fn next_order_id(&self, metric_id: &str) -> u64 {
        let counter = self
            .order_sequences
            .entry(metric_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));

        // fetch_add返回旧值，所以返回值+1就是新值
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 生成下一个持仓ID
    pub fn next_position_id(&self, metric_id: &str) -> u64 {
        let counter = self
            .position_sequences
            .entry(metric_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));

        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 获取当前订单序列号（用于测试/调试）
    pub fn current_order_sequence(&self, metric_id: &str) -> u64 {
        self.order_sequences
            .get(metric_id)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Default for MarketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_sequence_increment() {
        let generator = MarketIdGenerator::new();

        assert_eq!(generator.next_order_id("GAS_DAILY_TXNS"), 1);
        assert_eq!(generator.next_order_id("GAS_DAILY_TXNS"), 2);
        assert_eq!(generator.next_order_id("GAS_DAILY_TXNS"), 3);
    }

    #[test]
    fn test_different_markets_independent() {
        let generator = MarketIdGenerator::new();

        assert_eq!(generator.next_order_id("GAS_DAILY_TXNS"), 1);
        assert_eq!(generator.next_order_id("ETH_STAKE_RATE"), 1);
        assert_eq!(generator.next_order_id("GAS_DAILY_TXNS"), 2);
    }

    #[test]
    fn test_order_and_position_sequences_independent() {
        let generator = MarketIdGenerator::new();

        // 订单与持仓序列互不影响
        assert_eq!(generator.next_order_id("M"), 1);
        assert_eq!(generator.next_order_id("M"), 2);
        assert_eq!(generator.next_position_id("M"), 1);
        assert_eq!(generator.next_position_id("M"), 2);
    }

    #[test]
    fn test_concurrent_generation() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let generator = Arc::new(MarketIdGenerator::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let gen = generator.clone();
            handles.push(thread::spawn(move || {
                (0..100).map(|_| gen.next_order_id("M")).collect::<Vec<u64>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                // 并发下不允许重复ID
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
        assert_eq!(generator.current_order_sequence("M"), 1000);
    }
}
