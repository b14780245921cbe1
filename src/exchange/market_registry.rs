//! 市场注册表
//!
//! 每个市场由一个句柄保护：RwLock 串行化状态变更，AtomicBool 在途
//! 守卫拒绝同一市场的重入调用（返回错误而非阻塞等待）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::exchange::market::{Market, MarketConfig};
use crate::{ExchangeError, Result};

/// 市场句柄
pub struct MarketHandle {
    /// 市场聚合
    pub market: RwLock<Market>,

    /// 在途操作标志
    in_flight: AtomicBool,
}

impl MarketHandle {
    fn new(market: Market) -> Self {
        Self {
            market: RwLock::new(market),
            in_flight: AtomicBool::new(false),
        }
    }

    /// 进入变更操作；已有在途操作时立即失败
    pub fn begin_operation(self: &Arc<Self>) -> Result<OperationGuard> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let metric_id = self.market.read().config.metric_id.clone();
            return Err(ExchangeError::ReentrantCall(format!(
                "Operation already in flight for market {}",
                metric_id
            )));
        }
        Ok(OperationGuard { handle: self.clone() })
    }
}

/// 在途操作守卫（Drop 时释放）
pub struct OperationGuard {
    handle: Arc<MarketHandle>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.handle.in_flight.store(false, Ordering::Release);
    }
}

/// 市场注册表 (metric_id -> MarketHandle)
pub struct MarketRegistry {
    markets: DashMap<String, Arc<MarketHandle>>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self { markets: DashMap::new() }
    }

    /// 注册新市场
    pub fn register(&self, config: MarketConfig, now: i64) -> Result<()> {
        let metric_id = config.metric_id.clone();
        if self.markets.contains_key(&metric_id) {
            return Err(ExchangeError::MarketError(format!(
                "Market {} already registered",
                metric_id
            )));
        }

        let market = Market::new(config, now)?;
        self.markets.insert(metric_id.clone(), Arc::new(MarketHandle::new(market)));
        log::info!("Registered market: {}", metric_id);
        Ok(())
    }

    /// 获取市场句柄
    pub fn get(&self, metric_id: &str) -> Result<Arc<MarketHandle>> {
        self.markets
            .get(metric_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                ExchangeError::MarketError(format!("Market {} not found", metric_id))
            })
    }

    /// 列出所有市场ID
    pub fn list_markets(&self) -> Vec<String> {
        self.markets.iter().map(|r| r.key().clone()).collect()
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }
}

impl Default for MarketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::precision::PRICE_PRECISION;

    fn create_test_config(metric_id: &str) -> MarketConfig {
        MarketConfig {
            metric_id: metric_id.to_string(),
            decimals: 18,
            minimum_order_size: PRICE_PRECISION,
            maximum_order_size: 0,
            tick_size: PRICE_PRECISION / 100,
            trading_end: 2_000_000_000,
            settlement_date: 2_000_086_400,
            request_window_secs: 3600,
            auto_settle: false,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = MarketRegistry::new();
        registry.register(create_test_config("M1"), 0).unwrap();

        assert!(registry.get("M1").is_ok());
        assert!(registry.get("M2").is_err());
        assert!(registry.register(create_test_config("M1"), 0).is_err());
        assert_eq!(registry.market_count(), 1);
    }

    #[test]
    fn test_in_flight_guard_rejects_reentry() {
        let registry = MarketRegistry::new();
        registry.register(create_test_config("M1"), 0).unwrap();
        let handle = registry.get("M1").unwrap();

        let guard = handle.begin_operation().unwrap();
        // 守卫未释放时重入失败
        assert!(matches!(
            handle.begin_operation(),
            Err(ExchangeError::ReentrantCall(_))
        ));

        drop(guard);
        assert!(handle.begin_operation().is_ok());
    }

    #[test]
    fn test_guards_independent_across_markets() {
        let registry = MarketRegistry::new();
        registry.register(create_test_config("M1"), 0).unwrap();
        registry.register(create_test_config("M2"), 0).unwrap();

        let h1 = registry.get("M1").unwrap();
        let h2 = registry.get("M2").unwrap();

        let _g1 = h1.begin_operation().unwrap();
        assert!(h2.begin_operation().is_ok());
    }
}
