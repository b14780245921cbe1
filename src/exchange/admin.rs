//! 市场管理操作
//!
//! 限额调整、截止时间延后、暂停/恢复、提前终止交易与紧急清簿。
//! 全部操作要求管理角色，并走与交易相同的在途守卫。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::order::OrderStatus;
use crate::exchange::capability::{Capability, CapabilityRegistry};
use crate::exchange::market::MarketState;
use crate::exchange::market_registry::MarketRegistry;
use crate::market::broadcaster::{MarketEvent, MarketEventBroadcaster};
use crate::{ExchangeError, Result};

/// 市场概览（列表查询用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub metric_id: String,
    pub state: MarketState,
    pub is_paused: bool,
    pub trading_end: i64,
    pub settlement_date: i64,
    pub order_count: usize,
    pub position_count: usize,
}

/// 市场管理器
pub struct MarketAdmin {
    /// 市场注册表
    registry: Arc<MarketRegistry>,

    /// 权限注册表
    capabilities: Arc<CapabilityRegistry>,

    /// 市场事件广播器（可选）
    broadcaster: Option<Arc<MarketEventBroadcaster>>,
}

impl MarketAdmin {
    pub fn new(registry: Arc<MarketRegistry>, capabilities: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            capabilities,
            broadcaster: None,
        }
    }

    /// 设置市场事件广播器
    pub fn set_broadcaster(&mut self, broadcaster: Arc<MarketEventBroadcaster>) {
        self.broadcaster = Some(broadcaster);
    }

    fn emit(&self, event: MarketEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(event);
        }
    }

    /// 更新订单数量限额（上限 0 表示不设上限）
    pub fn update_order_limits(
        &self,
        caller: &str,
        metric_id: &str,
        minimum_order_size: u128,
        maximum_order_size: u128,
    ) -> Result<()> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        if maximum_order_size > 0 && maximum_order_size < minimum_order_size {
            return Err(ExchangeError::InvalidParameter(
                "maximum_order_size below minimum_order_size".to_string(),
            ));
        }

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        market.config.minimum_order_size = minimum_order_size;
        market.config.maximum_order_size = maximum_order_size;

        log::info!(
            "Order limits updated for {}: min={}, max={}",
            metric_id, minimum_order_size, maximum_order_size
        );
        self.emit(MarketEvent::OrderLimitsUpdated {
            metric_id: metric_id.to_string(),
            minimum_order_size,
            maximum_order_size,
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    /// 延后交易截止与结算时间
    ///
    /// 只允许延后，不允许提前；延后后仍须满足交易截止不晚于结算时间。
    pub fn extend_deadlines(
        &self,
        caller: &str,
        metric_id: &str,
        trading_end: i64,
        settlement_date: i64,
    ) -> Result<()> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        if market.state != MarketState::Active {
            return Err(ExchangeError::MarketError(format!(
                "Cannot extend deadlines for {} in state {:?}",
                metric_id, market.state
            )));
        }
        if trading_end < market.config.trading_end
            || settlement_date < market.config.settlement_date
        {
            return Err(ExchangeError::InvalidParameter(
                "deadlines may only move later".to_string(),
            ));
        }
        if trading_end > settlement_date {
            return Err(ExchangeError::InvalidParameter(format!(
                "trading_end {} must not exceed settlement_date {}",
                trading_end, settlement_date
            )));
        }

        market.config.trading_end = trading_end;
        market.config.settlement_date = settlement_date;

        log::info!(
            "Deadlines extended for {}: trading_end={}, settlement_date={}",
            metric_id, trading_end, settlement_date
        );
        self.emit(MarketEvent::DeadlinesExtended {
            metric_id: metric_id.to_string(),
            trading_end,
            settlement_date,
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    /// 暂停交易
    pub fn pause_trading(&self, caller: &str, metric_id: &str) -> Result<()> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        if market.is_paused {
            return Err(ExchangeError::MarketError(format!(
                "Market {} already paused",
                metric_id
            )));
        }
        market.is_paused = true;

        log::warn!("Trading paused for {}", metric_id);
        self.emit(MarketEvent::TradingPaused {
            metric_id: metric_id.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    /// 恢复交易
    pub fn resume_trading(&self, caller: &str, metric_id: &str) -> Result<()> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        if !market.is_paused {
            return Err(ExchangeError::MarketError(format!(
                "Market {} is not paused",
                metric_id
            )));
        }
        market.is_paused = false;

        log::info!("Trading resumed for {}", metric_id);
        self.emit(MarketEvent::TradingResumed {
            metric_id: metric_id.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    /// 提前终止交易（不可逆，允许随后立即发起结算）
    pub fn end_trading(&self, caller: &str, metric_id: &str) -> Result<()> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        market.end_trading()?;

        log::warn!("Trading ended early for {}", metric_id);
        self.emit(MarketEvent::TradingEnded {
            metric_id: metric_id.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    /// 紧急清空订单簿
    ///
    /// 丢弃全部挂单并标记为已撤销；已成交持仓不受影响。
    pub fn emergency_clear_book(&self, caller: &str, metric_id: &str) -> Result<u64> {
        self.capabilities.require(caller, Capability::MarketAdmin)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        let now = Utc::now().timestamp();
        let dropped = market.book.clear();
        for order_id in &dropped {
            if let Some(order) = market.get_order_mut(*order_id) {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
            }
        }

        log::warn!(
            "Emergency book clear for {}: {} orders dropped",
            metric_id,
            dropped.len()
        );
        self.emit(MarketEvent::BookCleared {
            metric_id: metric_id.to_string(),
            dropped_orders: dropped.len() as u64,
            timestamp: now,
        });
        Ok(dropped.len() as u64)
    }

    /// 市场概览列表
    pub fn list_markets(&self) -> Vec<MarketSummary> {
        self.registry
            .list_markets()
            .into_iter()
            .filter_map(|metric_id| {
                let handle = self.registry.get(&metric_id).ok()?;
                let market = handle.market.read();
                Some(MarketSummary {
                    metric_id,
                    state: market.state,
                    is_paused: market.is_paused,
                    trading_end: market.config.trading_end,
                    settlement_date: market.config.settlement_date,
                    order_count: market.order_count(),
                    position_count: market.position_count(),
                })
            })
            .collect()
    }

    /// 按生命周期状态筛选市场
    pub fn list_markets_in_state(&self, state: MarketState) -> Vec<MarketSummary> {
        self.list_markets()
            .into_iter()
            .filter(|m| m.state == state)
            .collect()
    }
}
