//! 订单路由模块
//!
//! 负责订单的接收、准入检查、订单簿挂单以及单步全量成交执行。
//! 市价单与穿越对手价的限价单在同一次提交调用内完成成交并创建持仓；
//! 未穿越的限价单进簿等待，仅作为价格信号存在，可随时撤销。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::core::position::Position;
use crate::exchange::capability::{Capability, CapabilityRegistry};
use crate::exchange::id_generator::MarketIdGenerator;
use crate::exchange::market::MarketStats;
use crate::exchange::market_registry::MarketRegistry;
use crate::ledger::CollateralLedger;
use crate::market::broadcaster::{MarketEvent, MarketEventBroadcaster};
use crate::math::precision::{self, PRICE_PRECISION};
use crate::{ExchangeError, Result};

/// 订单提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub trader: String,
    pub metric_id: String,
    pub side: OrderSide,
    /// 数量（18位定点）
    pub quantity: u128,
    /// 限价（18位定点；市价单忽略）
    pub price: u128,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

/// 撤单请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub trader: String,
    pub metric_id: String,
    pub order_id: u64,
}

/// 订单提交响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub success: bool,
    /// 订单ID（仅准入成功的订单分配序号）
    pub order_id: Option<u64>,
    /// 订单最终状态：resting/filled/rejected
    pub status: Option<String>,
    /// 成交创建的持仓ID
    pub position_id: Option<u64>,
    /// 成交价（18位定点）
    pub fill_price: Option<u128>,
    pub error_message: Option<String>,
}

impl SubmitOrderResponse {
    fn rejected(message: String) -> Self {
        Self {
            success: false,
            order_id: None,
            status: Some("rejected".to_string()),
            position_id: None,
            fill_price: None,
            error_message: Some(message),
        }
    }
}

/// 订单统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatistics {
    pub total_count: usize,
    pub resting_count: usize,
    pub filled_count: usize,
    pub cancelled_count: usize,
}

/// 成交执行计划（锁内计算，副作用提交前的全部校验结果）
struct ExecutionPlan {
    fill_price: u128,
    collateral_native: u128,
    next_stats: MarketStats,
}

/// 订单路由器
pub struct OrderRouter {
    /// 市场注册表
    registry: Arc<MarketRegistry>,

    /// 抵押账本
    ledger: Arc<dyn CollateralLedger>,

    /// 权限注册表
    capabilities: Arc<CapabilityRegistry>,

    /// ID生成器
    id_generator: Arc<MarketIdGenerator>,

    /// 市场事件广播器（可选）
    broadcaster: Option<Arc<MarketEventBroadcaster>>,
}

impl OrderRouter {
    pub fn new(
        registry: Arc<MarketRegistry>,
        ledger: Arc<dyn CollateralLedger>,
        capabilities: Arc<CapabilityRegistry>,
        id_generator: Arc<MarketIdGenerator>,
    ) -> Self {
        Self {
            registry,
            ledger,
            capabilities,
            id_generator,
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

    /// 提交订单 (核心方法)
    ///
    /// 准入失败（过期、越界、余额不足等）返回失败响应而非错误；
    /// 错误仅用于权限、重入与内部一致性问题。
    pub fn submit_order(&self, caller: &str, req: SubmitOrderRequest) -> Result<SubmitOrderResponse> {
        // 1. 入口权限
        self.capabilities.require(caller, Capability::Router)?;

        // 2. 市场句柄与在途守卫
        let handle = self.registry.get(&req.metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        let now = Utc::now().timestamp();

        // 3. 市场准入
        if let Err(e) = market.check_accepting_orders(now) {
            return Ok(SubmitOrderResponse::rejected(e.to_string()));
        }
        if req.trader.is_empty() {
            return Ok(SubmitOrderResponse::rejected(
                "Trader identity is empty".to_string(),
            ));
        }

        // 4. 过期检查：GTD 到期订单直接拒绝，不进簿
        if req.time_in_force.is_expired(now) {
            log::warn!("Expired GTD submission for {} rejected", req.metric_id);
            return Ok(SubmitOrderResponse::rejected(
                "Order expired before admission".to_string(),
            ));
        }

        // 5. 参数校验：限价单检查档位对齐，市价单仅检查数量边界
        let validation = match req.order_type {
            OrderType::Limit => market.validate_order_params(req.price, req.quantity),
            OrderType::Market => market.validate_order_params(market.config.tick_size, req.quantity),
        };
        if let Err(e) = validation {
            return Ok(SubmitOrderResponse::rejected(e.to_string()));
        }

        // 6. 确定执行方式
        let fill_price = match req.order_type {
            OrderType::Market => {
                // 市价单按对手最优价成交；无对手方直接拒绝
                let opposing = match req.side {
                    OrderSide::Buy => market.book.best_ask(),
                    OrderSide::Sell => market.book.best_bid(),
                };
                match opposing {
                    Some(price) => Some(price),
                    None => {
                        return Ok(SubmitOrderResponse::rejected(
                            "No opposing liquidity for market order".to_string(),
                        ));
                    }
                }
            }
            OrderType::Limit => {
                // 穿越对手价的限价单按自身限价成交
                let crossing = match req.side {
                    OrderSide::Buy => market.book.best_ask().map(|ask| req.price >= ask),
                    OrderSide::Sell => market.book.best_bid().map(|bid| req.price <= bid),
                };
                if crossing.unwrap_or(false) {
                    Some(req.price)
                } else {
                    None
                }
            }
        };

        let Some(fill_price) = fill_price else {
            // 7a. 准入通过：分配订单序号并进簿挂单
            let order_id = self.id_generator.next_order_id(&req.metric_id);
            market.book.insert(order_id, req.side, req.price, req.quantity);
            market.insert_order(Order {
                order_id,
                metric_id: req.metric_id.clone(),
                trader: req.trader.clone(),
                side: req.side,
                quantity: req.quantity,
                price: req.price,
                order_type: req.order_type,
                time_in_force: req.time_in_force,
                filled_quantity: 0,
                status: OrderStatus::Resting,
                submitted_at: now,
                updated_at: now,
            });

            log::info!(
                "Order {} resting: {} {:?} {} @ {}",
                order_id, req.metric_id, req.side, req.quantity, req.price
            );
            self.emit(MarketEvent::OrderAccepted {
                metric_id: req.metric_id.clone(),
                order_id,
                trader: req.trader.clone(),
                side: req.side,
                quantity: req.quantity,
                price: req.price,
                timestamp: now,
            });
            return Ok(SubmitOrderResponse {
                success: true,
                order_id: Some(order_id),
                status: Some("resting".to_string()),
                position_id: None,
                fill_price: None,
                error_message: None,
            });
        };

        // 7b. 单步全量成交：先完成全部校验与纯计算，再提交副作用
        let plan = match self.plan_execution(&market.stats, &req, fill_price, now) {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("Execution for {} rejected: {}", req.metric_id, e);
                return Ok(SubmitOrderResponse::rejected(e.to_string()));
            }
        };

        let (token, _) = self.ledger.primary_collateral_token();
        if !self
            .ledger
            .has_sufficient_balance(&req.trader, &token, plan.collateral_native)
        {
            return Ok(SubmitOrderResponse::rejected(format!(
                "Insufficient balance: {} requires {} {}",
                req.trader, plan.collateral_native, token
            )));
        }

        // 8. 划拨抵押品
        self.ledger
            .allocate_assets(&req.trader, &token, plan.collateral_native)?;

        // 9. 分配序号，创建持仓并落账订单
        let order_id = self.id_generator.next_order_id(&req.metric_id);
        let position_id = self.id_generator.next_position_id(&req.metric_id);
        let position = Position::new(
            position_id,
            req.trader.clone(),
            req.side,
            req.quantity,
            plan.fill_price,
            plan.collateral_native,
            order_id,
            now,
        );

        market.insert_order(Order {
            order_id,
            metric_id: req.metric_id.clone(),
            trader: req.trader.clone(),
            side: req.side,
            quantity: req.quantity,
            price: plan.fill_price,
            order_type: req.order_type,
            time_in_force: req.time_in_force,
            filled_quantity: req.quantity,
            status: OrderStatus::Filled,
            submitted_at: now,
            updated_at: now,
        });
        market.add_position(position);
        market.stats = plan.next_stats;

        log::info!(
            "Order {} filled: {} {:?} {} @ {}, position={}, collateral={}",
            order_id, req.metric_id, req.side, req.quantity, plan.fill_price,
            position_id, plan.collateral_native
        );
        self.emit(MarketEvent::OrderFilled {
            metric_id: req.metric_id.clone(),
            order_id,
            trader: req.trader.clone(),
            side: req.side,
            quantity: req.quantity,
            price: plan.fill_price,
            position_id,
            timestamp: now,
        });

        Ok(SubmitOrderResponse {
            success: true,
            order_id: Some(order_id),
            status: Some("filled".to_string()),
            position_id: Some(position_id),
            fill_price: Some(plan.fill_price),
            error_message: None,
        })
    }

    /// 锁内纯计算：抵押品金额与新统计值，任一溢出则整体拒绝
    fn plan_execution(
        &self,
        stats: &MarketStats,
        req: &SubmitOrderRequest,
        fill_price: u128,
        now: i64,
    ) -> Result<ExecutionPlan> {
        // 名义价值 = 数量 × 价格 / 精度（18位定点）
        let notional = precision::mul_div(req.quantity, fill_price, PRICE_PRECISION)?;
        let (_, native_decimals) = self.ledger.primary_collateral_token();
        let collateral_native = precision::to_native(notional, native_decimals)?;

        let next_stats = stats.with_trade(fill_price, req.quantity, now)?;

        Ok(ExecutionPlan {
            fill_price,
            collateral_native,
            next_stats,
        })
    }

    /// 撤销挂单
    ///
    /// 仅订单所有人可撤；已成交/已撤销订单不可撤。
    pub fn cancel_order(&self, caller: &str, req: CancelOrderRequest) -> Result<()> {
        self.capabilities.require(caller, Capability::Router)?;

        let handle = self.registry.get(&req.metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        let now = Utc::now().timestamp();

        {
            let order = market.get_order(req.order_id).ok_or_else(|| {
                ExchangeError::OrderError(format!("Order {} not found", req.order_id))
            })?;
            if order.trader != req.trader {
                return Err(ExchangeError::OrderError(format!(
                    "Order {} not owned by {}",
                    req.order_id, req.trader
                )));
            }
            if order.status != OrderStatus::Resting {
                return Err(ExchangeError::OrderError(format!(
                    "Order {} not resting: {:?}",
                    req.order_id, order.status
                )));
            }
        }

        market.book.remove(req.order_id);
        if let Some(order) = market.get_order_mut(req.order_id) {
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
        }

        log::info!("Order {} cancelled by {}", req.order_id, req.trader);
        self.emit(MarketEvent::OrderCancelled {
            metric_id: req.metric_id.clone(),
            order_id: req.order_id,
            trader: req.trader.clone(),
            timestamp: now,
        });
        Ok(())
    }

    // ========== 查询接口 ==========

    /// 查询订单
    pub fn get_order(&self, metric_id: &str, order_id: u64) -> Result<Order> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        market
            .get_order(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::OrderError(format!("Order {} not found", order_id)))
    }

    /// 最优买价
    pub fn best_bid(&self, metric_id: &str) -> Result<Option<u128>> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.book.best_bid())
    }

    /// 最优卖价
    pub fn best_ask(&self, metric_id: &str) -> Result<Option<u128>> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.book.best_ask())
    }

    /// 买卖价差
    pub fn spread(&self, metric_id: &str) -> Result<Option<u128>> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.book.spread())
    }

    /// 市场成交统计
    pub fn market_stats(&self, metric_id: &str) -> Result<MarketStats> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.stats.clone())
    }

    /// 订单统计
    pub fn order_statistics(&self, metric_id: &str) -> Result<OrderStatistics> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();

        let mut stats = OrderStatistics {
            total_count: 0,
            resting_count: 0,
            filled_count: 0,
            cancelled_count: 0,
        };
        for order_id in 1..=self.id_generator.current_order_sequence(metric_id) {
            let Some(order) = market.get_order(order_id) else {
                continue;
            };
            stats.total_count += 1;
            match order.status {
                OrderStatus::Resting => stats.resting_count += 1,
                OrderStatus::Filled => stats.filled_count += 1,
                OrderStatus::Cancelled => stats.cancelled_count += 1,
            }
        }
        Ok(stats)
    }
}
