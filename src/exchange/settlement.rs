//! 结算引擎
//!
//! 市场生命周期的后半段：发起结算数据请求、在预言机最终化后落账
//! 结算值、按批次结算持仓。批量结算先整批校验（含赔付纯计算），
//! 全部通过后才提交变更；持仓在资金转移之前标记为已结算。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::position::Position;
use crate::exchange::capability::{Capability, CapabilityRegistry};
use crate::exchange::market::{Market, MarketState, SettlementInfo};
use crate::exchange::market_registry::MarketRegistry;
use crate::ledger::CollateralLedger;
use crate::market::broadcaster::{MarketEvent, MarketEventBroadcaster};
use crate::math::payout::{compute_payout, PayoutResult};
use crate::math::precision::{checked_add, to_internal, to_native};
use crate::oracle::manager::OracleManager;
use crate::{ExchangeError, Result};

/// 单批次最大持仓数
pub const MAX_SETTLEMENT_BATCH: usize = 100;

/// 批量结算响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettlementResponse {
    pub settled_count: u64,
    /// 本批赔付总额（原生精度）
    pub total_payouts: u128,
}

/// 校验阶段产出的单仓结算计划
struct PositionSettlementPlan {
    position_id: u64,
    owner: String,
    collateral_native: u128,
    payout_native: u128,
    pnl: i128,
}

/// 结算引擎
pub struct SettlementEngine {
    /// 市场注册表
    registry: Arc<MarketRegistry>,

    /// 抵押账本
    ledger: Arc<dyn CollateralLedger>,

    /// 预言机管理器
    oracle: Arc<OracleManager>,

    /// 权限注册表
    capabilities: Arc<CapabilityRegistry>,

    /// 市场事件广播器（可选）
    broadcaster: Option<Arc<MarketEventBroadcaster>>,
}

impl SettlementEngine {
    pub fn new(
        registry: Arc<MarketRegistry>,
        ledger: Arc<dyn CollateralLedger>,
        oracle: Arc<OracleManager>,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            registry,
            ledger,
            oracle,
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

    /// 发起结算数据请求
    ///
    /// 交易提前终止后随时可发；否则须等到交易截止时间之后。
    /// 请求转发给预言机管理器，保证金由调用方托管。
    pub fn request_settlement(&self, caller: &str, metric_id: &str) -> Result<u64> {
        // 1. 权限
        self.capabilities.require(caller, Capability::SettlementAuthority)?;

        // 2. 市场句柄与在途守卫
        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        let now = Utc::now().timestamp();

        // 3. 状态与时间窗检查
        match market.state {
            MarketState::Active => {
                if now < market.config.trading_end {
                    return Err(ExchangeError::SettlementError(format!(
                        "Trading for {} ends at {}; settlement may not be requested earlier",
                        metric_id, market.config.trading_end
                    )));
                }
            }
            MarketState::TradingEnded => {}
            _ => {
                return Err(ExchangeError::SettlementError(format!(
                    "Cannot request settlement for {} in state {:?}",
                    metric_id, market.state
                )));
            }
        }

        // 4. 转发预言机请求（数据时刻为配置的结算时间戳）
        let request_id = self.oracle.request_metric_data(
            caller,
            metric_id,
            market.config.settlement_date,
            "",
            None,
            None,
        )?;

        // 5. 状态流转
        market.mark_settlement_requested(request_id)?;

        log::info!(
            "Settlement requested for {}: request_id={}",
            metric_id, request_id
        );
        self.emit(MarketEvent::SettlementRequested {
            metric_id: metric_id.to_string(),
            request_id,
            timestamp: now,
        });
        Ok(request_id)
    }

    /// 最终化市场结算值
    ///
    /// 调用方必须提供期望的结算值；与预言机最终值不完全相等时整体
    /// 拒绝且市场状态不变，防止对过期读数的盲目落账。配置了
    /// `auto_settle` 的市场在最终化后按批量上限分块结算全部持仓；
    /// 中途账本失败时市场已最终化，剩余持仓仍可走批量结算补齐。
    pub fn finalize_settlement(
        &self,
        caller: &str,
        metric_id: &str,
        expected_value: u128,
    ) -> Result<u128> {
        self.capabilities.require(caller, Capability::SettlementAuthority)?;

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        let request_id = market.settlement.request_id.ok_or_else(|| {
            ExchangeError::SettlementError(format!(
                "No settlement request outstanding for {}",
                metric_id
            ))
        })?;

        // 先结算预言机请求（已结算过则直接读取状态）
        let status = self.oracle.get_request_status(request_id)?;
        let value = if status.resolved {
            status.value.ok_or_else(|| {
                ExchangeError::InternalError("resolved request missing value".to_string())
            })?
        } else {
            self.oracle.settle_request(request_id)?
        };

        // 期望值不符 → 拒绝，市场保持 SETTLEMENT_REQUESTED
        if value != expected_value {
            return Err(ExchangeError::SettlementError(format!(
                "Settlement value mismatch for {}: oracle={}, expected={}",
                metric_id, value, expected_value
            )));
        }

        let now = Utc::now().timestamp();
        market.mark_settled(value, now)?;

        let open_positions = market.open_position_count() as u64;
        log::info!(
            "Market {} settled at {}: {} open positions",
            metric_id, value, open_positions
        );
        self.emit(MarketEvent::MarketSettled {
            metric_id: metric_id.to_string(),
            settlement_value: value,
            position_count: open_positions,
            timestamp: now,
        });

        // 自动结算：按批量上限分块结算全部未结算持仓
        if market.config.auto_settle {
            let open_ids: Vec<u64> = market
                .all_positions()
                .iter()
                .filter(|p| !p.is_settled)
                .map(|p| p.position_id)
                .collect();
            for chunk in open_ids.chunks(MAX_SETTLEMENT_BATCH) {
                self.execute_batch(&mut market, metric_id, chunk)?;
            }
        }
        Ok(value)
    }

    /// 批量结算持仓
    ///
    /// 整批先校验（存在、未结算、无重复、赔付可计算、累计不溢出），
    /// 任一失败则整批拒绝且不产生任何变更。提交阶段先标记已结算，
    /// 再释放抵押品并从托管账户支付赔付。
    pub fn settle_positions(
        &self,
        caller: &str,
        metric_id: &str,
        position_ids: &[u64],
    ) -> Result<BatchSettlementResponse> {
        self.capabilities.require(caller, Capability::SettlementAuthority)?;

        if position_ids.is_empty() {
            return Err(ExchangeError::InvalidParameter(
                "empty settlement batch".to_string(),
            ));
        }
        if position_ids.len() > MAX_SETTLEMENT_BATCH {
            return Err(ExchangeError::InvalidParameter(format!(
                "batch size {} exceeds maximum {}",
                position_ids.len(),
                MAX_SETTLEMENT_BATCH
            )));
        }

        let handle = self.registry.get(metric_id)?;
        let _guard = handle.begin_operation()?;
        let mut market = handle.market.write();

        if market.state != MarketState::Settled {
            return Err(ExchangeError::SettlementError(format!(
                "Market {} not settled: {:?}",
                metric_id, market.state
            )));
        }
        self.execute_batch(&mut market, metric_id, position_ids)
    }

    /// 锁内批量结算执行
    ///
    /// 调用方已持有市场写锁并确认状态为已结算。整批先校验（存在、
    /// 未结算、无重复、赔付可计算、累计不溢出），任一失败则整批拒绝
    /// 且不产生任何变更；提交阶段先标记已结算再移动资金。
    fn execute_batch(
        &self,
        market: &mut Market,
        metric_id: &str,
        position_ids: &[u64],
    ) -> Result<BatchSettlementResponse> {
        let settlement_value = market.settlement.settlement_value.ok_or_else(|| {
            ExchangeError::InternalError(format!("settled market {} missing value", metric_id))
        })?;

        let (token, native_decimals) = self.ledger.primary_collateral_token();

        // ===== 校验阶段：纯计算，零副作用 =====
        let mut seen = HashSet::new();
        let mut plans = Vec::with_capacity(position_ids.len());
        let mut batch_total: u128 = 0;

        for &position_id in position_ids {
            if !seen.insert(position_id) {
                return Err(ExchangeError::SettlementError(format!(
                    "Duplicate position {} in batch",
                    position_id
                )));
            }

            let position = market.get_position(position_id).ok_or_else(|| {
                ExchangeError::PositionError(format!("Position {} not found", position_id))
            })?;
            if position.is_settled {
                return Err(ExchangeError::PositionError(format!(
                    "Position {} already settled",
                    position_id
                )));
            }

            let collateral_internal = to_internal(position.collateral, native_decimals)?;
            let result = compute_payout(
                position.direction,
                position.entry_price,
                position.quantity,
                collateral_internal,
                settlement_value,
            )?;
            let payout_native = to_native(result.payout, native_decimals)?;
            batch_total = checked_add(batch_total, payout_native)?;

            plans.push(PositionSettlementPlan {
                position_id,
                owner: position.owner.clone(),
                collateral_native: position.collateral,
                payout_native,
                pnl: result.pnl,
            });
        }

        // 市场累计值先行验证，避免提交后才发现溢出
        let new_total = checked_add(market.settlement.total_payouts, batch_total)?;
        let new_count = market
            .settlement
            .settled_position_count
            .checked_add(plans.len() as u64)
            .ok_or_else(|| {
                ExchangeError::ArithmeticOverflow("settled position count overflow".to_string())
            })?;

        // ===== 提交阶段 =====
        let now = Utc::now().timestamp();
        let custody = self.ledger.custody_account();

        for plan in &plans {
            // 资金转移前先标记已结算
            {
                let position = market.get_position_mut(plan.position_id).ok_or_else(|| {
                    ExchangeError::InternalError(format!(
                        "validated position {} disappeared",
                        plan.position_id
                    ))
                })?;
                position.is_settled = true;
                position.payout = plan.payout_native;
                position.pnl = plan.pnl;
                position.settled_at = Some(now);
            }

            self.ledger
                .deallocate_assets(&plan.owner, &token, plan.collateral_native)?;
            if plan.payout_native > 0 {
                self.ledger
                    .transfer_assets(&custody, &plan.owner, &token, plan.payout_native)?;
            }

            log::info!(
                "Position {} settled: owner={}, payout={}, pnl={}",
                plan.position_id, plan.owner, plan.payout_native, plan.pnl
            );
            self.emit(MarketEvent::PositionSettled {
                metric_id: metric_id.to_string(),
                position_id: plan.position_id,
                owner: plan.owner.clone(),
                payout: plan.payout_native,
                pnl: plan.pnl,
                timestamp: now,
            });
        }

        market.settlement.total_payouts = new_total;
        market.settlement.settled_position_count = new_count;

        Ok(BatchSettlementResponse {
            settled_count: plans.len() as u64,
            total_payouts: batch_total,
        })
    }

    /// 预估持仓在给定结算值下的赔付（18位定点，不落账）
    pub fn preview_payout(
        &self,
        metric_id: &str,
        position_id: u64,
        hypothetical_value: u128,
    ) -> Result<PayoutResult> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();

        let position = market.get_position(position_id).ok_or_else(|| {
            ExchangeError::PositionError(format!("Position {} not found", position_id))
        })?;

        let (_, native_decimals) = self.ledger.primary_collateral_token();
        let collateral_internal = to_internal(position.collateral, native_decimals)?;
        compute_payout(
            position.direction,
            position.entry_price,
            position.quantity,
            collateral_internal,
            hypothetical_value,
        )
    }

    // ========== 查询接口 ==========

    /// 查询持仓
    pub fn get_position(&self, metric_id: &str, position_id: u64) -> Result<Position> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        market
            .get_position(position_id)
            .cloned()
            .ok_or_else(|| ExchangeError::PositionError(format!("Position {} not found", position_id)))
    }

    /// 查询用户在某市场的全部持仓
    pub fn positions_of(&self, metric_id: &str, owner: &str) -> Result<Vec<Position>> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.positions_of(owner).into_iter().cloned().collect())
    }

    /// 分页查询市场持仓
    pub fn positions_page(
        &self,
        metric_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Position>> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.positions_page(offset, limit).into_iter().cloned().collect())
    }

    /// 查询市场结算信息
    pub fn settlement_info(&self, metric_id: &str) -> Result<SettlementInfo> {
        let handle = self.registry.get(metric_id)?;
        let market = handle.market.read();
        Ok(market.settlement.clone())
    }
}
