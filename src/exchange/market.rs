//! 市场聚合
//!
//! 单个指标市场的全部状态：配置、生命周期状态机、订单簿、订单与持仓
//! 存储、成交统计、结算信息。聚合本身不做并发控制，由市场注册表的
//! 锁与在途守卫保护。

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::order::Order;
use crate::core::position::Position;
use crate::matching::book::{LevelBook, OrderBook};
use crate::math::precision;
use crate::{ExchangeError, Result};

/// 24小时统计窗口（秒）
const STATS_WINDOW_SECS: i64 = 86400;

/// 市场配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// 指标代码（市场主键）
    pub metric_id: String,

    /// 指标值的展示小数位（仅展示用，内部一律18位定点）
    pub decimals: u32,

    /// 最小订单数量（18位定点）
    pub minimum_order_size: u128,

    /// 最大订单数量（0 表示不设上限）
    pub maximum_order_size: u128,

    /// 价格最小变动单位（18位定点，必须为正）
    pub tick_size: u128,

    /// 交易截止时间（Unix 秒，此后拒绝新订单）
    pub trading_end: i64,

    /// 结算数据时间戳（预言机请求的数据时刻）
    pub settlement_date: i64,

    /// 结算数据请求调度窗口（秒）。引擎仅在交易截止后接受结算请求；
    /// 该窗口供外部调度方安排请求发起时机
    pub request_window_secs: i64,

    /// 数据解析后是否允许自动触发批量结算
    pub auto_settle: bool,
}

impl MarketConfig {
    /// 配置合法性校验
    pub fn validate(&self) -> Result<()> {
        if self.metric_id.is_empty() {
            return Err(ExchangeError::InvalidParameter(
                "metric_id must not be empty".to_string(),
            ));
        }
        if self.tick_size == 0 {
            return Err(ExchangeError::InvalidParameter(
                "tick_size must be positive".to_string(),
            ));
        }
        if self.trading_end > self.settlement_date {
            return Err(ExchangeError::InvalidParameter(format!(
                "trading_end {} must not exceed settlement_date {}",
                self.trading_end, self.settlement_date
            )));
        }
        if self.request_window_secs < 0 {
            return Err(ExchangeError::InvalidParameter(
                "request_window_secs must not be negative".to_string(),
            ));
        }
        if self.maximum_order_size > 0 && self.maximum_order_size < self.minimum_order_size {
            return Err(ExchangeError::InvalidParameter(
                "maximum_order_size below minimum_order_size".to_string(),
            ));
        }
        Ok(())
    }
}

/// 市场生命周期状态
///
/// ACTIVE → (TRADING_ENDED) → SETTLEMENT_REQUESTED → SETTLED，单向流转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    /// 接受订单
    Active,
    /// 管理员提前终止交易（可直接发起结算）
    TradingEnded,
    /// 已向预言机发出结算数据请求
    SettlementRequested,
    /// 结算值已最终化，持仓可批量结算
    Settled,
}

/// 结算信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementInfo {
    /// 预言机请求ID
    pub request_id: Option<u64>,

    /// 最终结算值（18位定点）
    pub settlement_value: Option<u128>,

    /// 是否已最终化
    pub is_settled: bool,

    /// 最终化时间（Unix 秒）
    pub settled_at: Option<i64>,

    /// 已结算持仓数
    pub settled_position_count: u64,

    /// 累计赔付总额（原生精度）
    pub total_payouts: u128,
}

/// 窗口内成交点
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TradePoint {
    timestamp: i64,
    price: u128,
    quantity: u128,
}

/// 市场成交统计（24小时滚动窗口）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketStats {
    /// 最新成交价
    pub last_price: Option<u128>,

    /// 累计成交笔数
    pub trade_count: u64,

    /// 24小时成交量（18位定点）
    pub volume_24h: u128,

    /// 24小时最高价
    pub high_24h: Option<u128>,

    /// 24小时最低价
    pub low_24h: Option<u128>,

    /// 滚动窗口成交序列
    window: VecDeque<TradePoint>,
}

impl MarketStats {
    /// 计算纳入一笔成交后的统计值
    ///
    /// 纯计算不落账：调用方在外部副作用全部成功后再替换统计。
    /// 任一累计溢出时返回错误，绝不饱和截断。
    pub fn with_trade(&self, price: u128, quantity: u128, now: i64) -> Result<MarketStats> {
        let mut next = self.clone();
        let cutoff = now - STATS_WINDOW_SECS;
        while next.window.front().map(|p| p.timestamp <= cutoff).unwrap_or(false) {
            next.window.pop_front();
        }
        next.window.push_back(TradePoint { timestamp: now, price, quantity });

        let mut volume: u128 = 0;
        let mut high: Option<u128> = None;
        let mut low: Option<u128> = None;
        for point in &next.window {
            volume = precision::checked_add(volume, point.quantity)?;
            high = Some(high.map_or(point.price, |h| h.max(point.price)));
            low = Some(low.map_or(point.price, |l| l.min(point.price)));
        }

        next.last_price = Some(price);
        next.trade_count = self.trade_count.checked_add(1).ok_or_else(|| {
            ExchangeError::ArithmeticOverflow("trade_count overflow".to_string())
        })?;
        next.volume_24h = volume;
        next.high_24h = high;
        next.low_24h = low;
        Ok(next)
    }
}

/// 市场聚合
pub struct Market {
    /// 市场配置
    pub config: MarketConfig,

    /// 生命周期状态
    pub state: MarketState,

    /// 管理暂停标志（与生命周期状态正交）
    pub is_paused: bool,

    /// 成交统计
    pub stats: MarketStats,

    /// 结算信息
    pub settlement: SettlementInfo,

    /// 订单存储 (order_id -> Order)
    orders: HashMap<u64, Order>,

    /// 订单簿协作方
    pub book: Box<dyn OrderBook>,

    /// 持仓存储（创建后永不删除）
    positions: Vec<Position>,

    /// 持仓索引 (position_id -> positions下标)
    position_index: HashMap<u64, usize>,

    /// 用户持仓索引 (owner -> positions下标列表)
    user_positions: HashMap<String, Vec<usize>>,

    /// 创建时间（Unix 秒）
    pub created_at: i64,
}

impl Market {
    pub fn new(config: MarketConfig, now: i64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: MarketState::Active,
            is_paused: false,
            stats: MarketStats::default(),
            settlement: SettlementInfo::default(),
            orders: HashMap::new(),
            book: Box::new(LevelBook::new()),
            positions: Vec::new(),
            position_index: HashMap::new(),
            user_positions: HashMap::new(),
            created_at: now,
        })
    }

    // ========== 准入检查 ==========

    /// 是否可接受新订单
    pub fn check_accepting_orders(&self, now: i64) -> Result<()> {
        if self.state != MarketState::Active {
            return Err(ExchangeError::MarketError(format!(
                "Market {} not active: {:?}",
                self.config.metric_id, self.state
            )));
        }
        if self.is_paused {
            return Err(ExchangeError::MarketError(format!(
                "Market {} is paused",
                self.config.metric_id
            )));
        }
        if now >= self.config.trading_end {
            return Err(ExchangeError::MarketError(format!(
                "Market {} trading window closed",
                self.config.metric_id
            )));
        }
        Ok(())
    }

    /// 订单参数校验：档位对齐与数量边界
    pub fn validate_order_params(&self, price: u128, quantity: u128) -> Result<()> {
        if !precision::is_tick_aligned(price, self.config.tick_size) {
            return Err(ExchangeError::OrderError(format!(
                "Price {} not aligned to tick {}",
                price, self.config.tick_size
            )));
        }
        if quantity < self.config.minimum_order_size {
            return Err(ExchangeError::OrderError(format!(
                "Quantity {} below minimum {}",
                quantity, self.config.minimum_order_size
            )));
        }
        // 上限为 0 表示不设上限
        if self.config.maximum_order_size > 0 && quantity > self.config.maximum_order_size {
            return Err(ExchangeError::OrderError(format!(
                "Quantity {} above maximum {}",
                quantity, self.config.maximum_order_size
            )));
        }
        Ok(())
    }

    // ========== 生命周期流转 ==========

    /// 管理员提前终止交易
    pub fn end_trading(&mut self) -> Result<()> {
        if self.state != MarketState::Active {
            return Err(ExchangeError::MarketError(format!(
                "Cannot end trading in state {:?}",
                self.state
            )));
        }
        self.state = MarketState::TradingEnded;
        Ok(())
    }

    /// 记录结算请求已发出
    pub fn mark_settlement_requested(&mut self, request_id: u64) -> Result<()> {
        match self.state {
            MarketState::Active | MarketState::TradingEnded => {
                self.state = MarketState::SettlementRequested;
                self.settlement.request_id = Some(request_id);
                Ok(())
            }
            _ => Err(ExchangeError::SettlementError(format!(
                "Cannot request settlement in state {:?}",
                self.state
            ))),
        }
    }

    /// 记录最终结算值（恰好一次）
    pub fn mark_settled(&mut self, settlement_value: u128, now: i64) -> Result<()> {
        if self.settlement.is_settled {
            return Err(ExchangeError::SettlementError(format!(
                "Market {} already settled",
                self.config.metric_id
            )));
        }
        if self.state != MarketState::SettlementRequested {
            return Err(ExchangeError::SettlementError(format!(
                "Cannot settle in state {:?}",
                self.state
            )));
        }
        self.settlement.settlement_value = Some(settlement_value);
        self.settlement.is_settled = true;
        self.settlement.settled_at = Some(now);
        self.state = MarketState::Settled;
        Ok(())
    }

    // ========== 订单存储 ==========

    pub fn insert_order(&mut self, order: Order) {
        self.orders.insert(order.order_id, order);
    }

    pub fn get_order(&self, order_id: u64) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn get_order_mut(&mut self, order_id: u64) -> Option<&mut Order> {
        self.orders.get_mut(&order_id)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // ========== 持仓存储 ==========

    /// 登记新持仓
    pub fn add_position(&mut self, position: Position) {
        let idx = self.positions.len();
        self.position_index.insert(position.position_id, idx);
        self.user_positions
            .entry(position.owner.clone())
            .or_default()
            .push(idx);
        self.positions.push(position);
    }

    pub fn get_position(&self, position_id: u64) -> Option<&Position> {
        self.position_index
            .get(&position_id)
            .and_then(|idx| self.positions.get(*idx))
    }

    pub fn get_position_mut(&mut self, position_id: u64) -> Option<&mut Position> {
        match self.position_index.get(&position_id) {
            Some(idx) => self.positions.get_mut(*idx),
            None => None,
        }
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// 未结算持仓数
    pub fn open_position_count(&self) -> usize {
        self.positions.iter().filter(|p| !p.is_settled).count()
    }

    /// 用户全部持仓
    pub fn positions_of(&self, owner: &str) -> Vec<&Position> {
        self.user_positions
            .get(owner)
            .map(|indices| indices.iter().filter_map(|i| self.positions.get(*i)).collect())
            .unwrap_or_default()
    }

    /// 分页查询持仓（按持仓ID顺序）
    pub fn positions_page(&self, offset: usize, limit: usize) -> Vec<&Position> {
        self.positions.iter().skip(offset).take(limit).collect()
    }

    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::precision::PRICE_PRECISION;

    fn create_test_config() -> MarketConfig {
        MarketConfig {
            metric_id: "GAS_DAILY_TXNS".to_string(),
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
    fn test_config_validation() {
        let mut config = create_test_config();
        assert!(config.validate().is_ok());

        config.tick_size = 0;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.trading_end = config.settlement_date + 1;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.maximum_order_size = config.minimum_order_size - 1;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.request_window_secs = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accepting_orders_lifecycle() {
        let mut market = Market::new(create_test_config(), 1_900_000_000).unwrap();
        assert!(market.check_accepting_orders(1_900_000_000).is_ok());

        // 交易截止后拒绝
        assert!(market.check_accepting_orders(2_000_000_000).is_err());

        // 暂停后拒绝
        market.is_paused = true;
        assert!(market.check_accepting_orders(1_900_000_000).is_err());
        market.is_paused = false;

        // 终止交易后拒绝
        market.end_trading().unwrap();
        assert!(market.check_accepting_orders(1_900_000_000).is_err());
    }

    #[test]
    fn test_order_param_bounds() {
        let mut config = create_test_config();
        config.maximum_order_size = 10 * PRICE_PRECISION;
        let market = Market::new(config, 0).unwrap();

        let tick = PRICE_PRECISION / 100;
        assert!(market.validate_order_params(tick * 500, PRICE_PRECISION).is_ok());
        // 档位不对齐
        assert!(market.validate_order_params(tick * 500 + 1, PRICE_PRECISION).is_err());
        // 低于下限
        assert!(market.validate_order_params(tick * 500, PRICE_PRECISION - 1).is_err());
        // 超出上限
        assert!(market
            .validate_order_params(tick * 500, 11 * PRICE_PRECISION)
            .is_err());
    }

    #[test]
    fn test_zero_maximum_is_unbounded() {
        let market = Market::new(create_test_config(), 0).unwrap();
        let tick = PRICE_PRECISION / 100;
        assert!(market
            .validate_order_params(tick * 500, 1_000_000 * PRICE_PRECISION)
            .is_ok());
    }

    #[test]
    fn test_settlement_state_machine() {
        let mut market = Market::new(create_test_config(), 0).unwrap();

        // ACTIVE下不可直接最终化
        assert!(market.mark_settled(42, 100).is_err());

        market.mark_settlement_requested(7).unwrap();
        assert_eq!(market.state, MarketState::SettlementRequested);
        // 重复请求被拒绝
        assert!(market.mark_settlement_requested(8).is_err());

        market.mark_settled(42, 100).unwrap();
        assert_eq!(market.state, MarketState::Settled);
        assert_eq!(market.settlement.settlement_value, Some(42));
        // 恰好一次
        assert!(market.mark_settled(43, 101).is_err());
    }

    #[test]
    fn test_trading_ended_allows_settlement_request() {
        let mut market = Market::new(create_test_config(), 0).unwrap();
        market.end_trading().unwrap();
        assert!(market.mark_settlement_requested(7).is_ok());
    }

    #[test]
    fn test_stats_rolling_window() {
        let stats = MarketStats::default();
        let s1 = stats.with_trade(100, 10, 1_000_000).unwrap();
        let s2 = s1.with_trade(120, 5, 1_000_100).unwrap();

        assert_eq!(s2.last_price, Some(120));
        assert_eq!(s2.trade_count, 2);
        assert_eq!(s2.volume_24h, 15);
        assert_eq!(s2.high_24h, Some(120));
        assert_eq!(s2.low_24h, Some(100));

        // 第一笔滑出窗口
        let s3 = s2.with_trade(110, 3, 1_000_000 + STATS_WINDOW_SECS + 1).unwrap();
        assert_eq!(s3.volume_24h, 8);
        assert_eq!(s3.high_24h, Some(120));
        assert_eq!(s3.trade_count, 3);
    }

    #[test]
    fn test_stats_overflow_rejected() {
        let stats = MarketStats::default();
        let s1 = stats.with_trade(100, u128::MAX, 1_000_000).unwrap();
        assert!(s1.with_trade(100, 1, 1_000_001).is_err());
    }

    #[test]
    fn test_position_indexes() {
        use crate::core::order::OrderSide;

        let mut market = Market::new(create_test_config(), 0).unwrap();
        market.add_position(Position::new(
            1, "alice".to_string(), OrderSide::Buy, 10, 100, 5, 1, 0,
        ));
        market.add_position(Position::new(
            2, "bob".to_string(), OrderSide::Sell, 10, 100, 5, 2, 0,
        ));
        market.add_position(Position::new(
            3, "alice".to_string(), OrderSide::Buy, 20, 110, 11, 3, 0,
        ));

        assert_eq!(market.position_count(), 3);
        assert_eq!(market.positions_of("alice").len(), 2);
        assert_eq!(market.get_position(2).unwrap().owner, "bob");
        assert_eq!(market.positions_page(1, 1)[0].position_id, 2);
        assert_eq!(market.open_position_count(), 3);
    }
}
