//! 端到端结算流程测试
//!
//! 完整生命周期：注册市场 → 入金 → 挂单/成交 → 终止交易 →
//! 结算请求 → 预言机提案/最终化 → 批量结算 → 资金守恒校验

use std::sync::Arc;

use once_cell::sync::Lazy;

use mexchange::exchange::id_generator::MarketIdGenerator;
use mexchange::exchange::settlement::SettlementEngine;
use mexchange::ledger::memory::Balance;
use mexchange::oracle::metric_registry::MetricRegistry;
use mexchange::utils::ExchangeConfig;
use mexchange::{
    Capability, CapabilityRegistry, InMemoryLedger, MarketAdmin, MarketEvent,
    MarketEventBroadcaster, MarketRegistry, MarketState, OracleManager, OrderRouter, OrderSide,
    OrderType, SimulatedResolutionService, SubmitOrderRequest, TimeInForce, PRICE_PRECISION,
};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

const TICK: u128 = PRICE_PRECISION / 100;
const METRIC: &str = "GAS_DAILY_TXNS";
const TRADING_END: i64 = 4_000_000_000;
const SETTLEMENT_DATE: i64 = 4_000_086_400;

struct Stack {
    registry: Arc<MarketRegistry>,
    ledger: Arc<InMemoryLedger>,
    capabilities: Arc<CapabilityRegistry>,
    resolution: Arc<SimulatedResolutionService>,
    router: OrderRouter,
    engine: SettlementEngine,
    admin: MarketAdmin,
    broadcaster: Arc<MarketEventBroadcaster>,
}

fn build_stack() -> Stack {
    Lazy::force(&LOGGER);

    let config: ExchangeConfig = toml::from_str(&format!(
        r#"
[collateral]
token = "USDC"
decimals = 6
custody_account = "market::custody"

[oracle]
default_liveness_secs = 0
minimum_bond = 100.0

[[markets]]
metric_id = "{METRIC}"
tick_size = 0.01
minimum_order_size = 1.0
trading_end = {TRADING_END}
settlement_date = {SETTLEMENT_DATE}
"#
    ))
    .unwrap();
    config.validate().unwrap();

    let registry = Arc::new(MarketRegistry::new());
    for entry in &config.markets {
        registry.register(entry.to_market_config().unwrap(), 0).unwrap();
    }

    let ledger = Arc::new(InMemoryLedger::new(
        config.collateral.token.clone(),
        config.collateral.decimals,
        config.collateral.custody_account.clone(),
    ));
    ledger.deposit("alice", "USDC", 1_000_000_000).unwrap();
    ledger.deposit("bob", "USDC", 1_000_000_000).unwrap();
    ledger.deposit("ops", "USDC", 1_000_000_000).unwrap();
    // 托管池运营资金：净盈利的赔付由该池垫付
    ledger.deposit("market::custody", "USDC", 1_000_000_000).unwrap();

    let capabilities = Arc::new(CapabilityRegistry::new());
    capabilities.grant("router01", Capability::Router);
    capabilities.grant("ops", Capability::SettlementAuthority);
    capabilities.grant("ops", Capability::OracleRequester);
    capabilities.grant("admin01", Capability::MarketAdmin);

    let metrics = Arc::new(MetricRegistry::new());
    metrics.register(config.to_metric_config(METRIC).unwrap()).unwrap();

    let resolution = Arc::new(SimulatedResolutionService::new(config.default_liveness_secs()));
    let oracle = Arc::new(OracleManager::new(
        metrics,
        resolution.clone(),
        ledger.clone(),
        capabilities.clone(),
    ));

    let broadcaster = Arc::new(MarketEventBroadcaster::new());

    let mut router = OrderRouter::new(
        registry.clone(),
        ledger.clone(),
        capabilities.clone(),
        Arc::new(MarketIdGenerator::new()),
    );
    router.set_broadcaster(broadcaster.clone());

    let mut engine = SettlementEngine::new(
        registry.clone(),
        ledger.clone(),
        oracle,
        capabilities.clone(),
    );
    engine.set_broadcaster(broadcaster.clone());

    let mut admin = MarketAdmin::new(registry.clone(), capabilities.clone());
    admin.set_broadcaster(broadcaster.clone());

    Stack {
        registry,
        ledger,
        capabilities,
        resolution,
        router,
        engine,
        admin,
        broadcaster,
    }
}

fn limit(trader: &str, side: OrderSide, quantity: u128, price: u128) -> SubmitOrderRequest {
    SubmitOrderRequest {
        trader: trader.to_string(),
        metric_id: METRIC.to_string(),
        side,
        quantity,
        price,
        order_type: OrderType::Limit,
        time_in_force: TimeInForce::Gtc,
    }
}

fn total_funds(ledger: &InMemoryLedger, accounts: &[&str]) -> u128 {
    accounts
        .iter()
        .map(|a| {
            let Balance { available, allocated } = ledger.balance_of(a, "USDC");
            available + allocated
        })
        .sum()
}

#[test]
fn full_lifecycle_with_fund_conservation() {
    let stack = build_stack();
    let accounts = ["alice", "bob", "ops", "market::custody"];
    let initial_total = total_funds(&stack.ledger, &accounts);

    let subscriber = uuid::Uuid::new_v4().to_string();
    let events = stack.broadcaster.subscribe(subscriber, vec![], vec![]);

    // --- 交易阶段 ---
    // bob 挂卖 10.00，alice 穿越买入 5 @ 限价 10.00 → 多头，抵押 50
    let resp = stack
        .router
        .submit_order("router01", limit("bob", OrderSide::Sell, PRICE_PRECISION, TICK * 1000))
        .unwrap();
    assert_eq!(resp.status.as_deref(), Some("resting"));

    let long = stack
        .router
        .submit_order(
            "router01",
            limit("alice", OrderSide::Buy, 5 * PRICE_PRECISION, TICK * 1000),
        )
        .unwrap();
    assert_eq!(long.status.as_deref(), Some("filled"));
    assert_eq!(long.fill_price, Some(TICK * 1000));
    let long_id = long.position_id.unwrap();
    assert_eq!(stack.ledger.balance_of("alice", "USDC").allocated, 50_000_000);

    // alice 挂买 9.50，bob 穿越卖出 2 @ 限价 9.00 → 空头，抵押 18
    stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 950))
        .unwrap();
    let short = stack
        .router
        .submit_order(
            "router01",
            limit("bob", OrderSide::Sell, 2 * PRICE_PRECISION, TICK * 900),
        )
        .unwrap();
    assert_eq!(short.fill_price, Some(TICK * 900));
    let short_id = short.position_id.unwrap();
    assert_eq!(stack.ledger.balance_of("bob", "USDC").allocated, 18_000_000);

    // --- 结算阶段 ---
    stack.admin.end_trading("admin01", METRIC).unwrap();
    let request_id = stack.engine.request_settlement("ops", METRIC).unwrap();

    // 终止后拒绝新订单
    let rejected = stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 950))
        .unwrap();
    assert!(!rejected.success);

    // 预言机提案 12.00，窗口为 0 立即最终化
    stack
        .resolution
        .propose("ops", METRIC, SETTLEMENT_DATE, "", 12 * PRICE_PRECISION)
        .unwrap();

    // 期望值不符被拒绝，市场保持未结算
    assert!(stack
        .engine
        .finalize_settlement("ops", METRIC, 11 * PRICE_PRECISION)
        .is_err());
    let state = stack.registry.get(METRIC).unwrap().market.read().state;
    assert_eq!(state, MarketState::SettlementRequested);

    stack
        .engine
        .finalize_settlement("ops", METRIC, 12 * PRICE_PRECISION)
        .unwrap();

    // --- 批量结算 ---
    // 多头 5 @ 10 → 盈利 10，赔付 60；空头 2 @ 9 → 亏损 6，赔付 12
    let resp = stack
        .engine
        .settle_positions("ops", METRIC, &[long_id, short_id])
        .unwrap();
    assert_eq!(resp.settled_count, 2);
    assert_eq!(resp.total_payouts, 72_000_000);

    // alice: 1000 - 50 + 60 = 1010
    assert_eq!(stack.ledger.balance_of("alice", "USDC").available, 1_010_000_000);
    // bob: 1000 - 18 + 12 = 994
    assert_eq!(stack.ledger.balance_of("bob", "USDC").available, 994_000_000);
    // ops 的预言机保证金已归还
    assert_eq!(stack.ledger.balance_of("ops", "USDC").available, 1_000_000_000);
    assert_eq!(stack.ledger.balance_of("ops", "USDC").allocated, 0);

    // 资金守恒：多头盈利 10 由空头亏损 6 + 托管池差额补足
    assert_eq!(total_funds(&stack.ledger, &accounts), initial_total);

    // 重复结算被拒绝
    assert!(stack.engine.settle_positions("ops", METRIC, &[long_id]).is_err());

    // --- 事件流 ---
    let received: Vec<MarketEvent> = events.try_iter().collect();
    assert!(received.iter().any(|e| matches!(e, MarketEvent::OrderFilled { .. })));
    assert!(received.iter().any(|e| matches!(e, MarketEvent::TradingEnded { .. })));
    assert!(received.iter().any(
        |e| matches!(e, MarketEvent::SettlementRequested { request_id: id, .. } if *id == request_id)
    ));
    assert!(received
        .iter()
        .any(|e| matches!(e, MarketEvent::MarketSettled { settlement_value, .. } if *settlement_value == 12 * PRICE_PRECISION)));
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, MarketEvent::PositionSettled { .. }))
            .count(),
        2
    );
}

#[test]
fn loss_capped_at_collateral_leaves_custody_surplus() {
    let stack = build_stack();

    // alice 多头 5 @ 10.00，抵押 50
    stack
        .router
        .submit_order("router01", limit("bob", OrderSide::Sell, PRICE_PRECISION, TICK * 1000))
        .unwrap();
    let long = stack
        .router
        .submit_order(
            "router01",
            limit("alice", OrderSide::Buy, 5 * PRICE_PRECISION, TICK * 1000),
        )
        .unwrap();
    let long_id = long.position_id.unwrap();

    stack.admin.end_trading("admin01", METRIC).unwrap();
    stack.engine.request_settlement("ops", METRIC).unwrap();

    // 结算值 0：亏损 50 = 抵押品 → 赔付 0
    stack.resolution.propose("ops", METRIC, SETTLEMENT_DATE, "", 0).unwrap();
    stack.engine.finalize_settlement("ops", METRIC, 0).unwrap();

    stack.engine.settle_positions("ops", METRIC, &[long_id]).unwrap();

    let position = stack.engine.get_position(METRIC, long_id).unwrap();
    assert!(position.is_settled);
    assert_eq!(position.payout, 0);
    assert_eq!(position.pnl, -((50 * PRICE_PRECISION) as i128));

    // 抵押品全额留在托管池
    assert_eq!(stack.ledger.balance_of("alice", "USDC").available, 950_000_000);
    assert_eq!(stack.ledger.balance_of("alice", "USDC").allocated, 0);
    assert_eq!(
        stack.ledger.balance_of("market::custody", "USDC").available,
        1_050_000_000
    );
}

#[test]
fn capability_revocation_takes_effect() {
    let stack = build_stack();

    stack.capabilities.revoke("router01", Capability::Router);
    assert!(stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 900))
        .is_err());

    stack.capabilities.grant("router01", Capability::Router);
    assert!(stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 900))
        .unwrap()
        .success);
}

#[test]
fn paused_market_rejects_orders_until_resumed() {
    let stack = build_stack();

    stack.admin.pause_trading("admin01", METRIC).unwrap();
    let resp = stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 900))
        .unwrap();
    assert!(!resp.success);

    stack.admin.resume_trading("admin01", METRIC).unwrap();
    let resp = stack
        .router
        .submit_order("router01", limit("alice", OrderSide::Buy, PRICE_PRECISION, TICK * 900))
        .unwrap();
    assert!(resp.success);
}
