//! 市场事件广播系统
//!
//! 负责将订单生命周期、结算进度与管理操作广播给所有订阅者

use std::sync::Arc;
use dashmap::DashMap;
use crossbeam::channel::{Sender, Receiver, unbounded};
use serde::{Serialize, Deserialize};
use crate::core::order::OrderSide;

/// 市场事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// 订单进簿
    OrderAccepted {
        metric_id: String,
        order_id: u64,
        trader: String,
        side: OrderSide,
        quantity: u128,
        price: u128,
        timestamp: i64,
    },

    /// 订单撤销
    OrderCancelled {
        metric_id: String,
        order_id: u64,
        trader: String,
        timestamp: i64,
    },

    /// 订单成交（持仓创建）
    OrderFilled {
        metric_id: String,
        order_id: u64,
        trader: String,
        side: OrderSide,
        quantity: u128,
        price: u128,
        position_id: u64,
        timestamp: i64,
    },

    /// 订单簿被紧急清空
    BookCleared {
        metric_id: String,
        dropped_orders: u64,
        timestamp: i64,
    },

    /// 交易暂停
    TradingPaused {
        metric_id: String,
        timestamp: i64,
    },

    /// 交易恢复
    TradingResumed {
        metric_id: String,
        timestamp: i64,
    },

    /// 交易被管理员提前终止
    TradingEnded {
        metric_id: String,
        timestamp: i64,
    },

    /// 截止时间延后
    DeadlinesExtended {
        metric_id: String,
        trading_end: i64,
        settlement_date: i64,
        timestamp: i64,
    },

    /// 订单数量限额更新
    OrderLimitsUpdated {
        metric_id: String,
        minimum_order_size: u128,
        maximum_order_size: u128,
        timestamp: i64,
    },

    /// 结算数据请求已发出
    SettlementRequested {
        metric_id: String,
        request_id: u64,
        timestamp: i64,
    },

    /// 市场结算值最终化
    MarketSettled {
        metric_id: String,
        settlement_value: u128,
        position_count: u64,
        timestamp: i64,
    },

    /// 单个持仓完成结算
    PositionSettled {
        metric_id: String,
        position_id: u64,
        owner: String,
        payout: u128,
        pnl: i128,
        timestamp: i64,
    },
}

impl MarketEvent {
    fn metric_id(&self) -> &str {
        match self {
            MarketEvent::OrderAccepted { metric_id, .. } => metric_id,
            MarketEvent::OrderCancelled { metric_id, .. } => metric_id,
            MarketEvent::OrderFilled { metric_id, .. } => metric_id,
            MarketEvent::BookCleared { metric_id, .. } => metric_id,
            MarketEvent::TradingPaused { metric_id, .. } => metric_id,
            MarketEvent::TradingResumed { metric_id, .. } => metric_id,
            MarketEvent::TradingEnded { metric_id, .. } => metric_id,
            MarketEvent::DeadlinesExtended { metric_id, .. } => metric_id,
            MarketEvent::OrderLimitsUpdated { metric_id, .. } => metric_id,
            MarketEvent::SettlementRequested { metric_id, .. } => metric_id,
            MarketEvent::MarketSettled { metric_id, .. } => metric_id,
            MarketEvent::PositionSettled { metric_id, .. } => metric_id,
        }
    }

    fn channel(&self) -> &'static str {
        match self {
            MarketEvent::OrderAccepted { .. }
            | MarketEvent::OrderCancelled { .. }
            | MarketEvent::OrderFilled { .. } => "order",
            MarketEvent::SettlementRequested { .. }
            | MarketEvent::MarketSettled { .. }
            | MarketEvent::PositionSettled { .. } => "settlement",
            MarketEvent::BookCleared { .. }
            | MarketEvent::TradingPaused { .. }
            | MarketEvent::TradingResumed { .. }
            | MarketEvent::TradingEnded { .. }
            | MarketEvent::DeadlinesExtended { .. }
            | MarketEvent::OrderLimitsUpdated { .. } => "admin",
        }
    }
}

/// 订阅信息
#[derive(Debug, Clone)]
struct Subscription {
    /// 订阅的市场列表（空表示全部）
    metrics: Vec<String>,
    /// 订阅的频道（order, settlement, admin；空表示全部）
    channels: Vec<String>,
}

/// 市场事件广播器
pub struct MarketEventBroadcaster {
    /// 订阅者映射 (subscriber_id -> Sender<MarketEvent>)
    subscribers: Arc<DashMap<String, (Sender<MarketEvent>, Subscription)>>,
}

impl MarketEventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// 订阅市场事件
    ///
    /// # 参数
    /// - `subscriber_id`: 订阅者ID（通常是session_id）
    /// - `metrics`: 订阅的市场列表
    /// - `channels`: 订阅的频道（order, settlement, admin）
    ///
    /// # 返回
    /// 返回接收器，订阅者通过该接收器接收市场事件
    pub fn subscribe(
        &self,
        subscriber_id: String,
        metrics: Vec<String>,
        channels: Vec<String>,
    ) -> Receiver<MarketEvent> {
        let (sender, receiver) = unbounded();

        let subscription = Subscription {
            metrics: metrics.clone(),
            channels: channels.clone(),
        };

        self.subscribers.insert(subscriber_id.clone(), (sender, subscription));

        log::info!(
            "Event subscriber {} subscribed to metrics: {:?}, channels: {:?}",
            subscriber_id,
            metrics,
            channels
        );

        receiver
    }

    /// 取消订阅
    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
        log::info!("Event subscriber {} unsubscribed", subscriber_id);
    }

    /// 广播市场事件
    pub fn broadcast(&self, event: MarketEvent) {
        let metric_id = event.metric_id().to_string();
        let channel = event.channel();

        for entry in self.subscribers.iter() {
            let (subscriber_id, (sender, subscription)) = entry.pair();

            let subscribed_metric = subscription.metrics.is_empty()
                || subscription.metrics.iter().any(|id| id == &metric_id);

            let subscribed_channel = subscription.channels.is_empty()
                || subscription.channels.iter().any(|ch| ch == channel);

            if subscribed_metric && subscribed_channel {
                if let Err(e) = sender.try_send(event.clone()) {
                    log::warn!(
                        "Failed to send event to subscriber {}: {}",
                        subscriber_id,
                        e
                    );
                }
            }
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for MarketEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
