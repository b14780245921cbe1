//! 指标注册表
//!
//! 每个可请求指标的管理数据：保证金下限、默认奖励、争议窗口、
//! 启用标志与授权请求方列表。仅由配置操作修改。

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{ExchangeError, Result};

/// 指标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    /// 指标代码
    pub metric_id: String,

    /// 保证金下限（原生精度）
    pub minimum_bond: u128,

    /// 默认保证金（低于下限时取下限）
    pub default_bond: u128,

    /// 默认提案奖励（原生精度）
    pub default_reward: u128,

    /// 争议窗口时长（秒）
    pub liveness_secs: i64,

    /// 是否启用
    pub active: bool,

    /// 授权请求方（通用请求权限之外的白名单）
    pub authorized_requesters: Vec<String>,

    /// 创建时间
    pub created_at: String,

    /// 更新时间
    pub updated_at: String,
}

impl MetricConfig {
    pub fn new(metric_id: String, minimum_bond: u128, liveness_secs: i64) -> Self {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Self {
            metric_id,
            minimum_bond,
            default_bond: minimum_bond,
            default_reward: 0,
            liveness_secs,
            active: true,
            authorized_requesters: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// 计算本次请求的保证金：显式覆盖值，否则取默认值，下限兜底
    pub fn bond_for_request(&self, override_bond: Option<u128>) -> u128 {
        override_bond.unwrap_or(self.default_bond).max(self.minimum_bond)
    }
}

/// 指标注册表
pub struct MetricRegistry {
    metrics: DashMap<String, MetricConfig>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self { metrics: DashMap::new() }
    }

    /// 注册新指标
    pub fn register(&self, config: MetricConfig) -> Result<()> {
        if self.metrics.contains_key(&config.metric_id) {
            return Err(ExchangeError::OracleError(format!(
                "Metric {} already registered",
                config.metric_id
            )));
        }

        log::info!("Registering metric: {}", config.metric_id);
        self.metrics.insert(config.metric_id.clone(), config);
        Ok(())
    }

    /// 获取指标配置
    pub fn get(&self, metric_id: &str) -> Option<MetricConfig> {
        self.metrics.get(metric_id).map(|r| r.value().clone())
    }

    /// 列出所有指标
    pub fn list_all(&self) -> Vec<MetricConfig> {
        self.metrics.iter().map(|r| r.value().clone()).collect()
    }

    /// 更新指标配置
    pub fn update(
        &self,
        metric_id: &str,
        update_fn: impl FnOnce(&mut MetricConfig),
    ) -> Result<()> {
        match self.metrics.get_mut(metric_id) {
            Some(mut config) => {
                update_fn(config.value_mut());
                config.value_mut().updated_at =
                    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
                log::info!("Updated metric config: {}", metric_id);
                Ok(())
            }
            None => Err(ExchangeError::OracleError(format!(
                "Metric {} not found",
                metric_id
            ))),
        }
    }

    /// 启用/停用指标
    pub fn set_active(&self, metric_id: &str, active: bool) -> Result<()> {
        self.update(metric_id, |c| c.active = active)
    }

    /// 添加授权请求方
    pub fn authorize_requester(&self, metric_id: &str, requester: &str) -> Result<()> {
        self.update(metric_id, |c| {
            if !c.authorized_requesters.iter().any(|r| r == requester) {
                c.authorized_requesters.push(requester.to_string());
            }
        })
    }

    /// 移除授权请求方
    pub fn revoke_requester(&self, metric_id: &str, requester: &str) -> Result<()> {
        self.update(metric_id, |c| {
            c.authorized_requesters.retain(|r| r != requester);
        })
    }

    /// 请求方是否在指标白名单内
    pub fn is_authorized(&self, metric_id: &str, requester: &str) -> bool {
        self.metrics
            .get(metric_id)
            .map(|c| c.authorized_requesters.iter().any(|r| r == requester))
            .unwrap_or(false)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
