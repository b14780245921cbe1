//! 配置管理
//!
//! TOML 配置加载：抵押代币、预言机参数与市场定义。配置中的价格与
//! 数量使用人类可读小数，加载时转换为内部 18 位定点或代币原生精度。

use serde::{Deserialize, Serialize};

use crate::exchange::market::MarketConfig;
use crate::math::precision::{from_f64, to_native};
use crate::oracle::metric_registry::MetricConfig;
use crate::{ExchangeError, Result};

/// 抵押代币配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralConfig {
    /// 代币代码
    #[serde(default = "default_token")]
    pub token: String,

    /// 代币精度位数
    #[serde(default = "default_decimals")]
    pub decimals: u32,

    /// 市场托管账户
    #[serde(default = "default_custody_account")]
    pub custody_account: String,
}

fn default_token() -> String {
    "USDC".to_string()
}

fn default_decimals() -> u32 {
    6
}

fn default_custody_account() -> String {
    "market::custody".to_string()
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            decimals: default_decimals(),
            custody_account: default_custody_account(),
        }
    }
}

/// 预言机配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// 默认争议窗口（秒）
    #[serde(default = "default_liveness_secs")]
    pub default_liveness_secs: i64,

    /// 默认保证金（人类可读单位）
    #[serde(default)]
    pub default_bond: f64,

    /// 保证金下限（人类可读单位）
    #[serde(default)]
    pub minimum_bond: f64,

    /// 默认提案奖励（人类可读单位）
    #[serde(default)]
    pub default_reward: f64,
}

fn default_liveness_secs() -> i64 {
    7200
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            default_liveness_secs: default_liveness_secs(),
            default_bond: 0.0,
            minimum_bond: 0.0,
            default_reward: 0.0,
        }
    }
}

/// 市场定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEntry {
    /// 指标代码
    pub metric_id: String,

    /// 指标展示小数位
    #[serde(default = "default_metric_decimals")]
    pub decimals: u32,

    /// 价格最小变动单位（人类可读）
    pub tick_size: f64,

    /// 最小订单数量（人类可读）
    #[serde(default)]
    pub minimum_order_size: f64,

    /// 最大订单数量（0 表示不设上限）
    #[serde(default)]
    pub maximum_order_size: f64,

    /// 交易截止时间（Unix 秒）
    pub trading_end: i64,

    /// 结算数据时间戳（Unix 秒）
    pub settlement_date: i64,

    /// 结算数据请求调度窗口（秒，供外部调度方参考）
    #[serde(default = "default_request_window")]
    pub request_window_secs: i64,

    /// 最终化后是否自动批量结算全部持仓
    #[serde(default)]
    pub auto_settle: bool,
}

fn default_metric_decimals() -> u32 {
    18
}

fn default_request_window() -> i64 {
    3600
}

impl MarketEntry {
    /// 转换为内部市场配置（18位定点）
    pub fn to_market_config(&self) -> Result<MarketConfig> {
        let config = MarketConfig {
            metric_id: self.metric_id.clone(),
            decimals: self.decimals,
            minimum_order_size: from_f64(self.minimum_order_size)?,
            maximum_order_size: from_f64(self.maximum_order_size)?,
            tick_size: from_f64(self.tick_size)?,
            trading_end: self.trading_end,
            settlement_date: self.settlement_date,
            request_window_secs: self.request_window_secs,
            auto_settle: self.auto_settle,
        };
        config.validate()?;
        Ok(config)
    }
}

/// 交易所配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// 抵押代币
    #[serde(default)]
    pub collateral: CollateralConfig,

    /// 预言机参数
    #[serde(default)]
    pub oracle: OracleConfig,

    /// 市场定义列表
    #[serde(default)]
    pub markets: Vec<MarketEntry>,
}

impl ExchangeConfig {
    /// 从 TOML 文件加载配置
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExchangeError::ConfigError(format!("Failed to read config {}: {}", path, e))
        })?;

        let config: ExchangeConfig = toml::from_str(&content).map_err(|e| {
            ExchangeError::ConfigError(format!("Failed to parse config {}: {}", path, e))
        })?;

        config.validate()?;
        log::info!("Loaded config from {}: {} markets", path, config.markets.len());
        Ok(config)
    }

    /// 配置合法性校验
    pub fn validate(&self) -> Result<()> {
        if self.collateral.token.is_empty() {
            return Err(ExchangeError::ConfigError("collateral.token is empty".to_string()));
        }
        if self.oracle.minimum_bond < 0.0 || self.oracle.default_bond < 0.0 {
            return Err(ExchangeError::ConfigError("oracle bonds must not be negative".to_string()));
        }
        for entry in &self.markets {
            entry.to_market_config()?;
        }
        Ok(())
    }

    /// 人类可读金额 → 抵押代币原生精度
    pub fn to_native_amount(&self, value: f64) -> Result<u128> {
        to_native(from_f64(value)?, self.collateral.decimals)
    }

    /// 按预言机默认参数为指标生成配置
    pub fn to_metric_config(&self, metric_id: &str) -> Result<MetricConfig> {
        let mut config = MetricConfig::new(
            metric_id.to_string(),
            self.to_native_amount(self.oracle.minimum_bond)?,
            self.default_liveness_secs(),
        );
        config.default_bond = self
            .to_native_amount(self.oracle.default_bond)?
            .max(config.minimum_bond);
        config.default_reward = self.to_native_amount(self.oracle.default_reward)?;
        Ok(config)
    }

    pub fn default_liveness_secs(&self) -> i64 {
        self.oracle.default_liveness_secs
    }
}
