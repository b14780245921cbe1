//! 预言机管理器
//!
//! 每个数据请求是一个 `requested → resolved` 的两态机。请求与结算拆分为
//! 两个独立调用：解析在外部异步发生，争议窗口结束后任何调用方都可以
//! 触发 `settle_request` 把最终值拉回本地。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::exchange::capability::{Capability, CapabilityRegistry};
use crate::ledger::CollateralLedger;
use crate::oracle::metric_registry::MetricRegistry;
use crate::oracle::resolution::OracleResolutionService;
use crate::{ExchangeError, Result};

/// 数据请求记录
///
/// 创建后仅在解析服务报告最终值时变更一次，此后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    /// 请求ID（输入哈希 + 盐值派生）
    pub request_id: u64,

    /// 指标代码
    pub metric_id: String,

    /// 请求的数据时间戳
    pub timestamp: i64,

    /// 附加数据（转发给解析服务）
    pub ancillary_data: String,

    /// 托管的保证金（原生精度）
    pub bond: u128,

    /// 提案奖励
    pub reward: u128,

    /// 请求方
    pub requester: String,

    /// 是否已解析
    pub resolved: bool,

    /// 最终值（18位定点）
    pub resolved_value: Option<u128>,

    /// 请求时间（Unix 秒）
    pub requested_at: i64,

    /// 解析时间
    pub resolved_at: Option<i64>,
}

/// 请求状态查询结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestStatus {
    pub resolved: bool,
    pub value: Option<u128>,
}

/// 历史指标值
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalValue {
    pub timestamp: i64,
    pub value: u128,
}

/// 预言机管理器
pub struct OracleManager {
    /// 指标注册表
    metrics: Arc<MetricRegistry>,

    /// 外部解析服务
    resolution: Arc<dyn OracleResolutionService>,

    /// 抵押账本（保证金托管）
    ledger: Arc<dyn CollateralLedger>,

    /// 权限注册表
    capabilities: Arc<CapabilityRegistry>,

    /// 请求映射 (request_id -> DataRequest)
    requests: DashMap<u64, DataRequest>,

    /// 每指标待解析请求列表 (metric_id -> Vec<request_id>)
    pending: DashMap<String, Vec<u64>>,

    /// 每指标历史值时间序列
    history: DashMap<String, Vec<HistoricalValue>>,
}

impl OracleManager {
    pub fn new(
        metrics: Arc<MetricRegistry>,
        resolution: Arc<dyn OracleResolutionService>,
        ledger: Arc<dyn CollateralLedger>,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            metrics,
            resolution,
            ledger,
            capabilities,
            requests: DashMap::new(),
            pending: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// 派生请求ID：输入哈希叠加伪随机盐值；碰撞视为硬失败，不重试
    fn derive_request_id(
        &self,
        metric_id: &str,
        timestamp: i64,
        ancillary_data: &str,
        requester: &str,
    ) -> Result<u64> {
        let salt: u64 = rand::thread_rng().gen();

        let mut hasher = DefaultHasher::new();
        metric_id.hash(&mut hasher);
        timestamp.hash(&mut hasher);
        ancillary_data.hash(&mut hasher);
        requester.hash(&mut hasher);
        salt.hash(&mut hasher);
        let request_id = hasher.finish();

        if self.requests.contains_key(&request_id) {
            return Err(ExchangeError::OracleError(format!(
                "request id collision: {}",
                request_id
            )));
        }
        Ok(request_id)
    }

    /// 发起指标数据请求
    ///
    /// 调用方需持有通用请求权限，或在该指标的授权白名单内。
    /// 保证金从调用方托管；请求随后转发给外部解析服务。
    pub fn request_metric_data(
        &self,
        caller: &str,
        metric_id: &str,
        timestamp: i64,
        ancillary_data: &str,
        bond_override: Option<u128>,
        reward_override: Option<u128>,
    ) -> Result<u64> {
        // 1. 权限：通用请求方或指标白名单
        if !self.capabilities.has(caller, Capability::OracleRequester)
            && !self.metrics.is_authorized(metric_id, caller)
        {
            return Err(ExchangeError::CapabilityDenied(format!(
                "{} may not request data for {}",
                caller, metric_id
            )));
        }

        // 2. 指标必须启用
        let config = self.metrics.get(metric_id).ok_or_else(|| {
            ExchangeError::OracleError(format!("Metric {} not found", metric_id))
        })?;
        if !config.active {
            return Err(ExchangeError::OracleError(format!(
                "Metric {} is not active",
                metric_id
            )));
        }

        // 3. 保证金与奖励
        let bond = config.bond_for_request(bond_override);
        let reward = reward_override.unwrap_or(config.default_reward);

        // 4. 派生请求ID（碰撞即失败）
        let request_id = self.derive_request_id(metric_id, timestamp, ancillary_data, caller)?;

        // 5. 托管保证金
        let (token, _) = self.ledger.primary_collateral_token();
        self.ledger.allocate_assets(caller, &token, bond)?;

        // 6. 先落账本地状态，再调用外部服务
        let request = DataRequest {
            request_id,
            metric_id: metric_id.to_string(),
            timestamp,
            ancillary_data: ancillary_data.to_string(),
            bond,
            reward,
            requester: caller.to_string(),
            resolved: false,
            resolved_value: None,
            requested_at: Utc::now().timestamp(),
            resolved_at: None,
        };
        self.requests.insert(request_id, request);
        self.pending
            .entry(metric_id.to_string())
            .or_default()
            .push(request_id);

        // 7. 转发给解析服务；失败则回滚本地状态与保证金
        if let Err(e) =
            self.resolution
                .request_price(caller, metric_id, timestamp, ancillary_data, &token, reward)
        {
            log::error!("Oracle forward failed for {}: {}", metric_id, e);
            self.requests.remove(&request_id);
            if let Some(mut ids) = self.pending.get_mut(metric_id) {
                ids.retain(|id| *id != request_id);
            }
            let custody = self.ledger.custody_account();
            let _ = self
                .ledger
                .deallocate_assets(caller, &token, bond)
                .and_then(|_| self.ledger.transfer_assets(&custody, caller, &token, bond));
            return Err(e);
        }

        log::info!(
            "Metric data requested: metric={}, timestamp={}, bond={}, request_id={}",
            metric_id, timestamp, bond, request_id
        );
        Ok(request_id)
    }

    /// 结算请求（公开可调用）
    ///
    /// 查询解析服务状态，仅在已最终化时拉取最终值、记录历史序列并
    /// 从待解析列表移除。解析状态先落账，保证金释放后置。
    pub fn settle_request(&self, request_id: u64) -> Result<u128> {
        let (metric_id, timestamp, ancillary_data, requester, bond) = {
            let request = self.requests.get(&request_id).ok_or_else(|| {
                ExchangeError::OracleError(format!("Request {} not found", request_id))
            })?;
            if request.resolved {
                return Err(ExchangeError::OracleError(format!(
                    "Request {} already settled",
                    request_id
                )));
            }
            (
                request.metric_id.clone(),
                request.timestamp,
                request.ancillary_data.clone(),
                request.requester.clone(),
                request.bond,
            )
        };

        // 外部解析状态查询
        let state =
            self.resolution
                .get_request(&requester, &metric_id, timestamp, &ancillary_data)?;
        if !state.resolved {
            return Err(ExchangeError::OracleError(format!(
                "Request {} not resolved yet",
                request_id
            )));
        }

        let value = self
            .resolution
            .settle(&requester, &metric_id, timestamp, &ancillary_data)?;

        // 先提交本地状态（解析标记、历史值、待解析列表），再释放保证金
        let now = Utc::now().timestamp();
        if let Some(mut request) = self.requests.get_mut(&request_id) {
            request.resolved = true;
            request.resolved_value = Some(value);
            request.resolved_at = Some(now);
        }

        self.history
            .entry(metric_id.clone())
            .or_default()
            .push(HistoricalValue { timestamp, value });

        if let Some(mut ids) = self.pending.get_mut(&metric_id) {
            ids.retain(|id| *id != request_id);
        }

        // 保证金释放经托管池回到请求方
        let (token, _) = self.ledger.primary_collateral_token();
        let custody = self.ledger.custody_account();
        if let Err(e) = self
            .ledger
            .deallocate_assets(&requester, &token, bond)
            .and_then(|_| self.ledger.transfer_assets(&custody, &requester, &token, bond))
        {
            log::error!("Bond release failed for request {}: {}", request_id, e);
        }

        log::info!(
            "Oracle request settled: request_id={}, metric={}, value={}",
            request_id, metric_id, value
        );
        Ok(value)
    }

    /// 查询请求解析状态
    pub fn get_request_status(&self, request_id: u64) -> Result<RequestStatus> {
        let request = self.requests.get(&request_id).ok_or_else(|| {
            ExchangeError::OracleError(format!("Request {} not found", request_id))
        })?;
        Ok(RequestStatus {
            resolved: request.resolved,
            value: request.resolved_value,
        })
    }

    /// 查询请求记录
    pub fn get_request(&self, request_id: u64) -> Option<DataRequest> {
        self.requests.get(&request_id).map(|r| r.value().clone())
    }

    /// 查询指标的待解析请求
    pub fn pending_requests(&self, metric_id: &str) -> Vec<u64> {
        self.pending
            .get(metric_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// 查询指标历史值序列
    pub fn historical_values(&self, metric_id: &str) -> Vec<HistoricalValue> {
        self.history
            .get(metric_id)
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    /// 指标最近一次解析值
    pub fn latest_value(&self, metric_id: &str) -> Option<HistoricalValue> {
        self.history
            .get(metric_id)
            .and_then(|values| values.last().copied())
    }

    /// 指标注册表引用
    pub fn metric_registry(&self) -> Arc<MetricRegistry> {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::oracle::metric_registry::MetricConfig;
    use crate::oracle::resolution::SimulatedResolutionService;

    fn create_test_manager() -> (OracleManager, Arc<SimulatedResolutionService>, Arc<InMemoryLedger>) {
        let metrics = Arc::new(MetricRegistry::new());
        metrics
            .register(MetricConfig::new("GAS_DAILY_TXNS".to_string(), 100, 0))
            .unwrap();

        let resolution = Arc::new(SimulatedResolutionService::new(0));
        let ledger = Arc::new(InMemoryLedger::new("USDC", 6, "market::custody"));
        ledger.deposit("requester", "USDC", 10_000).unwrap();

        let capabilities = Arc::new(CapabilityRegistry::new());
        capabilities.grant("requester", Capability::OracleRequester);

        let manager = OracleManager::new(
            metrics,
            resolution.clone(),
            ledger.clone(),
            capabilities,
        );
        (manager, resolution, ledger)
    }

    #[test]
    fn test_request_escrows_bond() {
        let (manager, _, ledger) = create_test_manager();

        let request_id = manager
            .request_metric_data("requester", "GAS_DAILY_TXNS", 1_700_000_000, "", None, None)
            .unwrap();

        assert!(manager.get_request(request_id).is_some());
        assert_eq!(manager.pending_requests("GAS_DAILY_TXNS"), vec![request_id]);

        let b = ledger.balance_of("requester", "USDC");
        assert_eq!(b.allocated, 100);
        assert_eq!(b.available, 9_900);
    }

    #[test]
    fn test_unauthorized_requester_rejected() {
        let (manager, _, ledger) = create_test_manager();
        ledger.deposit("stranger", "USDC", 10_000).unwrap();

        let result =
            manager.request_metric_data("stranger", "GAS_DAILY_TXNS", 1_700_000_000, "", None, None);
        assert!(matches!(result, Err(ExchangeError::CapabilityDenied(_))));
    }

    #[test]
    fn test_per_metric_whitelist_allows_request() {
        let (manager, _, ledger) = create_test_manager();
        ledger.deposit("market::engine", "USDC", 10_000).unwrap();
        manager
            .metric_registry()
            .authorize_requester("GAS_DAILY_TXNS", "market::engine")
            .unwrap();

        let result = manager.request_metric_data(
            "market::engine",
            "GAS_DAILY_TXNS",
            1_700_000_000,
            "",
            None,
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_inactive_metric_rejected() {
        let (manager, _, _) = create_test_manager();
        manager.metric_registry().set_active("GAS_DAILY_TXNS", false).unwrap();

        let result =
            manager.request_metric_data("requester", "GAS_DAILY_TXNS", 1_700_000_000, "", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_settle_flow_records_history_and_releases_bond() {
        let (manager, resolution, ledger) = create_test_manager();

        let request_id = manager
            .request_metric_data("requester", "GAS_DAILY_TXNS", 1_700_000_000, "", None, None)
            .unwrap();

        // 未提案 → 不可结算
        assert!(manager.settle_request(request_id).is_err());
        let status = manager.get_request_status(request_id).unwrap();
        assert!(!status.resolved);

        // 提案后窗口（0秒）即最终化
        resolution
            .propose("requester", "GAS_DAILY_TXNS", 1_700_000_000, "", 42)
            .unwrap();

        let value = manager.settle_request(request_id).unwrap();
        assert_eq!(value, 42);

        let status = manager.get_request_status(request_id).unwrap();
        assert!(status.resolved);
        assert_eq!(status.value, Some(42));

        // 历史序列、待解析列表、保证金释放
        let history = manager.historical_values("GAS_DAILY_TXNS");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 42);
        assert!(manager.pending_requests("GAS_DAILY_TXNS").is_empty());
        let b = ledger.balance_of("requester", "USDC");
        assert_eq!(b.allocated, 0);
        assert_eq!(b.available, 10_000);

        // 重复结算被拒绝
        assert!(manager.settle_request(request_id).is_err());
    }

    #[test]
    fn test_bond_override_floored_at_minimum() {
        let (manager, _, ledger) = create_test_manager();

        manager
            .request_metric_data("requester", "GAS_DAILY_TXNS", 1_700_000_000, "", Some(10), None)
            .unwrap();

        // 覆盖值 10 低于下限 100，按下限托管
        assert_eq!(ledger.balance_of("requester", "USDC").allocated, 100);
    }
}
