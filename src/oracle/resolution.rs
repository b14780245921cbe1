//! 预言机解析服务边界
//!
//! 乐观预言机模式：请求提交后，外部参与者在争议窗口内提案/争议，
//! 窗口结束后值最终化。本系统只消费接口，解析过程完全在外部发生。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{ExchangeError, Result};

/// 解析状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionState {
    /// 是否被争议
    pub disputed: bool,

    /// 是否已最终化
    pub resolved: bool,

    /// 提案值
    pub proposed_value: Option<u128>,

    /// 最终值（resolved 为 true 时存在）
    pub resolved_value: Option<u128>,

    /// 争议窗口截止时间（Unix 秒）
    pub expiration_time: i64,
}

/// 预言机解析服务接口
pub trait OracleResolutionService: Send + Sync {
    /// 提交数据请求，返回服务端请求序号
    fn request_price(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
        bond_token: &str,
        reward: u128,
    ) -> Result<u64>;

    /// 查询请求解析状态
    fn get_request(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
    ) -> Result<ResolutionState>;

    /// 结算请求并取回最终值；未最终化时返回错误
    fn settle(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
    ) -> Result<u128>;
}

/// 模拟请求记录
#[derive(Debug, Clone)]
struct SimRequest {
    state: ResolutionState,
    reward: u128,
    bond_token: String,
    requested_at: i64,
}

/// 模拟解析服务
///
/// 单进程参考实现：测试与演示通过 `propose`/`resolve_now` 驱动窗口流转。
pub struct SimulatedResolutionService {
    /// 请求映射 ("requester|identifier|timestamp|ancillary" -> SimRequest)
    requests: DashMap<String, SimRequest>,

    /// 服务端请求序号
    request_seq: AtomicU64,

    /// 默认争议窗口（秒）
    default_liveness: i64,
}

impl SimulatedResolutionService {
    pub fn new(default_liveness: i64) -> Self {
        Self {
            requests: DashMap::new(),
            request_seq: AtomicU64::new(1),
            default_liveness,
        }
    }

    fn key(requester: &str, identifier: &str, timestamp: i64, ancillary_data: &str) -> String {
        format!("{}|{}|{}|{}", requester, identifier, timestamp, ancillary_data)
    }

    /// 提案一个值（开启争议窗口）
    pub fn propose(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
        value: u128,
    ) -> Result<()> {
        let key = Self::key(requester, identifier, timestamp, ancillary_data);
        let mut request = self.requests.get_mut(&key).ok_or_else(|| {
            ExchangeError::OracleError(format!("unknown oracle request: {}", identifier))
        })?;

        if request.state.resolved {
            return Err(ExchangeError::OracleError(format!(
                "request already resolved: {}",
                identifier
            )));
        }

        request.state.proposed_value = Some(value);
        request.state.expiration_time = Utc::now().timestamp() + self.default_liveness;
        log::info!("Oracle proposal for {}: {}", identifier, value);
        Ok(())
    }

    /// 立即最终化提案值（跳过争议窗口，测试用）
    pub fn resolve_now(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
    ) -> Result<u128> {
        let key = Self::key(requester, identifier, timestamp, ancillary_data);
        let mut request = self.requests.get_mut(&key).ok_or_else(|| {
            ExchangeError::OracleError(format!("unknown oracle request: {}", identifier))
        })?;

        let value = request.state.proposed_value.ok_or_else(|| {
            ExchangeError::OracleError(format!("no proposal to resolve: {}", identifier))
        })?;

        request.state.resolved = true;
        request.state.resolved_value = Some(value);
        log::info!("Oracle resolved {} = {}", identifier, value);
        Ok(value)
    }
}

impl OracleResolutionService for SimulatedResolutionService {
    fn request_price(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
        bond_token: &str,
        reward: u128,
    ) -> Result<u64> {
        let key = Self::key(requester, identifier, timestamp, ancillary_data);
        if self.requests.contains_key(&key) {
            return Err(ExchangeError::OracleError(format!(
                "duplicate oracle request: {}",
                identifier
            )));
        }

        let seq = self.request_seq.fetch_add(1, Ordering::SeqCst);
        self.requests.insert(
            key,
            SimRequest {
                state: ResolutionState {
                    disputed: false,
                    resolved: false,
                    proposed_value: None,
                    resolved_value: None,
                    expiration_time: 0,
                },
                reward,
                bond_token: bond_token.to_string(),
                requested_at: Utc::now().timestamp(),
            },
        );

        log::info!("Oracle request #{} submitted: {} @ {}", seq, identifier, timestamp);
        Ok(seq)
    }

    fn get_request(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
    ) -> Result<ResolutionState> {
        let key = Self::key(requester, identifier, timestamp, ancillary_data);
        let request = self.requests.get(&key).ok_or_else(|| {
            ExchangeError::OracleError(format!("unknown oracle request: {}", identifier))
        })?;

        let mut state = request.state;
        // 窗口已过且无争议的提案视为已最终化
        if !state.resolved
            && !state.disputed
            && state.proposed_value.is_some()
            && state.expiration_time <= Utc::now().timestamp()
        {
            state.resolved = true;
            state.resolved_value = state.proposed_value;
        }
        Ok(state)
    }

    fn settle(
        &self,
        requester: &str,
        identifier: &str,
        timestamp: i64,
        ancillary_data: &str,
    ) -> Result<u128> {
        let state = self.get_request(requester, identifier, timestamp, ancillary_data)?;
        if !state.resolved {
            return Err(ExchangeError::OracleError(format!(
                "request not resolved yet: {}",
                identifier
            )));
        }

        let value = state.resolved_value.ok_or_else(|| {
            ExchangeError::InternalError("resolved request missing value".to_string())
        })?;

        // 持久化最终化状态
        let key = Self::key(requester, identifier, timestamp, ancillary_data);
        if let Some(mut request) = self.requests.get_mut(&key) {
            request.state.resolved = true;
            request.state.resolved_value = Some(value);
        }

        Ok(value)
    }
}
