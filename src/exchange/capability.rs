//! 权限注册表
//!
//! 细粒度角色模型：每个受保护操作检查一个具体角色，而不是单一的
//! 全局管理员。角色由部署引导流程授予，运行期可撤销。

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{ExchangeError, Result};

/// 受保护操作角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// 订单提交/撤销入口
    Router,

    /// 结算发起与批量结算
    SettlementAuthority,

    /// 市场参数管理（限额、暂停、截止时间）
    MarketAdmin,

    /// 通用预言机数据请求方
    OracleRequester,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Router => "router",
            Capability::SettlementAuthority => "settlement_authority",
            Capability::MarketAdmin => "market_admin",
            Capability::OracleRequester => "oracle_requester",
        }
    }
}

/// 权限注册表 (account -> 角色集合)
pub struct CapabilityRegistry {
    grants: DashMap<String, HashSet<Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self { grants: DashMap::new() }
    }

    /// 授予角色
    pub fn grant(&self, account: &str, capability: Capability) {
        self.grants
            .entry(account.to_string())
            .or_default()
            .insert(capability);
        log::info!("Granted {} to {}", capability.as_str(), account);
    }

    /// 撤销角色
    pub fn revoke(&self, account: &str, capability: Capability) {
        if let Some(mut caps) = self.grants.get_mut(account) {
            caps.remove(&capability);
        }
        log::info!("Revoked {} from {}", capability.as_str(), account);
    }

    /// 是否持有角色
    pub fn has(&self, account: &str, capability: Capability) -> bool {
        self.grants
            .get(account)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }

    /// 要求角色，不满足时返回错误
    pub fn require(&self, account: &str, capability: Capability) -> Result<()> {
        if self.has(account, capability) {
            Ok(())
        } else {
            Err(ExchangeError::CapabilityDenied(format!(
                "{} lacks {} capability",
                account,
                capability.as_str()
            )))
        }
    }

    /// 列出账户持有的角色
    pub fn capabilities_of(&self, account: &str) -> Vec<Capability> {
        self.grants
            .get(account)
            .map(|caps| caps.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
