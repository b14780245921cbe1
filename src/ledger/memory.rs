//! 内存抵押账本
//!
//! 参考实现，用于测试与单进程部署。每个 (交易者, 代币) 维护可用/已划拨
//! 两个桶；释放的抵押品记入构造时指定的托管账户，赔付从托管账户转出。

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ledger::CollateralLedger;
use crate::{ExchangeError, Result};

/// 账户余额
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    /// 可用余额
    pub available: u128,

    /// 已划拨（抵押中）
    pub allocated: u128,
}

/// 内存账本
pub struct InMemoryLedger {
    /// 余额映射 ("trader|token" -> Balance)
    balances: DashMap<String, Balance>,

    /// 主抵押代币
    token: String,

    /// 代币精度位数
    decimals: u32,

    /// 市场托管账户（释放的抵押品归入此账户）
    custody_account: String,
}

impl InMemoryLedger {
    pub fn new(token: impl Into<String>, decimals: u32, custody_account: impl Into<String>) -> Self {
        Self {
            balances: DashMap::new(),
            token: token.into(),
            decimals,
            custody_account: custody_account.into(),
        }
    }

    fn key(trader: &str, token: &str) -> String {
        format!("{}|{}", trader, token)
    }

    /// 入金（测试与初始化用）
    pub fn deposit(&self, trader: &str, token: &str, amount: u128) -> Result<()> {
        let mut entry = self.balances.entry(Self::key(trader, token)).or_default();
        entry.available = entry.available.checked_add(amount).ok_or_else(|| {
            ExchangeError::ArithmeticOverflow(format!("deposit overflow for {}", trader))
        })?;
        log::debug!("Deposit: {} {} for {}", amount, token, trader);
        Ok(())
    }

    /// 查询余额
    pub fn balance_of(&self, trader: &str, token: &str) -> Balance {
        self.balances
            .get(&Self::key(trader, token))
            .map(|b| *b.value())
            .unwrap_or_default()
    }

}

impl CollateralLedger for InMemoryLedger {
    fn has_sufficient_balance(&self, trader: &str, token: &str, amount: u128) -> bool {
        self.balance_of(trader, token).available >= amount
    }

    fn allocate_assets(&self, trader: &str, token: &str, amount: u128) -> Result<()> {
        let mut entry = self
            .balances
            .get_mut(&Self::key(trader, token))
            .ok_or_else(|| {
                ExchangeError::LedgerError(format!("unknown account: {} ({})", trader, token))
            })?;

        if entry.available < amount {
            return Err(ExchangeError::InsufficientBalance(format!(
                "{}: available={}, required={}",
                trader, entry.available, amount
            )));
        }

        entry.available -= amount;
        entry.allocated = entry.allocated.checked_add(amount).ok_or_else(|| {
            ExchangeError::ArithmeticOverflow(format!("allocate overflow for {}", trader))
        })?;

        log::debug!("Allocated {} {} from {}", amount, token, trader);
        Ok(())
    }

    fn deallocate_assets(&self, trader: &str, token: &str, amount: u128) -> Result<()> {
        {
            let mut entry = self
                .balances
                .get_mut(&Self::key(trader, token))
                .ok_or_else(|| {
                    ExchangeError::LedgerError(format!("unknown account: {} ({})", trader, token))
                })?;

            if entry.allocated < amount {
                return Err(ExchangeError::LedgerError(format!(
                    "{}: allocated={}, deallocating={}",
                    trader, entry.allocated, amount
                )));
            }

            entry.allocated -= amount;
        } // 先释放条目锁，再写托管账户，避免 DashMap 跨键死锁

        let mut custody = self
            .balances
            .entry(Self::key(&self.custody_account, token))
            .or_default();
        custody.available = custody.available.checked_add(amount).ok_or_else(|| {
            ExchangeError::ArithmeticOverflow("custody balance overflow".to_string())
        })?;

        log::debug!("Deallocated {} {} from {} into custody", amount, token, trader);
        Ok(())
    }

    fn transfer_assets(&self, from: &str, to: &str, token: &str, amount: u128) -> Result<()> {
        if from == to {
            return Ok(());
        }

        {
            let mut src = self
                .balances
                .get_mut(&Self::key(from, token))
                .ok_or_else(|| {
                    ExchangeError::LedgerError(format!("unknown account: {} ({})", from, token))
                })?;

            if src.available < amount {
                return Err(ExchangeError::InsufficientBalance(format!(
                    "{}: available={}, transferring={}",
                    from, src.available, amount
                )));
            }

            src.available -= amount;
        }

        let mut dst = self.balances.entry(Self::key(to, token)).or_default();
        dst.available = dst.available.checked_add(amount).ok_or_else(|| {
            ExchangeError::ArithmeticOverflow(format!("transfer overflow into {}", to))
        })?;

        log::debug!("Transferred {} {} from {} to {}", amount, token, from, to);
        Ok(())
    }

    fn primary_collateral_token(&self) -> (String, u32) {
        (self.token.clone(), self.decimals)
    }

    fn custody_account(&self) -> String {
        self.custody_account.clone()
    }
}
