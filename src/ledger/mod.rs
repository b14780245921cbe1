//! 抵押账本边界
//!
//! 账本是外部协作方：持有每个交易者按代币划分的余额，提供余额校验、
//! 划拨、释放与转账。金额一律使用代币原生精度，精度换算由市场引擎负责。
//!
//! 多个独立市场共享同一账本，引擎绝不假设独占：每次划拨/释放都可能被
//! 账本拒绝（余额不足），必须按可失败调用处理。

pub mod memory;

pub use memory::InMemoryLedger;

use crate::Result;

/// 抵押账本接口
///
/// 释放（deallocate）语义：解除仓位上的划拨标记，资金归入市场托管池，
/// 随后的赔付由托管账户向交易者转账 —— 交易者净收款即为赔付额。
/// 托管池需由运营方预注入浮动资金：批次内净盈利的赔付由该池垫付。
#[cfg_attr(test, mockall::automock)]
pub trait CollateralLedger: Send + Sync {
    /// 可用余额是否足够
    fn has_sufficient_balance(&self, trader: &str, token: &str, amount: u128) -> bool;

    /// 划拨抵押品（可用 → 已划拨），余额不足时返回错误
    fn allocate_assets(&self, trader: &str, token: &str, amount: u128) -> Result<()>;

    /// 释放已划拨抵押品，资金转入托管池
    fn deallocate_assets(&self, trader: &str, token: &str, amount: u128) -> Result<()>;

    /// 账户间转账（from 的可用余额 → to 的可用余额）
    fn transfer_assets(&self, from: &str, to: &str, token: &str, amount: u128) -> Result<()>;

    /// 主抵押代币及其精度位数
    fn primary_collateral_token(&self) -> (String, u32);

    /// 市场托管账户ID（释放的抵押品归入该账户，赔付从该账户转出）
    fn custody_account(&self) -> String;
}
