//! 定点数学模块
//!
//! 市场内部以 18 位定点 u128 记账，抵押账本使用代币原生精度。
//! 所有运算先防护后执行，溢出即中止整个操作。

pub mod payout;
pub mod precision;

pub use payout::{compute_payout, PayoutResult};
pub use precision::{
    checked_add, checked_sub, from_f64, is_tick_aligned, mul_div, to_internal, to_native,
    PRICE_DECIMALS, PRICE_PRECISION,
};
