//! 精度转换与溢出防护
//!
//! 乘除通过 U256 中间值执行，商超出 u128 视为溢出并返回错误；
//! 18 位 → 原生精度的降精度转换向下取整（抵押划拨取保守值）。

use primitive_types::U256;

use crate::{ExchangeError, Result};

/// 内部记账精度位数
pub const PRICE_DECIMALS: u32 = 18;

/// 内部记账精度基数 (1e18)
pub const PRICE_PRECISION: u128 = 1_000_000_000_000_000_000;

/// 防溢出加法
pub fn checked_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or_else(|| {
        ExchangeError::ArithmeticOverflow(format!("add overflow: {} + {}", a, b))
    })
}

/// 防下溢减法
pub fn checked_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or_else(|| {
        ExchangeError::ArithmeticOverflow(format!("sub underflow: {} - {}", a, b))
    })
}

/// 定点乘除: a * b / denom
///
/// 中间值提升到 U256，乘法不会溢出；商超出 u128 范围返回错误。
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(ExchangeError::InvalidParameter("mul_div: denom is zero".to_string()));
    }

    let quotient = U256::from(a) * U256::from(b) / U256::from(denom);
    if quotient > U256::from(u128::MAX) {
        return Err(ExchangeError::ArithmeticOverflow(format!(
            "mul_div overflow: {} * {} / {}",
            a, b, denom
        )));
    }

    Ok(quotient.as_u128())
}

/// 18 位内部金额 → 代币原生精度
///
/// 原生精度低于 18 位时向下取整。
pub fn to_native(amount: u128, native_decimals: u32) -> Result<u128> {
    if native_decimals > 38 {
        return Err(ExchangeError::InvalidParameter(format!(
            "unsupported token decimals: {}",
            native_decimals
        )));
    }

    if native_decimals == PRICE_DECIMALS {
        return Ok(amount);
    }

    if native_decimals < PRICE_DECIMALS {
        let factor = 10u128.pow(PRICE_DECIMALS - native_decimals);
        Ok(amount / factor)
    } else {
        let factor = 10u128.pow(native_decimals - PRICE_DECIMALS);
        mul_div(amount, factor, 1)
    }
}

/// 代币原生精度 → 18 位内部金额（精确转换，溢出报错）
pub fn to_internal(amount: u128, native_decimals: u32) -> Result<u128> {
    if native_decimals > 38 {
        return Err(ExchangeError::InvalidParameter(format!(
            "unsupported token decimals: {}",
            native_decimals
        )));
    }

    if native_decimals == PRICE_DECIMALS {
        return Ok(amount);
    }

    if native_decimals < PRICE_DECIMALS {
        let factor = 10u128.pow(PRICE_DECIMALS - native_decimals);
        mul_div(amount, factor, 1)
    } else {
        let factor = 10u128.pow(native_decimals - PRICE_DECIMALS);
        Ok(amount / factor)
    }
}

/// 价格是否为 tick 的正整数倍
pub fn is_tick_aligned(price: u128, tick_size: u128) -> bool {
    tick_size > 0 && price > 0 && price % tick_size == 0
}

/// 人类可读数值 → 18 位定点（仅用于配置加载/测试构造）
pub fn from_f64(value: f64) -> Result<u128> {
    if !value.is_finite() || value < 0.0 {
        return Err(ExchangeError::InvalidParameter(format!(
            "cannot convert {} to fixed point",
            value
        )));
    }
    let scaled = value * PRICE_PRECISION as f64;
    if scaled > u128::MAX as f64 {
        return Err(ExchangeError::ArithmeticOverflow(format!(
            "from_f64 overflow: {}",
            value
        )));
    }
    Ok(scaled.round() as u128)
}
