//! 结算赔付计算
//!
//! (持仓, 结算值) 的纯函数。多头在结算值高于开仓价时盈利，空头镜像；
//! 亏损以抵押品为上限，赔付不为负 —— 亏损超出抵押品的部分不予追偿。
//! 入参均为 18 位定点内部精度。

use serde::{Deserialize, Serialize};

use crate::core::position::PositionDirection;
use crate::math::precision::{checked_add, checked_sub, mul_div, PRICE_PRECISION};
use crate::{ExchangeError, Result};

/// 单仓位赔付结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutResult {
    /// 应付金额（18位定点，>= 0）
    pub payout: u128,

    /// 带符号盈亏（盈利为正，亏损为负且不低于 -collateral）
    pub pnl: i128,
}

/// 计算仓位赔付
///
/// - 多头: 结算值 > 开仓价 → payout = collateral + (S-E)*Q/PRECISION
/// - 空头: 结算值 < 开仓价时盈利，镜像对称
/// - 亏损 >= collateral 时 payout = 0, pnl = -collateral
pub fn compute_payout(
    direction: PositionDirection,
    entry_price: u128,
    quantity: u128,
    collateral: u128,
    settlement_value: u128,
) -> Result<PayoutResult> {
    let profitable = match direction {
        PositionDirection::Long => settlement_value > entry_price,
        PositionDirection::Short => settlement_value < entry_price,
    };

    let price_delta = if settlement_value > entry_price {
        settlement_value - entry_price
    } else {
        entry_price - settlement_value
    };

    let delta_value = mul_div(price_delta, quantity, PRICE_PRECISION)?;

    if profitable {
        let profit_i = i128::try_from(delta_value).map_err(|_| {
            ExchangeError::ArithmeticOverflow(format!("profit exceeds i128: {}", delta_value))
        })?;
        Ok(PayoutResult {
            payout: checked_add(collateral, delta_value)?,
            pnl: profit_i,
        })
    } else if delta_value >= collateral {
        // 亏损触及抵押品上限
        let capped = i128::try_from(collateral).map_err(|_| {
            ExchangeError::ArithmeticOverflow(format!("collateral exceeds i128: {}", collateral))
        })?;
        Ok(PayoutResult { payout: 0, pnl: -capped })
    } else {
        let loss_i = i128::try_from(delta_value).map_err(|_| {
            ExchangeError::ArithmeticOverflow(format!("loss exceeds i128: {}", delta_value))
        })?;
        Ok(PayoutResult {
            payout: checked_sub(collateral, delta_value)?,
            pnl: -loss_i,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u128 = PRICE_PRECISION;

    #[test]
    fn test_long_profit() {
        // entry 100, settle 110, qty 10, collateral 50 → profit 100
        let r = compute_payout(PositionDirection::Long, 100 * P, 10 * P, 50 * P, 110 * P).unwrap();
        assert_eq!(r.payout, 150 * P);
        assert_eq!(r.pnl, (100 * P) as i128);
    }

    #[test]
    fn test_long_partial_loss() {
        // entry 100, settle 95, qty 10, collateral 50 → loss 50... 刚好触顶
        // 用 qty 8 使 loss = 40 < 50
        let r = compute_payout(PositionDirection::Long, 100 * P, 8 * P, 50 * P, 95 * P).unwrap();
        assert_eq!(r.payout, 10 * P);
        assert_eq!(r.pnl, -((40 * P) as i128));
    }

    #[test]
    fn test_long_loss_capped_at_collateral() {
        // entry 100, settle 95, qty 10 → loss 50 >= collateral 50
        let r = compute_payout(PositionDirection::Long, 100 * P, 10 * P, 50 * P, 95 * P).unwrap();
        assert_eq!(r.payout, 0);
        assert_eq!(r.pnl, -((50 * P) as i128));

        // 更深的亏损同样封顶
        let r = compute_payout(PositionDirection::Long, 100 * P, 10 * P, 50 * P, 10 * P).unwrap();
        assert_eq!(r.payout, 0);
        assert_eq!(r.pnl, -((50 * P) as i128));
    }

    #[test]
    fn test_short_profit_when_value_falls() {
        let r = compute_payout(PositionDirection::Short, 100 * P, 10 * P, 50 * P, 95 * P).unwrap();
        assert_eq!(r.payout, 100 * P);
        assert_eq!(r.pnl, (50 * P) as i128);
    }

    #[test]
    fn test_short_loss_when_value_rises() {
        let r = compute_payout(PositionDirection::Short, 100 * P, 2 * P, 50 * P, 110 * P).unwrap();
        assert_eq!(r.payout, 30 * P);
        assert_eq!(r.pnl, -((20 * P) as i128));
    }

    #[test]
    fn test_settle_at_entry_is_flat() {
        for dir in [PositionDirection::Long, PositionDirection::Short] {
            let r = compute_payout(dir, 100 * P, 10 * P, 50 * P, 100 * P).unwrap();
            assert_eq!(r.payout, 50 * P);
            assert_eq!(r.pnl, 0);
        }
    }

    #[test]
    fn test_long_short_symmetry() {
        // payout(long, E, S) == payout(short, S, E)
        let cases = [(100u128, 95u128), (100, 110), (50, 50), (1, 1000)];
        for (e, s) in cases {
            let long =
                compute_payout(PositionDirection::Long, e * P, 10 * P, 50 * P, s * P).unwrap();
            let short =
                compute_payout(PositionDirection::Short, s * P, 10 * P, 50 * P, e * P).unwrap();
            assert_eq!(long, short, "asymmetric for entry={} settle={}", e, s);
        }
    }

    #[test]
    fn test_payout_never_negative() {
        // 极端亏损下 payout 恒为 0
        let r = compute_payout(PositionDirection::Long, 1_000_000 * P, 100 * P, P, 0).unwrap();
        assert_eq!(r.payout, 0);
        assert_eq!(r.pnl, -(P as i128));
    }

    #[test]
    fn test_profit_overflow_rejected() {
        let r = compute_payout(PositionDirection::Long, 0, u128::MAX / 2, 0, u128::MAX / 2);
        assert!(r.is_err());
    }
}
