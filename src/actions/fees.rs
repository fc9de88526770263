//! Fee estimation (`spec.md` §9): `maxFeePerGas = baseFee × multiplier +
//! maxPriorityFeePerGas`, computed with exact integer arithmetic — the
//! multiplier is accepted as a `numerator/denominator` pair rather than a
//! float, so a value like `1.2` never touches floating point on its way to
//! a wei amount.

use std::sync::Arc;

use ethers_core::types::U256;
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};

/// A fee multiplier expressed as an exact fraction, e.g. `1.2` is
/// `{ numerator: 12, denominator: 10 }`.
#[derive(Debug, Clone, Copy)]
pub struct FeeMultiplier {
    pub numerator: u64,
    pub denominator: u64,
}

impl FeeMultiplier {
    pub const ONE: FeeMultiplier = FeeMultiplier {
        numerator: 1,
        denominator: 1,
    };

    /// Build a multiplier from a decimal string like `"1.2"` without ever
    /// parsing it as a float.
    pub fn from_decimal_str(s: &str) -> ActionResult<Self> {
        match s.split_once('.') {
            None => {
                let n: u64 = s
                    .parse()
                    .map_err(|_| ActionError::invalid(format!("invalid multiplier: {s}")))?;
                Ok(Self {
                    numerator: n,
                    denominator: 1,
                })
            }
            Some((whole, frac)) => {
                let denominator = 10u64
                    .checked_pow(frac.len() as u32)
                    .ok_or_else(|| ActionError::invalid("multiplier has too many decimal places"))?;
                let whole: u64 = whole
                    .parse()
                    .map_err(|_| ActionError::invalid(format!("invalid multiplier: {s}")))?;
                let frac_val: u64 = frac
                    .parse()
                    .map_err(|_| ActionError::invalid(format!("invalid multiplier: {s}")))?;
                let numerator = whole
                    .checked_mul(denominator)
                    .and_then(|w| w.checked_add(frac_val))
                    .ok_or_else(|| ActionError::invalid("multiplier overflow"))?;
                Ok(Self {
                    numerator,
                    denominator,
                })
            }
        }
    }

    fn validate(self) -> ActionResult<()> {
        if self.numerator < self.denominator {
            return Err(ActionError::BaseFeeScalar {
                multiplier: format!("{}/{}", self.numerator, self.denominator),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeesPerGas {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// `eth_feeHistory`-based EIP-1559 fee suggestion (`spec.md` §4.6 action
/// shims, §9 design note).
#[instrument(skip(provider), err)]
pub async fn estimate_fees_per_gas<M>(
    provider: Arc<M>,
    multiplier: FeeMultiplier,
) -> ActionResult<FeesPerGas>
where
    M: Middleware + 'static,
{
    multiplier.validate()?;

    let base_fee = provider
        .get_block(ethers_core::types::BlockNumber::Latest)
        .await
        .map_err(ActionError::Provider)?
        .and_then(|b| b.base_fee_per_gas)
        .unwrap_or_default();

    let max_priority_fee_per_gas: U256 = provider
        .provider()
        .request("eth_maxPriorityFeePerGas", ())
        .await
        .map_err(ActionError::Provider)?;

    let max_fee_per_gas = base_fee
        .checked_mul(U256::from(multiplier.numerator))
        .ok_or_else(|| ActionError::invalid("fee multiplier overflow"))?
        / U256::from(multiplier.denominator)
        + max_priority_fee_per_gas;

    Ok(FeesPerGas {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_multiplier_exactly() {
        let m = FeeMultiplier::from_decimal_str("1.2").unwrap();
        assert_eq!(m.numerator, 12);
        assert_eq!(m.denominator, 10);
    }

    #[test]
    fn parses_whole_multiplier() {
        let m = FeeMultiplier::from_decimal_str("2").unwrap();
        assert_eq!(m.numerator, 2);
        assert_eq!(m.denominator, 1);
    }

    #[test]
    fn sub_one_multiplier_fails_validation() {
        let m = FeeMultiplier::from_decimal_str("0.5").unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn exact_arithmetic_matches_hand_computed_value() {
        // base_fee=100, multiplier=1.2, priority=3 -> 100*12/10 + 3 = 123
        let base_fee = U256::from(100u64);
        let numerator = U256::from(12u64);
        let denominator = U256::from(10u64);
        let priority = U256::from(3u64);
        let max_fee = base_fee * numerator / denominator + priority;
        assert_eq!(max_fee, U256::from(123u64));
    }
}
