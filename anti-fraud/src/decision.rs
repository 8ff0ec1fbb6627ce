//! Fraud decision rules
//!
//! A rule maps a transaction snapshot to a verdict. Rules are pure: no I/O,
//! no clock, no shared state, so the same snapshot always gets the same verdict.

use crate::{Error, Result};
use message_bus::{TransactionCreated, Verdict};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fraud decision rule
pub trait FraudRule: Send + Sync {
    /// Decide the verdict for a transaction snapshot
    fn decide(&self, snapshot: &TransactionCreated) -> Verdict;
}

/// Approves transfers up to a fixed amount, rejects anything above
///
/// Comparison is exact decimal: with the default limit, `1000.00` is approved
/// and `1000.01` is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    max_allowed: Decimal,
}

impl ThresholdRule {
    /// Default maximum approved value
    pub const DEFAULT_MAX_ALLOWED: Decimal = Decimal::ONE_THOUSAND;

    /// Create rule with a custom limit
    pub fn new(max_allowed: Decimal) -> Result<Self> {
        if max_allowed.is_sign_negative() {
            return Err(Error::InvalidConfig(format!(
                "max_allowed must be non-negative, got {}",
                max_allowed
            )));
        }
        Ok(Self { max_allowed })
    }

    /// Configured limit
    pub fn max_allowed(&self) -> Decimal {
        self.max_allowed
    }

    /// Verdict for a bare amount
    pub fn decide_value(&self, value: Decimal) -> Verdict {
        if value <= self.max_allowed {
            Verdict::Approved
        } else {
            Verdict::Rejected
        }
    }
}

impl Default for ThresholdRule {
    fn default() -> Self {
        Self {
            max_allowed: Self::DEFAULT_MAX_ALLOWED,
        }
    }
}

impl FraudRule for ThresholdRule {
    fn decide(&self, snapshot: &TransactionCreated) -> Verdict {
        self.decide_value(snapshot.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_boundary_values() {
        let rule = ThresholdRule::default();

        assert_eq!(rule.decide_value(dec!(0)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(500)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(999.99)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(1000)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(1000.00)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(1000.000001)), Verdict::Rejected);
        assert_eq!(rule.decide_value(dec!(1000.01)), Verdict::Rejected);
        assert_eq!(rule.decide_value(dec!(1500)), Verdict::Rejected);
    }

    #[test]
    fn test_huge_values_do_not_overflow() {
        let rule = ThresholdRule::default();
        assert_eq!(rule.decide_value(Decimal::MAX), Verdict::Rejected);
    }

    #[test]
    fn test_custom_limit() {
        let rule = ThresholdRule::new(dec!(50)).unwrap();
        assert_eq!(rule.max_allowed(), dec!(50));
        assert_eq!(rule.decide_value(dec!(50)), Verdict::Approved);
        assert_eq!(rule.decide_value(dec!(50.0001)), Verdict::Rejected);
    }

    #[test]
    fn test_negative_limit_rejected() {
        assert!(matches!(
            ThresholdRule::new(dec!(-1)),
            Err(Error::InvalidConfig(_))
        ));
    }
}
