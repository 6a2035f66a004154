//! Cost accounting for one execution

use std::sync::atomic::{AtomicU64, Ordering};

use crate::orchestration::error::EngineError;

/// Monotonic cost accumulator with an optional ceiling.
///
/// Costs are stored as `f64` bits so concurrent branches can charge without
/// a lock. A charge that crosses the limit is still recorded: the total
/// always reflects what was actually spent.
#[derive(Debug)]
pub struct CostLedger {
    limit: Option<f64>,
    spent_bits: AtomicU64,
}

impl CostLedger {
    pub fn new(limit: Option<f64>) -> Self {
        Self {
            limit,
            spent_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Add `cost` and fail when the running total exceeds the limit
    pub fn charge(&self, cost: f64) -> Result<f64, EngineError> {
        // Negative or NaN costs would break monotonicity
        let cost = if cost.is_finite() && cost > 0.0 { cost } else { 0.0 };

        let total = loop {
            let current_bits = self.spent_bits.load(Ordering::Relaxed);
            let next = f64::from_bits(current_bits) + cost;

            if self
                .spent_bits
                .compare_exchange(
                    current_bits,
                    next.to_bits(),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break next;
            }
        };

        match self.limit {
            Some(limit) if total > limit => Err(EngineError::BudgetExceeded {
                spent: total,
                limit,
            }),
            _ => Ok(total),
        }
    }

    pub fn spent(&self) -> f64 {
        f64::from_bits(self.spent_bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_charge_within_limit() {
        let ledger = CostLedger::new(Some(1.0));
        assert_eq!(ledger.charge(0.25).unwrap(), 0.25);
        assert_eq!(ledger.charge(0.25).unwrap(), 0.5);
        assert_eq!(ledger.spent(), 0.5);
    }

    #[test]
    fn test_overrun_is_recorded_and_rejected() {
        let ledger = CostLedger::new(Some(1.0));
        ledger.charge(0.75).unwrap();

        match ledger.charge(0.75) {
            Err(EngineError::BudgetExceeded { spent, limit }) => {
                assert_eq!(spent, 1.5);
                assert_eq!(limit, 1.0);
            }
            other => panic!("expected budget error, got {:?}", other),
        }
        assert_eq!(ledger.spent(), 1.5);
        assert!(ledger.charge(0.0).is_err());
    }

    #[test]
    fn test_total_never_decreases() {
        let ledger = CostLedger::unlimited();
        ledger.charge(0.5).unwrap();
        ledger.charge(-3.0).unwrap();
        ledger.charge(f64::NAN).unwrap();
        assert_eq!(ledger.spent(), 0.5);
    }

    #[test]
    fn test_concurrent_charges_sum_exactly() {
        let ledger = Arc::new(CostLedger::unlimited());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.charge(0.5).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.spent(), 4000.0);
    }
}
