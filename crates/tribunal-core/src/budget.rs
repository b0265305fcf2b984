//! Token budget ledger
//!
//! Every run gets a fixed 80,000-token budget split 35k / 35k / 10k across
//! skeptic, validator and synthesis. A stage must reserve before calling the
//! model and commit the actual usage afterwards; a reservation that is never
//! committed is released.
//!
//! The ledger is the only place budget arithmetic happens. At every point:
//!
//! ```text
//! consumed_total + outstanding reservations <= TOTAL_BUDGET
//! consumed(stage) + reserved(stage)         <= allocation(stage)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::domain::error::{BudgetError, BudgetLimit};
use crate::domain::run::StageKind;

/// Total tokens available to one run.
pub const TOTAL_BUDGET: u64 = 80_000;
pub const SKEPTIC_ALLOCATION: u64 = 35_000;
pub const VALIDATOR_ALLOCATION: u64 = 35_000;
pub const SYNTHESIS_ALLOCATION: u64 = 10_000;

/// Slack added on top of the prompt estimate, as a fraction.
pub const ESTIMATE_SLACK: f64 = 0.10;

/// Upper-bound token count for `text`.
///
/// ASCII runs cost one token per four characters, rounded up. Every
/// non-ASCII character costs a full token, since CJK and similar scripts
/// tokenize at roughly one token per character or worse.
pub fn estimate_tokens(text: &str) -> u64 {
    let (ascii, wide) = text.chars().fold((0u64, 0u64), |(ascii, wide), c| {
        if c.is_ascii() {
            (ascii + 1, wide)
        } else {
            (ascii, wide + 1)
        }
    });
    ascii.div_ceil(4) + wide
}

/// Tokens to reserve for a call: prompt estimate plus slack plus the output cap.
pub fn reservation_size(prompt_tokens: u64, max_output_tokens: u32) -> u64 {
    let slack = (prompt_tokens as f64 * ESTIMATE_SLACK).ceil() as u64;
    prompt_tokens + slack + u64::from(max_output_tokens)
}

#[derive(Debug, Clone, Copy)]
struct StageAccount {
    allocation: u64,
    reserved: Option<u64>,
    consumed: u64,
}

impl StageAccount {
    fn remaining(&self) -> u64 {
        self.allocation
            .saturating_sub(self.consumed)
            .saturating_sub(self.reserved.unwrap_or(0))
    }
}

#[derive(Debug)]
struct LedgerState {
    total: u64,
    stages: [StageAccount; 3],
}

impl LedgerState {
    fn consumed(&self) -> u64 {
        self.stages.iter().map(|s| s.consumed).sum()
    }

    fn reserved(&self) -> u64 {
        self.stages.iter().filter_map(|s| s.reserved).sum()
    }

    fn remaining(&self) -> u64 {
        self.total
            .saturating_sub(self.consumed())
            .saturating_sub(self.reserved())
    }
}

/// Per-stage line of a [`BudgetSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageBudget {
    pub stage: StageKind,
    pub allocation: u64,
    pub reserved: u64,
    pub consumed: u64,
    pub remaining: u64,
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub total: u64,
    pub consumed: u64,
    pub reserved: u64,
    pub remaining: u64,
    pub stages: Vec<StageBudget>,
}

/// Tracks allocation, reservation and consumption for one run.
#[derive(Debug)]
pub struct BudgetLedger {
    state: Mutex<LedgerState>,
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetLedger {
    pub fn new() -> Self {
        let account = |stage: StageKind| StageAccount {
            allocation: stage.allocation(),
            reserved: None,
            consumed: 0,
        };
        Self {
            state: Mutex::new(LedgerState {
                total: TOTAL_BUDGET,
                stages: StageKind::ALL.map(account),
            }),
        }
    }

    // Ledger updates are single assignments, so state behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold `requested` tokens for `stage`.
    ///
    /// Fails with `BudgetExceeded` when the request exceeds the stage's
    /// remaining allocation or the run's remaining total. A stage may hold at
    /// most one reservation at a time.
    pub fn reserve(&self, stage: StageKind, requested: u64) -> Result<Reservation<'_>, BudgetError> {
        let mut state = self.lock();
        let available_total = state.remaining();
        let account = &mut state.stages[stage.index()];

        if let Some(reserved) = account.reserved {
            return Err(BudgetError::AlreadyReserved { stage, reserved });
        }
        let available_stage = account.remaining();
        if requested > available_stage {
            return Err(BudgetError::BudgetExceeded {
                stage,
                requested,
                available: available_stage,
                limit: BudgetLimit::Stage,
            });
        }
        if requested > available_total {
            return Err(BudgetError::BudgetExceeded {
                stage,
                requested,
                available: available_total,
                limit: BudgetLimit::Run,
            });
        }

        account.reserved = Some(requested);
        Ok(Reservation {
            ledger: self,
            stage,
            tokens: requested,
            settled: false,
        })
    }

    /// Charge `actual` tokens against the stage's outstanding reservation.
    ///
    /// If `actual` exceeds the reservation the whole reservation is charged
    /// and `CommitExceedsReservation` is returned; the overrun is never
    /// charged past the reservation.
    pub fn commit(&self, stage: StageKind, actual: u64) -> Result<(), BudgetError> {
        let mut state = self.lock();
        let account = &mut state.stages[stage.index()];
        let reserved = account
            .reserved
            .take()
            .ok_or(BudgetError::NoReservation { stage })?;
        if actual > reserved {
            account.consumed += reserved;
            return Err(BudgetError::CommitExceedsReservation {
                stage,
                reserved,
                actual,
            });
        }
        account.consumed += actual;
        Ok(())
    }

    /// Drop the stage's outstanding reservation, if any. Returns the freed amount.
    pub fn release(&self, stage: StageKind) -> Option<u64> {
        self.lock().stages[stage.index()].reserved.take()
    }

    /// Tokens `stage` may still reserve.
    pub fn remaining(&self, stage: StageKind) -> u64 {
        let state = self.lock();
        state.stages[stage.index()].remaining().min(state.remaining())
    }

    /// Tokens left in the run, excluding outstanding reservations.
    pub fn remaining_total(&self) -> u64 {
        self.lock().remaining()
    }

    pub fn consumed(&self, stage: StageKind) -> u64 {
        self.lock().stages[stage.index()].consumed
    }

    pub fn consumed_total(&self) -> u64 {
        self.lock().consumed()
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.lock();
        let stages = StageKind::ALL
            .iter()
            .map(|stage| {
                let account = &state.stages[stage.index()];
                StageBudget {
                    stage: *stage,
                    allocation: account.allocation,
                    reserved: account.reserved.unwrap_or(0),
                    consumed: account.consumed,
                    remaining: account.remaining(),
                }
            })
            .collect();
        BudgetSnapshot {
            total: state.total,
            consumed: state.consumed(),
            reserved: state.reserved(),
            remaining: state.remaining(),
            stages,
        }
    }
}

/// An outstanding reservation. Dropping it without committing releases it.
#[derive(Debug)]
#[must_use = "an unused reservation is released immediately"]
pub struct Reservation<'a> {
    ledger: &'a BudgetLedger,
    stage: StageKind,
    tokens: u64,
    settled: bool,
}

impl Reservation<'_> {
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Commit the actual usage; see [`BudgetLedger::commit`].
    pub fn commit(mut self, actual: u64) -> Result<(), BudgetError> {
        self.settled = true;
        self.ledger.commit(self.stage, actual)
    }

    /// Release explicitly.
    pub fn release(mut self) {
        self.settled = true;
        self.ledger.release(self.stage);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.release(self.stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(reservation_size(1000, 8000), 9100);
    }

    #[test]
    fn estimate_charges_non_ascii_per_character() {
        let cjk = "収益の集中度".repeat(500);
        assert_eq!(cjk.chars().count(), 3_000);
        assert_eq!(estimate_tokens(&cjk), 3_000);
        assert_eq!(estimate_tokens("abcd収益"), 3);
        assert!(reservation_size(estimate_tokens(&cjk), 8_000) >= 3_300 + 6_000);
    }

    #[test]
    fn reserve_within_allocation() {
        let ledger = BudgetLedger::new();
        let r = ledger.reserve(StageKind::Skeptic, 20_000).unwrap();
        assert_eq!(r.tokens(), 20_000);
        assert_eq!(ledger.remaining(StageKind::Skeptic), 15_000);
        assert_eq!(ledger.remaining_total(), 60_000);
        r.commit(18_000).unwrap();
        assert_eq!(ledger.consumed(StageKind::Skeptic), 18_000);
        assert_eq!(ledger.remaining(StageKind::Skeptic), 17_000);
        assert_eq!(ledger.remaining_total(), 62_000);
    }

    #[test]
    fn reserve_over_stage_allocation_is_denied() {
        let ledger = BudgetLedger::new();
        let err = ledger.reserve(StageKind::Skeptic, 40_000).unwrap_err();
        assert_eq!(
            err,
            BudgetError::BudgetExceeded {
                stage: StageKind::Skeptic,
                requested: 40_000,
                available: 35_000,
                limit: BudgetLimit::Stage,
            }
        );
        assert_eq!(ledger.remaining_total(), TOTAL_BUDGET);
    }

    #[test]
    fn second_reservation_is_a_contract_violation() {
        let ledger = BudgetLedger::new();
        let _held = ledger.reserve(StageKind::Validator, 1_000).unwrap();
        assert_eq!(
            ledger.reserve(StageKind::Validator, 1_000).unwrap_err(),
            BudgetError::AlreadyReserved {
                stage: StageKind::Validator,
                reserved: 1_000
            }
        );
    }

    #[test]
    fn commit_without_reservation_fails() {
        let ledger = BudgetLedger::new();
        assert_eq!(
            ledger.commit(StageKind::Synthesis, 10).unwrap_err(),
            BudgetError::NoReservation {
                stage: StageKind::Synthesis
            }
        );
    }

    #[test]
    fn overrun_charges_the_reservation_only() {
        let ledger = BudgetLedger::new();
        let r = ledger.reserve(StageKind::Synthesis, 5_000).unwrap();
        let err = r.commit(6_500).unwrap_err();
        assert!(matches!(err, BudgetError::CommitExceedsReservation { .. }));
        assert_eq!(ledger.consumed(StageKind::Synthesis), 5_000);
        assert_eq!(ledger.snapshot().reserved, 0);
    }

    #[test]
    fn dropped_reservation_is_released() {
        let ledger = BudgetLedger::new();
        {
            let _r = ledger.reserve(StageKind::Skeptic, 30_000).unwrap();
            assert_eq!(ledger.remaining_total(), 50_000);
        }
        assert_eq!(ledger.remaining_total(), TOTAL_BUDGET);
        assert_eq!(ledger.consumed_total(), 0);
    }

    #[test]
    fn snapshot_reports_each_stage() {
        let ledger = BudgetLedger::new();
        ledger.reserve(StageKind::Skeptic, 30_000).unwrap().commit(30_000).unwrap();
        let held = ledger.reserve(StageKind::Validator, 10_000).unwrap();
        let snap = ledger.snapshot();
        assert_eq!(snap.consumed, 30_000);
        assert_eq!(snap.reserved, 10_000);
        assert_eq!(snap.remaining, 40_000);
        assert_eq!(snap.stages[0].remaining, 5_000);
        assert_eq!(snap.stages[1].reserved, 10_000);
        held.release();
        assert_eq!(ledger.snapshot().reserved, 0);
    }
}
