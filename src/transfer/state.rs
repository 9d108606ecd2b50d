//! Per-invocation Transfer Phases
//!
//! A transfer never persists its phase; the phase only drives logging and
//! guards the step order inside one transaction.
//!
//! ```text
//! STARTED → LOCKED_LOWER → LOCKED_HIGHER → ENTRIES_WRITTEN → BALANCES_ADJUSTED → COMMITTED
//!    ↓            ↓              ↓                ↓                  ↓
//!    └────────────┴──────────────┴────────────────┴──────────────────┴──→ ROLLED_BACK
//! ```

use std::fmt;

use super::error::LedgerError;

/// Transfer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    Started,
    LockedLowerAccount,
    LockedHigherAccount,
    EntriesWritten,
    BalancesAdjusted,
    /// Terminal: all writes visible
    Committed,
    /// Terminal: no writes visible
    RolledBack,
}

impl TransferPhase {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Committed | TransferPhase::RolledBack)
    }

    /// The single forward successor, if any
    pub fn next(&self) -> Option<TransferPhase> {
        match self {
            TransferPhase::Started => Some(TransferPhase::LockedLowerAccount),
            TransferPhase::LockedLowerAccount => Some(TransferPhase::LockedHigherAccount),
            TransferPhase::LockedHigherAccount => Some(TransferPhase::EntriesWritten),
            TransferPhase::EntriesWritten => Some(TransferPhase::BalancesAdjusted),
            TransferPhase::BalancesAdjusted => Some(TransferPhase::Committed),
            TransferPhase::Committed | TransferPhase::RolledBack => None,
        }
    }

    pub fn can_transition_to(&self, to: TransferPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TransferPhase::RolledBack || self.next() == Some(to)
    }

    /// Move to `to`, refusing any skipped or backward step.
    pub fn advance(&mut self, to: TransferPhase) -> Result<(), LedgerError> {
        if !self.can_transition_to(to) {
            return Err(LedgerError::FatalStorage(format!(
                "invalid transfer phase transition {} -> {}",
                self, to
            )));
        }
        *self = to;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Started => "STARTED",
            TransferPhase::LockedLowerAccount => "LOCKED_LOWER",
            TransferPhase::LockedHigherAccount => "LOCKED_HIGHER",
            TransferPhase::EntriesWritten => "ENTRIES_WRITTEN",
            TransferPhase::BalancesAdjusted => "BALANCES_ADJUSTED",
            TransferPhase::Committed => "COMMITTED",
            TransferPhase::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(TransferPhase::Committed.is_terminal());
        assert!(TransferPhase::RolledBack.is_terminal());
        assert!(!TransferPhase::Started.is_terminal());
        assert!(!TransferPhase::BalancesAdjusted.is_terminal());
    }

    #[test]
    fn test_happy_path_walk() {
        let mut phase = TransferPhase::Started;
        while let Some(next) = phase.next() {
            phase.advance(next).unwrap();
        }
        assert_eq!(phase, TransferPhase::Committed);
    }

    #[test]
    fn test_rollback_reachable_from_every_non_terminal() {
        for phase in [
            TransferPhase::Started,
            TransferPhase::LockedLowerAccount,
            TransferPhase::LockedHigherAccount,
            TransferPhase::EntriesWritten,
            TransferPhase::BalancesAdjusted,
        ] {
            assert!(phase.can_transition_to(TransferPhase::RolledBack));
        }
        assert!(!TransferPhase::Committed.can_transition_to(TransferPhase::RolledBack));
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut phase = TransferPhase::Started;
        let err = phase.advance(TransferPhase::EntriesWritten).unwrap_err();
        assert!(err.to_string().contains("STARTED -> ENTRIES_WRITTEN"));
        assert_eq!(phase, TransferPhase::Started);
    }
}
