//! `BoundaryState`: the unidirectional lifecycle a single block-plan
//! transition moves through, from acceptance to either a clean take or an
//! absorbing failure. There is no path back to an earlier state and no
//! path out of `FailedTerminal` — once failed, the session's control
//! surface must start a fresh `StartBlockPlanSession`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    /// Plan accepted, segments not yet primed.
    Pending,
    /// `SeamPreparer` is priming the next block's first segment
    /// (prime-first-tick) ahead of the fence.
    Preparing,
    /// Prepared and holding, waiting for the fence tick to arrive. A block
    /// never starts early; it may hold up to `HOLD_MAX_MS` past its fence
    /// if preparation overran.
    ArmedWaitingFence,
    /// The fence tick has been reached and the swap has been committed;
    /// this state is instantaneous and immediately followed by `Taken`.
    Taking,
    /// The block is airing.
    Taken,
    /// Preparation or the swap itself failed. Absorbing: no transition
    /// leaves this state.
    FailedTerminal,
}

impl BoundaryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FailedTerminal)
    }

    /// Validates a proposed transition against the unidirectional lifecycle.
    /// Returns `false` for any attempted transition out of
    /// `FailedTerminal`, any transition to an earlier state, or any
    /// self-loop other than holding in `ArmedWaitingFence`.
    pub fn can_transition_to(&self, next: BoundaryState) -> bool {
        use BoundaryState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (*self, next),
            (Pending, Preparing)
                | (Pending, FailedTerminal)
                | (Preparing, ArmedWaitingFence)
                | (Preparing, FailedTerminal)
                | (ArmedWaitingFence, ArmedWaitingFence)
                | (ArmedWaitingFence, Taking)
                | (ArmedWaitingFence, FailedTerminal)
                | (Taking, Taken)
                | (Taking, FailedTerminal)
                // `Taken` is an airing block's resting state, not a dead
                // end: a 24/7 session walks this lifecycle once per
                // block/segment transition, so the next transition's walk
                // starts fresh from here.
                | (Taken, Preparing)
                | (Taken, FailedTerminal)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BoundaryState::*;

    #[test]
    fn terminal_is_absorbing() {
        assert!(!FailedTerminal.can_transition_to(Pending));
        assert!(!FailedTerminal.can_transition_to(Preparing));
        assert!(!FailedTerminal.can_transition_to(Taken));
    }

    #[test]
    fn happy_path_is_linear() {
        let mut state = Pending;
        for next in [Preparing, ArmedWaitingFence, Taking, Taken] {
            assert!(state.can_transition_to(next), "{state:?} -> {next:?}");
            state = next;
        }
    }

    #[test]
    fn cannot_skip_or_go_backward() {
        assert!(!Pending.can_transition_to(Taken));
        assert!(!Taken.can_transition_to(Pending));
        assert!(!ArmedWaitingFence.can_transition_to(Preparing));
    }

    #[test]
    fn armed_waiting_fence_can_hold() {
        assert!(ArmedWaitingFence.can_transition_to(ArmedWaitingFence));
    }

    #[test]
    fn any_non_terminal_state_can_fail() {
        for s in [Pending, Preparing, ArmedWaitingFence, Taking, Taken] {
            assert!(s.can_transition_to(FailedTerminal));
        }
    }

    #[test]
    fn taken_restarts_the_walk_for_the_next_transition() {
        assert!(Taken.can_transition_to(Preparing));
        assert!(!Taken.can_transition_to(ArmedWaitingFence));
        assert!(!Taken.can_transition_to(Taking));
    }
}
