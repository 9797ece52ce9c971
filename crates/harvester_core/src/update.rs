use crate::{Effect, RunEvent, RunState};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Classification decided; no cache touched yet.
    Resolved,
    /// Caches are being rewritten.
    Mutating,
    /// The ledger outcome has been decided.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    state: RunState,
    phase: RunPhase,
}

impl Run {
    pub fn new(state: RunState) -> Self {
        Self {
            state,
            phase: RunPhase::Resolved,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }
}

/// Pure update function: applies a lifecycle event and returns the ledger effects.
pub fn update(mut run: Run, event: RunEvent) -> (Run, Vec<Effect>) {
    let effects = match (run.phase, event) {
        (RunPhase::Finished, _) => Vec::new(),
        (RunPhase::Resolved, RunEvent::CacheMutationStarted) => {
            run.phase = RunPhase::Mutating;
            Vec::new()
        }
        (RunPhase::Mutating, RunEvent::CacheMutationStarted) => Vec::new(),
        (_, RunEvent::Completed) => {
            run.phase = RunPhase::Finished;
            vec![Effect::WriteLedger(run.state.commit_success())]
        }
        (RunPhase::Resolved, RunEvent::Failed) => {
            run.phase = RunPhase::Finished;
            Vec::new()
        }
        (RunPhase::Mutating, RunEvent::Failed) => {
            run.phase = RunPhase::Finished;
            run.state
                .commit_failure()
                .map(Effect::WriteLedger)
                .into_iter()
                .collect()
        }
    };

    (run, effects)
}
