use std::fmt;

use chrono::{DateTime, Utc};

use crate::ledger::LedgerEntry;

/// How the current run treats the upstream system and the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunClassification {
    /// No ledger exists yet; everything is pulled.
    Initial,
    /// Only items modified since the last successful pull are fetched.
    Delta,
    /// Everything is pulled again even though a ledger exists.
    ForcedFull,
    /// Translated output is rebuilt from the raw cache without fetching.
    Reprocessing,
}

impl RunClassification {
    pub fn name(self) -> &'static str {
        match self {
            RunClassification::Initial => "INITIAL",
            RunClassification::Delta => "DELTA",
            RunClassification::ForcedFull => "FORCED_FULL",
            RunClassification::Reprocessing => "REPROCESSING",
        }
    }

    /// True when the raw cache is rebuilt from scratch.
    pub fn is_full_pull(self) -> bool {
        matches!(
            self,
            RunClassification::Initial | RunClassification::ForcedFull
        )
    }
}

impl fmt::Display for RunClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure tag recorded on line 3 of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorRunClassification {
    FailedFull,
    FailedReprocess,
}

impl PriorRunClassification {
    pub fn token(self) -> &'static str {
        match self {
            PriorRunClassification::FailedFull => "FAILED_FULL",
            PriorRunClassification::FailedReprocess => "FAILED_REPROCESS",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "FAILED_FULL" => Some(PriorRunClassification::FailedFull),
            "FAILED_REPROCESS" => Some(PriorRunClassification::FailedReprocess),
            _ => None,
        }
    }
}

impl fmt::Display for PriorRunClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// What the operator asked for on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunRequest {
    #[default]
    Delta,
    FullPull,
    Reprocess,
}

/// One of the two on-disk snapshot directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSlot {
    Even,
    Odd,
}

impl SnapshotSlot {
    pub fn for_run_count(run_count: i64) -> Self {
        if run_count.rem_euclid(2) == 0 {
            SnapshotSlot::Even
        } else {
            SnapshotSlot::Odd
        }
    }

    pub fn other(self) -> Self {
        match self {
            SnapshotSlot::Even => SnapshotSlot::Odd,
            SnapshotSlot::Odd => SnapshotSlot::Even,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            SnapshotSlot::Even => "0",
            SnapshotSlot::Odd => "1",
        }
    }
}

/// Resolved state of the run in progress.
///
/// Built once from the ledger at start-up; the two `commit_*` methods only
/// compute the ledger entry to write and never change the state itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    previous_run_count: i64,
    last_run: Option<DateTime<Utc>>,
    classification: RunClassification,
    prior: Option<PriorRunClassification>,
    started_at: DateTime<Utc>,
}

impl RunState {
    /// State of the very first run, before any ledger exists.
    pub fn initial(started_at: DateTime<Utc>) -> Self {
        Self {
            previous_run_count: -1,
            last_run: None,
            classification: RunClassification::Initial,
            prior: None,
            started_at,
        }
    }

    /// Decides the classification of this run from the previous run's ledger.
    ///
    /// A `FAILED_FULL` tag always forces a full pull. A `FAILED_REPROCESS`
    /// tag upgrades a requested delta to a reprocessing pass. Otherwise the
    /// request is honoured.
    pub fn resolve(
        entry: Option<&LedgerEntry>,
        request: RunRequest,
        started_at: DateTime<Utc>,
    ) -> Self {
        let Some(entry) = entry else {
            return Self::initial(started_at);
        };

        let classification = match (entry.failure, request) {
            (Some(PriorRunClassification::FailedFull), _) => RunClassification::ForcedFull,
            (Some(PriorRunClassification::FailedReprocess), RunRequest::Delta) => {
                RunClassification::Reprocessing
            }
            (_, RunRequest::Delta) => RunClassification::Delta,
            (_, RunRequest::FullPull) => RunClassification::ForcedFull,
            (_, RunRequest::Reprocess) => RunClassification::Reprocessing,
        };

        Self {
            previous_run_count: entry.run_count,
            last_run: Some(entry.last_run),
            classification,
            prior: entry.failure,
            started_at,
        }
    }

    pub fn classification(&self) -> RunClassification {
        self.classification
    }

    /// Failure tag left by the previous run, if it did not finish cleanly.
    pub fn recovering_from(&self) -> Option<PriorRunClassification> {
        self.prior
    }

    pub fn previous_run_count(&self) -> i64 {
        self.previous_run_count
    }

    pub fn current_run_count(&self) -> i64 {
        self.previous_run_count + 1
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Lower bound for modified-since queries; only delta runs have one.
    pub fn modified_since(&self) -> Option<DateTime<Utc>> {
        match self.classification {
            RunClassification::Delta => self.last_run,
            _ => None,
        }
    }

    pub fn current_slot(&self) -> SnapshotSlot {
        SnapshotSlot::for_run_count(self.current_run_count())
    }

    pub fn previous_slot(&self) -> SnapshotSlot {
        self.current_slot().other()
    }

    /// Ledger entry recorded when this run succeeds.
    ///
    /// Reprocessing does not pull anything, so it keeps the previous date.
    pub fn commit_success(&self) -> LedgerEntry {
        let last_run = match (self.classification, self.last_run) {
            (RunClassification::Reprocessing, Some(previous)) => previous,
            _ => self.started_at,
        };
        LedgerEntry {
            run_count: self.current_run_count(),
            last_run,
            failure: None,
        }
    }

    /// Ledger entry recorded when this run fails after mutating caches.
    ///
    /// `None` means the ledger must be left as it is.
    pub fn commit_failure(&self) -> Option<LedgerEntry> {
        let failure = match self.classification {
            RunClassification::ForcedFull => PriorRunClassification::FailedFull,
            RunClassification::Reprocessing => PriorRunClassification::FailedReprocess,
            RunClassification::Initial | RunClassification::Delta => return None,
        };
        let last_run = self.last_run?;
        Some(LedgerEntry {
            run_count: self.previous_run_count,
            last_run,
            failure: Some(failure),
        })
    }
}
