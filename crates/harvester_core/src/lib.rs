//! Harvester core: item identities, the run ledger format and the pure run lifecycle.
mod effect;
mod item;
mod ledger;
mod msg;
mod policy;
mod state;
mod update;

pub use effect::Effect;
pub use item::{ItemId, ItemKind, ObjectCategory};
pub use ledger::{LedgerEntry, LedgerFormatError, LEDGER_DATE_FORMAT};
pub use msg::RunEvent;
pub use policy::{RelationshipLink, RelationshipPlan, RepullPolicy, RepullScope, ReprocessTypes};
pub use state::{
    PriorRunClassification, RunClassification, RunRequest, RunState, SnapshotSlot,
};
pub use update::{update, Run, RunPhase};
