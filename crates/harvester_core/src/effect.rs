use crate::LedgerEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace the ledger file with this entry.
    WriteLedger(LedgerEntry),
}
