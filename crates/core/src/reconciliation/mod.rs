//! Transaction sync tracking and matching

pub mod claims;
pub mod engine;
pub mod matcher;
pub mod ports;

pub use claims::{Claim, ClaimSet};
pub use engine::{ReconciliationEngine, ReconciliationPorts};
pub use matcher::{judge_reference, select_candidate, MatchCriteria, MatchDecision};
pub use ports::{
    IntegrationRepository, LedgerRepository, SyncRunRepository, TransactionFilter,
    TransactionRepository,
};
