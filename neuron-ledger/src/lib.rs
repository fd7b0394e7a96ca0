//! Neuron Ledger
//!
//! Classroom currency ledger: teachers assign neurons from a classroom pool
//! to students, students return them, and every balance change is recorded
//! in an append-only log.
//!
//! # Architecture
//!
//! - **Capability traits**: the engine sees the directory, classrooms,
//!   memberships and balances only through narrow async traits
//! - **Conditional debit**: sufficiency check and mutation are one atomic
//!   step, never read-then-write in the engine
//! - **Row locks**: RocksDB pessimistic transactions serialize writers per
//!   classroom; different classrooms never contend
//!
//! # Invariants
//!
//! - Pool and member balances never go negative
//! - Transfers conserve pool + Σ(member balances)
//! - Exactly one log record per committed balance change

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod audit;
pub mod balance;
pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use audit::{Discrepancy, Reconciliation};
pub use config::Config;
pub use directory::{Directory, MemoryDirectory};
pub use error::{Error, ErrorKind, Result};
pub use ledger::Ledger;
pub use memory::MemoryStore;
pub use metrics::Metrics;
pub use storage::Storage;
pub use store::{ClassroomAdmin, ClassroomDirectory, LedgerStore, MembershipStore};
pub use types::{
    Classroom, ClassroomId, Direction, Identity, MemberBalance, Role, Transfer, TransactionKind,
    TransactionRecord, UserId,
};
