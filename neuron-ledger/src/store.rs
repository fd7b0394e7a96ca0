//! Capability interfaces consumed by the ledger engine
//!
//! The engine holds each as a separate `Arc<dyn ...>` handle, so any one of
//! them can be swapped for a fake without touching the others.
//! [`crate::Storage`] and
//! [`crate::MemoryStore`] each implement all of them.

use crate::{
    types::{Classroom, ClassroomId, MemberBalance, Transfer, TransactionRecord, UserId},
    Result,
};
use async_trait::async_trait;

/// Read access to classroom metadata
#[async_trait]
pub trait ClassroomDirectory: Send + Sync {
    /// Fetch a classroom, `NotFound` if it does not exist
    async fn classroom(&self, id: ClassroomId) -> Result<Classroom>;
}

/// Membership gate
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Whether `user_id` holds a membership row in `classroom_id`
    async fn is_member(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<bool>;
}

/// Balances and the transaction log
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomic conditional transfer.
    ///
    /// Debit, credit and log append commit together or not at all. A debit
    /// the balance cannot cover fails with `InsufficientBalance` and writes
    /// nothing.
    async fn transfer(&self, transfer: &Transfer) -> Result<TransactionRecord>;

    /// Member balance, `None` if there is no membership row
    async fn member_balance(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<u64>>;

    /// Log records of one classroom in creation order
    async fn history(&self, classroom_id: ClassroomId) -> Result<Vec<TransactionRecord>>;
}

/// Administrative classroom operations
///
/// These sit beside the transfer core. Membership changes and pool resets
/// that move value are still logged so the audit trail stays complete.
#[async_trait]
pub trait ClassroomAdmin: Send + Sync {
    /// Create a classroom with an empty pool
    async fn create_classroom(&self, name: &str, teacher_id: UserId) -> Result<Classroom>;

    /// Create a zero-balance membership row, `InvalidArgument` if one exists
    async fn enroll(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<MemberBalance>;

    /// Destroy a membership row, reclaiming any balance into the pool
    async fn unenroll(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>>;

    /// Overwrite the pool, logging the change as an adjustment
    async fn set_pool(
        &self,
        classroom_id: ClassroomId,
        actor_id: UserId,
        neurons: u64,
    ) -> Result<Option<TransactionRecord>>;

    /// Membership rows of one classroom, ordered by user id
    async fn roster(&self, classroom_id: ClassroomId) -> Result<Vec<MemberBalance>>;

    /// All classrooms, ordered by id
    async fn classrooms(&self) -> Result<Vec<Classroom>>;
}
