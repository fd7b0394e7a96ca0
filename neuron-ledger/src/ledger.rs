//! Main ledger orchestration layer
//!
//! [`Ledger`] is the single entry point for balance-changing operations. It
//! ties together the directory, the classroom and membership lookups and the
//! transactional store, each injected as a narrow trait object.
//!
//! Checks run in a fixed order so the first failing precondition decides
//! the error:
//!
//! 1. Amount and identifiers (`InvalidArgument`, no store access)
//! 2. Actor resolution and role (`NotFound`, `Forbidden`)
//! 3. Classroom lookup and ownership (`NotFound`, `Forbidden`)
//! 4. Membership gate (`InvalidArgument`)
//! 5. Atomic conditional transfer (`InsufficientBalance`, `Conflict`)
//!
//! # Example
//!
//! ```no_run
//! use neuron_ledger::{Config, Ledger, MemoryDirectory, Role, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> neuron_ledger::Result<()> {
//!     let directory = Arc::new(MemoryDirectory::new());
//!     directory.insert(UserId::new(1), Role::Teacher);
//!     directory.insert(UserId::new(2), Role::Student);
//!
//!     let ledger = Ledger::open(&Config::default(), directory)?;
//!     let classroom = ledger.create_classroom(UserId::new(1), "Biology").await?;
//!     ledger.enroll(UserId::new(1), classroom.id, UserId::new(2)).await?;
//!     ledger.set_pool(UserId::new(1), classroom.id, 100).await?;
//!     ledger.assign(UserId::new(1), classroom.id, UserId::new(2), 30).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    audit::{self, Reconciliation},
    config::RetryConfig,
    directory::Directory,
    error::ErrorKind,
    metrics::Metrics,
    retry::RetryPolicy,
    store::{ClassroomAdmin, ClassroomDirectory, LedgerStore, MembershipStore},
    types::{
        Classroom, ClassroomId, Direction, MemberBalance, Role, Transfer, TransactionRecord,
        UserId,
    },
    Config, Error, Result, Storage,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Main ledger interface
pub struct Ledger {
    directory: Arc<dyn Directory>,
    classrooms: Arc<dyn ClassroomDirectory>,
    memberships: Arc<dyn MembershipStore>,
    store: Arc<dyn LedgerStore>,
    admin: Arc<dyn ClassroomAdmin>,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl Ledger {
    /// Build a ledger from individually injected capabilities
    pub fn new(
        directory: Arc<dyn Directory>,
        classrooms: Arc<dyn ClassroomDirectory>,
        memberships: Arc<dyn MembershipStore>,
        store: Arc<dyn LedgerStore>,
        admin: Arc<dyn ClassroomAdmin>,
        retry: RetryConfig,
    ) -> Result<Self> {
        let metrics = Metrics::new()?;
        let retry = RetryPolicy::new(retry).with_counter(metrics.conflict_retries.clone());

        Ok(Self {
            directory,
            classrooms,
            memberships,
            store,
            admin,
            retry,
            metrics,
        })
    }

    /// Build a ledger whose store capabilities all come from one backend
    pub fn with_store<S>(store: Arc<S>, directory: Arc<dyn Directory>, retry: RetryConfig) -> Result<Self>
    where
        S: ClassroomDirectory + MembershipStore + LedgerStore + ClassroomAdmin + 'static,
    {
        Self::new(
            directory,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            retry,
        )
    }

    /// Open ledger on RocksDB with configuration
    pub fn open(config: &Config, directory: Arc<dyn Directory>) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);

        info!(
            service = %config.service_name,
            version = %config.service_version,
            "Ledger opened"
        );

        Self::with_store(storage, directory, config.retry.clone())
    }

    /// Get metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Transfers

    /// Move `amount` neurons from a classroom's pool to one of its students.
    ///
    /// Only the teacher owning the classroom may assign.
    pub async fn assign(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        member_id: UserId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        self.assign_inner(actor_id, classroom_id, member_id, amount)
            .await
            .map_err(|e| self.reject("assign", e))
    }

    async fn assign_inner(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        member_id: UserId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        let amount = positive_amount(amount)?;
        actor_id.validate()?;
        classroom_id.validate()?;
        member_id.validate()?;

        self.authorize_owner(actor_id, classroom_id).await?;

        self.directory.resolve_role(member_id).await?;
        if !self.memberships.is_member(classroom_id, member_id).await? {
            return Err(Error::InvalidArgument(format!(
                "User {} is not a member of classroom {}",
                member_id, classroom_id
            )));
        }

        self.execute_transfer(Transfer {
            direction: Direction::Assign,
            classroom_id,
            member_id,
            amount,
        })
        .await
    }

    /// Move `amount` neurons from the acting student back to the pool
    pub async fn return_neurons(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        self.return_inner(actor_id, classroom_id, amount)
            .await
            .map_err(|e| self.reject("return", e))
    }

    async fn return_inner(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        amount: i64,
    ) -> Result<TransactionRecord> {
        let amount = positive_amount(amount)?;
        actor_id.validate()?;
        classroom_id.validate()?;

        let actor = self.directory.resolve_role(actor_id).await?;
        if actor.role != Role::Student {
            return Err(Error::Forbidden(format!(
                "User {} is not a student",
                actor_id
            )));
        }

        self.classrooms.classroom(classroom_id).await?;
        if !self.memberships.is_member(classroom_id, actor_id).await? {
            return Err(Error::InvalidArgument(format!(
                "User {} is not a member of classroom {}",
                actor_id, classroom_id
            )));
        }

        self.execute_transfer(Transfer {
            direction: Direction::Return,
            classroom_id,
            member_id: actor_id,
            amount,
        })
        .await
    }

    /// Current balance of a user in a classroom
    pub async fn query(&self, user_id: UserId, classroom_id: ClassroomId) -> Result<u64> {
        self.query_inner(user_id, classroom_id)
            .await
            .map_err(|e| self.reject("query", e))
    }

    async fn query_inner(&self, user_id: UserId, classroom_id: ClassroomId) -> Result<u64> {
        user_id.validate()?;
        classroom_id.validate()?;

        self.directory.resolve_role(user_id).await?;
        self.classrooms.classroom(classroom_id).await?;

        self.store
            .member_balance(classroom_id, user_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "User {} is not a member of classroom {}",
                    user_id, classroom_id
                ))
            })
    }

    async fn execute_transfer(&self, transfer: Transfer) -> Result<TransactionRecord> {
        let start = Instant::now();
        let store = self.store.as_ref();
        let request = &transfer;

        let record = self
            .retry
            .execute("transfer", move || store.transfer(request))
            .await?;

        self.metrics
            .record_transfer_duration(start.elapsed().as_secs_f64());
        self.metrics.record_transaction(&record);

        info!(
            txn_id = record.id,
            classroom_id = %record.classroom_id,
            user_id = %record.user_id,
            amount = record.amount,
            kind = %record.kind,
            pool_after = record.pool_after,
            "Transfer committed"
        );

        Ok(record)
    }

    // Classroom administration

    /// Create a classroom owned by the acting teacher
    pub async fn create_classroom(&self, actor_id: UserId, name: &str) -> Result<Classroom> {
        self.create_classroom_inner(actor_id, name)
            .await
            .map_err(|e| self.reject("create_classroom", e))
    }

    async fn create_classroom_inner(&self, actor_id: UserId, name: &str) -> Result<Classroom> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "Classroom name must not be blank".to_string(),
            ));
        }
        actor_id.validate()?;

        let actor = self.directory.resolve_role(actor_id).await?;
        if actor.role != Role::Teacher {
            return Err(Error::Forbidden(format!(
                "User {} is not a teacher",
                actor_id
            )));
        }

        self.admin.create_classroom(name, actor_id).await
    }

    /// Add a student to a classroom with a zero balance
    pub async fn enroll(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        student_id: UserId,
    ) -> Result<MemberBalance> {
        self.enroll_inner(actor_id, classroom_id, student_id)
            .await
            .map_err(|e| self.reject("enroll", e))
    }

    async fn enroll_inner(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        student_id: UserId,
    ) -> Result<MemberBalance> {
        actor_id.validate()?;
        classroom_id.validate()?;
        student_id.validate()?;

        self.authorize_owner(actor_id, classroom_id).await?;

        let student = self.directory.resolve_role(student_id).await?;
        if student.role != Role::Student {
            return Err(Error::InvalidArgument(format!(
                "User {} is not a student",
                student_id
            )));
        }

        let admin = self.admin.as_ref();
        let member = self
            .retry
            .execute("enroll", move || admin.enroll(classroom_id, student_id))
            .await?;
        info!(
            classroom_id = %classroom_id,
            user_id = %student_id,
            "Student enrolled"
        );
        Ok(member)
    }

    /// Remove a student, sweeping any balance back into the pool
    pub async fn unenroll(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        student_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        self.unenroll_inner(actor_id, classroom_id, student_id)
            .await
            .map_err(|e| self.reject("unenroll", e))
    }

    async fn unenroll_inner(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        student_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        actor_id.validate()?;
        classroom_id.validate()?;
        student_id.validate()?;

        self.authorize_owner(actor_id, classroom_id).await?;

        let admin = self.admin.as_ref();
        let record = self
            .retry
            .execute("unenroll", move || admin.unenroll(classroom_id, student_id))
            .await?;

        if let Some(record) = &record {
            self.metrics.record_transaction(record);
        }
        info!(
            classroom_id = %classroom_id,
            user_id = %student_id,
            reclaimed = record.as_ref().map_or(0, |r| r.amount),
            "Student unenrolled"
        );
        Ok(record)
    }

    /// Overwrite a classroom's pool.
    ///
    /// An effective change is logged as an adjustment; setting the current
    /// value writes nothing and returns `None`.
    pub async fn set_pool(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        neurons: i64,
    ) -> Result<Option<TransactionRecord>> {
        self.set_pool_inner(actor_id, classroom_id, neurons)
            .await
            .map_err(|e| self.reject("set_pool", e))
    }

    async fn set_pool_inner(
        &self,
        actor_id: UserId,
        classroom_id: ClassroomId,
        neurons: i64,
    ) -> Result<Option<TransactionRecord>> {
        let neurons = u64::try_from(neurons).map_err(|_| {
            Error::InvalidArgument(format!("Pool must not be negative: {}", neurons))
        })?;
        actor_id.validate()?;
        classroom_id.validate()?;

        self.authorize_owner(actor_id, classroom_id).await?;

        let admin = self.admin.as_ref();
        let record = self
            .retry
            .execute("set_pool", move || {
                admin.set_pool(classroom_id, actor_id, neurons)
            })
            .await?;

        match &record {
            Some(record) => {
                self.metrics.record_transaction(record);
                info!(
                    txn_id = record.id,
                    classroom_id = %classroom_id,
                    user_id = %actor_id,
                    amount = record.amount,
                    pool_after = record.pool_after,
                    "Pool adjusted"
                );
            }
            None => debug!(classroom_id = %classroom_id, neurons, "Pool unchanged"),
        }
        Ok(record)
    }

    // Reads

    /// Classroom metadata and current pool
    pub async fn classroom(&self, classroom_id: ClassroomId) -> Result<Classroom> {
        classroom_id.validate()?;
        self.classrooms.classroom(classroom_id).await
    }

    /// Membership rows of a classroom
    pub async fn roster(&self, classroom_id: ClassroomId) -> Result<Vec<MemberBalance>> {
        classroom_id.validate()?;
        self.classrooms.classroom(classroom_id).await?;
        self.admin.roster(classroom_id).await
    }

    /// Log records of a classroom in creation order
    pub async fn history(&self, classroom_id: ClassroomId) -> Result<Vec<TransactionRecord>> {
        classroom_id.validate()?;
        self.classrooms.classroom(classroom_id).await?;
        self.store.history(classroom_id).await
    }

    /// Replay a classroom's log and compare it with the stored balances
    pub async fn reconcile(&self, classroom_id: ClassroomId) -> Result<Reconciliation> {
        classroom_id.validate()?;
        let classroom = self.classrooms.classroom(classroom_id).await?;
        let records = self.store.history(classroom_id).await?;
        let roster = self.admin.roster(classroom_id).await?;

        let result = audit::replay(&classroom, &records, &roster);
        if result.is_clean() {
            debug!(classroom_id = %classroom_id, records = result.records, "Reconciled");
        } else {
            warn!(
                classroom_id = %classroom_id,
                discrepancies = result.discrepancies.len(),
                "Reconciliation found discrepancies"
            );
        }
        Ok(result)
    }

    /// Reconcile every classroom, ordered by id
    pub async fn reconcile_all(&self) -> Result<Vec<Reconciliation>> {
        let mut results = Vec::new();
        for classroom in self.admin.classrooms().await? {
            results.push(self.reconcile(classroom.id).await?);
        }
        Ok(results)
    }

    // Helpers

    /// Resolve the actor as the teacher owning `classroom_id`
    async fn authorize_owner(&self, actor_id: UserId, classroom_id: ClassroomId) -> Result<Classroom> {
        let actor = self.directory.resolve_role(actor_id).await?;
        if actor.role != Role::Teacher {
            return Err(Error::Forbidden(format!(
                "User {} is not a teacher",
                actor_id
            )));
        }

        let classroom = self.classrooms.classroom(classroom_id).await?;
        if classroom.teacher_id != actor_id {
            return Err(Error::Forbidden(format!(
                "User {} does not own classroom {}",
                actor_id, classroom_id
            )));
        }

        Ok(classroom)
    }

    /// Count and log a failed operation, handing the error back
    fn reject(&self, operation: &'static str, err: Error) -> Error {
        let kind = err.kind();
        self.metrics.record_rejection(kind);

        match kind {
            ErrorKind::StorageFailure => error!(operation, error = %err, "Operation failed"),
            ErrorKind::Conflict | ErrorKind::InsufficientBalance => {
                warn!(operation, reason = kind.as_str(), error = %err, "Operation rejected")
            }
            _ => debug!(operation, reason = kind.as_str(), error = %err, "Operation rejected"),
        }

        err
    }
}

/// Accept a strictly positive amount
fn positive_amount(amount: i64) -> Result<u64> {
    if amount <= 0 {
        return Err(Error::InvalidArgument(format!(
            "Amount must be positive: {}",
            amount
        )));
    }
    Ok(amount as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryDirectory, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEACHER: UserId = UserId::new(1);
    const OTHER_TEACHER: UserId = UserId::new(2);
    const STUDENT: UserId = UserId::new(10);
    const OUTSIDER: UserId = UserId::new(11);

    fn directory() -> Arc<MemoryDirectory> {
        let directory = Arc::new(MemoryDirectory::new());
        directory.insert(TEACHER, Role::Teacher);
        directory.insert(OTHER_TEACHER, Role::Teacher);
        directory.insert(STUDENT, Role::Student);
        directory.insert(OUTSIDER, Role::Student);
        directory
    }

    async fn setup(pool: i64) -> (Ledger, ClassroomId) {
        let ledger = Ledger::with_store(
            Arc::new(MemoryStore::new()),
            directory(),
            RetryConfig::default(),
        )
        .unwrap();
        let classroom = ledger.create_classroom(TEACHER, "Algebra").await.unwrap();
        ledger.enroll(TEACHER, classroom.id, STUDENT).await.unwrap();
        ledger.set_pool(TEACHER, classroom.id, pool).await.unwrap();
        (ledger, classroom.id)
    }

    /// Directory that counts lookups
    #[derive(Default)]
    struct CountingDirectory {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Directory for CountingDirectory {
        async fn resolve_role(&self, id: UserId) -> Result<crate::types::Identity> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotFound(format!("User {}", id)))
        }
    }

    /// Store whose transaction layer is down
    struct BrokenStore;

    #[async_trait]
    impl LedgerStore for BrokenStore {
        async fn transfer(&self, _transfer: &Transfer) -> Result<TransactionRecord> {
            Err(Error::Storage("disk unavailable".to_string()))
        }

        async fn member_balance(&self, _: ClassroomId, _: UserId) -> Result<Option<u64>> {
            Err(Error::Storage("disk unavailable".to_string()))
        }

        async fn history(&self, _: ClassroomId) -> Result<Vec<TransactionRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_assign_and_return() {
        let (ledger, classroom_id) = setup(100).await;

        let record = ledger.assign(TEACHER, classroom_id, STUDENT, 30).await.unwrap();
        assert_eq!(record.pool_after, 70);
        assert_eq!(ledger.query(STUDENT, classroom_id).await.unwrap(), 30);

        let record = ledger.return_neurons(STUDENT, classroom_id, 30).await.unwrap();
        assert_eq!(record.pool_after, 100);
        assert_eq!(ledger.query(STUDENT, classroom_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected_before_lookup() {
        let directory = Arc::new(CountingDirectory::default());
        let ledger = Ledger::with_store(
            Arc::new(MemoryStore::new()),
            directory.clone(),
            RetryConfig::default(),
        )
        .unwrap();

        for amount in [0, -5] {
            let err = ledger
                .assign(TEACHER, ClassroomId::new(1), STUDENT, amount)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        let err = ledger
            .return_neurons(UserId::new(0), ClassroomId::new(1), 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(directory.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_actor_not_found() {
        let (ledger, classroom_id) = setup(100).await;
        let err = ledger
            .assign(UserId::new(99), classroom_id, STUDENT, 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_role_and_ownership_forbidden() {
        let (ledger, classroom_id) = setup(100).await;

        let err = ledger.assign(STUDENT, classroom_id, STUDENT, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = ledger
            .assign(OTHER_TEACHER, classroom_id, STUDENT, 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = ledger.return_neurons(TEACHER, classroom_id, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_non_member_targets() {
        let (ledger, classroom_id) = setup(100).await;

        let err = ledger.assign(TEACHER, classroom_id, OUTSIDER, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ledger.assign(TEACHER, classroom_id, UserId::new(77), 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = ledger.return_neurons(OUTSIDER, classroom_id, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ledger.query(OUTSIDER, classroom_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_missing_classroom_not_found() {
        let (ledger, _) = setup(100).await;
        let err = ledger
            .assign(TEACHER, ClassroomId::new(404), STUDENT, 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let memory = Arc::new(MemoryStore::new());
        let directory = directory();
        let healthy = Ledger::with_store(memory.clone(), directory.clone(), RetryConfig::default())
            .unwrap();
        let classroom = healthy.create_classroom(TEACHER, "Art").await.unwrap();
        healthy.enroll(TEACHER, classroom.id, STUDENT).await.unwrap();
        healthy.set_pool(TEACHER, classroom.id, 50).await.unwrap();

        // Swap only the ledger store; everything else stays in memory
        let ledger = Ledger::new(
            directory,
            memory.clone(),
            memory.clone(),
            Arc::new(BrokenStore),
            memory.clone(),
            RetryConfig::default(),
        )
        .unwrap();

        let err = ledger.assign(TEACHER, classroom.id, STUDENT, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(memory.classroom(classroom.id).await.unwrap().pool_balance, 50);
        assert_eq!(
            ledger
                .metrics()
                .rejections_total
                .with_label_values(&["storage_failure"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_classroom_rules() {
        let ledger = Ledger::with_store(
            Arc::new(MemoryStore::new()),
            directory(),
            RetryConfig::default(),
        )
        .unwrap();

        let err = ledger.create_classroom(TEACHER, "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ledger.create_classroom(STUDENT, "Chess").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let classroom = ledger.create_classroom(TEACHER, " Chess ").await.unwrap();
        assert_eq!(classroom.name, "Chess");
        assert_eq!(classroom.pool_balance, 0);
        assert_eq!(classroom.teacher_id, TEACHER);
    }

    #[tokio::test]
    async fn test_enroll_rules() {
        let (ledger, classroom_id) = setup(0).await;

        let err = ledger.enroll(TEACHER, classroom_id, OTHER_TEACHER).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ledger.enroll(TEACHER, classroom_id, STUDENT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!err.is_retryable());
        assert_eq!(ledger.metrics().conflict_retries.get(), 0);

        let err = ledger.enroll(OTHER_TEACHER, classroom_id, OUTSIDER).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let member = ledger.enroll(TEACHER, classroom_id, OUTSIDER).await.unwrap();
        assert_eq!(member.balance, 0);
        assert_eq!(ledger.roster(classroom_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unenroll_reclaims() {
        let (ledger, classroom_id) = setup(100).await;
        ledger.assign(TEACHER, classroom_id, STUDENT, 40).await.unwrap();

        let record = ledger
            .unenroll(TEACHER, classroom_id, STUDENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount, 40);
        assert_eq!(record.pool_after, 100);

        let err = ledger.query(STUDENT, classroom_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ledger.reconcile(classroom_id).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_set_pool_rules() {
        let (ledger, classroom_id) = setup(100).await;

        let err = ledger.set_pool(TEACHER, classroom_id, -1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = ledger.set_pool(OTHER_TEACHER, classroom_id, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert!(ledger.set_pool(TEACHER, classroom_id, 100).await.unwrap().is_none());

        let record = ledger
            .set_pool(TEACHER, classroom_id, 250)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount, 150);
        assert_eq!(record.user_id, TEACHER);
        assert_eq!(ledger.history(classroom_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_metrics_follow_outcomes() {
        let (ledger, classroom_id) = setup(100).await;
        ledger.assign(TEACHER, classroom_id, STUDENT, 30).await.unwrap();
        ledger.assign(TEACHER, classroom_id, STUDENT, 300).await.unwrap_err();

        let metrics = ledger.metrics();
        assert_eq!(
            metrics.transactions_total.with_label_values(&["assignment"]).get(),
            1
        );
        assert_eq!(
            metrics.neurons_moved_total.with_label_values(&["assignment"]).get(),
            30
        );
        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["insufficient_balance"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_open_on_rocksdb() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let ledger = Ledger::open(&config, directory()).unwrap();
        let classroom = ledger.create_classroom(TEACHER, "Music").await.unwrap();
        ledger.enroll(TEACHER, classroom.id, STUDENT).await.unwrap();
        ledger.set_pool(TEACHER, classroom.id, 20).await.unwrap();
        ledger.assign(TEACHER, classroom.id, STUDENT, 20).await.unwrap();

        assert_eq!(ledger.query(STUDENT, classroom.id).await.unwrap(), 20);
        let results = ledger.reconcile_all().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_clean());
    }
}
