//! Storage layer using RocksDB
//!
//! Every balance-changing write runs in a pessimistic RocksDB transaction.
//! Rows that will be modified are read with `get_for_update`, which takes an
//! exclusive row lock held until commit. Concurrent transfers on the same
//! classroom therefore serialize on the pool row, while different
//! classrooms never contend.
//!
//! # Column Families
//!
//! - `classrooms` - Classroom rows incl. pool balance (key: classroom_id)
//! - `balances` - Member balances (key: classroom_id || user_id)
//! - `transactions` - Append-only log (key: txn_id)
//! - `indices` - Per-classroom log index (key: classroom_id || txn_id)
//!
//! # Lock order
//!
//! Pool row first, member row second, in every transaction.

use crate::{
    balance,
    error::{Error, Result},
    store::{ClassroomAdmin, ClassroomDirectory, LedgerStore, MembershipStore},
    types::{
        Classroom, ClassroomId, MemberBalance, Transfer, TransactionKind, TransactionRecord,
        UserId,
    },
    Config,
};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    Transaction, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Column family names
const CF_CLASSROOMS: &str = "classrooms";
const CF_BALANCES: &str = "balances";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

type Txn<'db> = Transaction<'db, TransactionDB>;

/// Storage wrapper for RocksDB
///
/// Cheap to clone; clones share the database and id sequences.
#[derive(Clone)]
pub struct Storage {
    db: Arc<TransactionDB>,
    next_classroom_id: Arc<AtomicI64>,
    next_txn_id: Arc<AtomicU64>,
    lock_timeout_ms: i64,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.rocksdb.lock_timeout_ms);

        // Column family descriptors
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_CLASSROOMS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        let storage = Self {
            db: Arc::new(db),
            next_classroom_id: Arc::new(AtomicI64::new(1)),
            next_txn_id: Arc::new(AtomicU64::new(1)),
            lock_timeout_ms: config.rocksdb.lock_timeout_ms,
        };
        storage.seed_sequences()?;

        tracing::info!(
            path = ?path,
            next_classroom_id = storage.next_classroom_id.load(Ordering::SeqCst),
            next_txn_id = storage.next_txn_id.load(Ordering::SeqCst),
            "Opened neuron ledger store"
        );

        Ok(storage)
    }

    // Column family options

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are small and hot, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Continue both sequences after the highest persisted key
    fn seed_sequences(&self) -> Result<()> {
        let cf_classrooms = self.cf_handle(CF_CLASSROOMS)?;
        if let Some(item) = self.db.iterator_cf(cf_classrooms, IteratorMode::End).next() {
            let (key, _) = item?;
            let last = ClassroomId::from_key(&key)
                .ok_or_else(|| Error::Storage("Corrupt classroom key".to_string()))?;
            self.next_classroom_id.store(last.get() + 1, Ordering::SeqCst);
        }

        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        if let Some(item) = self.db.iterator_cf(cf_transactions, IteratorMode::End).next() {
            let (key, _) = item?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("Corrupt transaction key".to_string()))?;
            self.next_txn_id
                .store(u64::from_be_bytes(bytes) + 1, Ordering::SeqCst);
        }

        Ok(())
    }

    fn begin(&self) -> Txn<'_> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(true);
        self.db.transaction_opt(&WriteOptions::default(), &txn_opts)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Read a row and hold its exclusive lock until the transaction ends
    fn lock_row<T: DeserializeOwned>(
        txn: &Txn<'_>,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<Option<T>> {
        txn.get_for_update_cf(cf, key, true)?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn lock_classroom(&self, txn: &Txn<'_>, id: ClassroomId) -> Result<Classroom> {
        let cf = self.cf_handle(CF_CLASSROOMS)?;
        Self::lock_row(txn, cf, &id.to_key())?
            .ok_or_else(|| Error::NotFound(format!("Classroom {}", id)))
    }

    fn lock_member(
        &self,
        txn: &Txn<'_>,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<MemberBalance> {
        let cf = self.cf_handle(CF_BALANCES)?;
        Self::lock_row(txn, cf, &MemberBalance::key(classroom_id, user_id))?.ok_or_else(|| {
            Error::NotFound(format!(
                "User {} is not a member of classroom {}",
                user_id, classroom_id
            ))
        })
    }

    fn put_classroom(&self, txn: &Txn<'_>, classroom: &Classroom) -> Result<()> {
        let cf = self.cf_handle(CF_CLASSROOMS)?;
        txn.put_cf(cf, classroom.id.to_key(), bincode::serialize(classroom)?)?;
        Ok(())
    }

    fn put_member(&self, txn: &Txn<'_>, member: &MemberBalance) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let key = MemberBalance::key(member.classroom_id, member.user_id);
        txn.put_cf(cf, key, bincode::serialize(member)?)?;
        Ok(())
    }

    /// Build the next log record. The id is consumed even if the
    /// transaction later aborts.
    fn new_record(
        &self,
        classroom: &Classroom,
        user_id: UserId,
        amount: u64,
        kind: TransactionKind,
        member_after: Option<u64>,
    ) -> TransactionRecord {
        TransactionRecord {
            id: self.next_txn_id.fetch_add(1, Ordering::SeqCst),
            classroom_id: classroom.id,
            user_id,
            amount,
            kind,
            pool_after: classroom.pool_balance,
            member_after,
            created_at: Utc::now(),
        }
    }

    /// Stage a log record and its classroom index entry
    fn append_record(&self, txn: &Txn<'_>, record: &TransactionRecord) -> Result<()> {
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        txn.put_cf(
            cf_transactions,
            TransactionRecord::key(record.id),
            bincode::serialize(record)?,
        )?;

        let cf_indices = self.cf_handle(CF_INDICES)?;
        txn.put_cf(
            cf_indices,
            TransactionRecord::index_key(record.classroom_id, record.id),
            b"",
        )?;

        Ok(())
    }

    // Transfer

    /// Atomic conditional transfer between pool and member
    pub fn apply_transfer(&self, transfer: &Transfer) -> Result<TransactionRecord> {
        let txn = self.begin();

        let mut classroom = self.lock_classroom(&txn, transfer.classroom_id)?;
        let mut member = self.lock_member(&txn, transfer.classroom_id, transfer.member_id)?;

        // Rejection returns before anything is staged; dropping the
        // transaction rolls it back and releases both locks
        balance::apply_transfer(
            transfer.direction,
            &mut classroom.pool_balance,
            &mut member.balance,
            transfer.amount,
        )?;

        let record = self.new_record(
            &classroom,
            member.user_id,
            transfer.amount,
            transfer.direction.kind(),
            Some(member.balance),
        );

        self.put_classroom(&txn, &classroom)?;
        self.put_member(&txn, &member)?;
        self.append_record(&txn, &record)?;
        txn.commit()?;

        tracing::debug!(
            txn_id = record.id,
            classroom_id = %record.classroom_id,
            user_id = %record.user_id,
            amount = record.amount,
            kind = %record.kind,
            "Transfer committed"
        );

        Ok(record)
    }

    // Reads

    /// Get classroom by ID
    pub fn get_classroom(&self, id: ClassroomId) -> Result<Classroom> {
        let cf = self.cf_handle(CF_CLASSROOMS)?;
        let value = self
            .db
            .get_cf(cf, id.to_key())?
            .ok_or_else(|| Error::NotFound(format!("Classroom {}", id)))?;
        Self::decode(&value)
    }

    /// Get membership row
    pub fn get_member(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<MemberBalance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        self.db
            .get_cf(cf, MemberBalance::key(classroom_id, user_id))?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    /// Get log record by ID
    pub fn get_record(&self, id: u64) -> Result<TransactionRecord> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, TransactionRecord::key(id))?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))?;
        Self::decode(&value)
    }

    /// Get a classroom's log records (via index)
    pub fn get_classroom_records(&self, classroom_id: ClassroomId) -> Result<Vec<TransactionRecord>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = classroom_id.to_key();

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            // Extract txn_id from key (bytes 8..16)
            let id_bytes: [u8; 8] = key
                .get(8..16)
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| Error::Storage("Corrupt index key".to_string()))?;
            records.push(self.get_record(u64::from_be_bytes(id_bytes))?);
        }

        Ok(records)
    }

    /// Membership rows of a classroom
    pub fn get_members(&self, classroom_id: ClassroomId) -> Result<Vec<MemberBalance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let prefix = classroom_id.to_key();

        let mut members = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            members.push(Self::decode(&value)?);
        }

        Ok(members)
    }

    /// All classrooms
    pub fn get_classrooms(&self) -> Result<Vec<Classroom>> {
        let cf = self.cf_handle(CF_CLASSROOMS)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item?;
                Self::decode(&value)
            })
            .collect()
    }

    // Administrative writes

    /// Insert a classroom with an empty pool
    pub fn insert_classroom(&self, name: &str, teacher_id: UserId) -> Result<Classroom> {
        let classroom = Classroom {
            id: ClassroomId::new(self.next_classroom_id.fetch_add(1, Ordering::SeqCst)),
            name: name.to_string(),
            teacher_id,
            pool_balance: 0,
            created_at: Utc::now(),
        };

        let txn = self.begin();
        self.put_classroom(&txn, &classroom)?;
        txn.commit()?;

        tracing::info!(
            classroom_id = %classroom.id,
            teacher_id = %teacher_id,
            "Classroom created"
        );

        Ok(classroom)
    }

    /// Insert a zero-balance membership row
    pub fn insert_member(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<MemberBalance> {
        let txn = self.begin();

        // Holding the pool row keeps this ordered with transfers
        self.lock_classroom(&txn, classroom_id)?;

        let cf = self.cf_handle(CF_BALANCES)?;
        let existing: Option<MemberBalance> =
            Self::lock_row(&txn, cf, &MemberBalance::key(classroom_id, user_id))?;
        if existing.is_some() {
            return Err(Error::InvalidArgument(format!(
                "User {} is already a member of classroom {}",
                user_id, classroom_id
            )));
        }

        let member = MemberBalance::new(classroom_id, user_id);
        self.put_member(&txn, &member)?;
        txn.commit()?;

        Ok(member)
    }

    /// Delete a membership row, sweeping its balance into the pool
    pub fn delete_member(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let txn = self.begin();

        let mut classroom = self.lock_classroom(&txn, classroom_id)?;
        let mut member = self.lock_member(&txn, classroom_id, user_id)?;

        let reclaimed = balance::reclaim(&mut classroom.pool_balance, &mut member.balance)?;
        let record = if reclaimed > 0 {
            let record = self.new_record(
                &classroom,
                user_id,
                reclaimed,
                TransactionKind::Reclaim,
                Some(0),
            );
            self.put_classroom(&txn, &classroom)?;
            self.append_record(&txn, &record)?;
            Some(record)
        } else {
            None
        };

        let cf = self.cf_handle(CF_BALANCES)?;
        txn.delete_cf(cf, MemberBalance::key(classroom_id, user_id))?;
        txn.commit()?;

        Ok(record)
    }

    /// Overwrite the pool balance
    pub fn reset_pool(
        &self,
        classroom_id: ClassroomId,
        actor_id: UserId,
        neurons: u64,
    ) -> Result<Option<TransactionRecord>> {
        let txn = self.begin();
        let mut classroom = self.lock_classroom(&txn, classroom_id)?;

        let Some(delta) = balance::adjustment_delta(classroom.pool_balance, neurons) else {
            return Ok(None);
        };

        // Member rows only change under the pool lock held here
        let members = self.get_members(classroom_id)?;
        balance::check_pool_capacity(neurons, members.iter().map(|m| m.balance))?;

        classroom.pool_balance = neurons;
        let record = self.new_record(&classroom, actor_id, delta, TransactionKind::Adjustment, None);

        self.put_classroom(&txn, &classroom)?;
        self.append_record(&txn, &record)?;
        txn.commit()?;

        Ok(Some(record))
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_classrooms: self.get_classrooms()?.len() as u64,
            next_transaction_id: self.next_txn_id.load(Ordering::SeqCst),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Storage) -> Result<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || f(storage)).await?
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Number of classrooms
    pub total_classrooms: u64,
    /// Id the next log record will receive
    pub next_transaction_id: u64,
}

#[async_trait]
impl ClassroomDirectory for Storage {
    async fn classroom(&self, id: ClassroomId) -> Result<Classroom> {
        self.blocking(move |s| s.get_classroom(id)).await
    }
}

#[async_trait]
impl MembershipStore for Storage {
    async fn is_member(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<bool> {
        self.blocking(move |s| Ok(s.get_member(classroom_id, user_id)?.is_some()))
            .await
    }
}

#[async_trait]
impl LedgerStore for Storage {
    async fn transfer(&self, transfer: &Transfer) -> Result<TransactionRecord> {
        let transfer = *transfer;
        self.blocking(move |s| s.apply_transfer(&transfer)).await
    }

    async fn member_balance(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<u64>> {
        self.blocking(move |s| Ok(s.get_member(classroom_id, user_id)?.map(|m| m.balance)))
            .await
    }

    async fn history(&self, classroom_id: ClassroomId) -> Result<Vec<TransactionRecord>> {
        self.blocking(move |s| s.get_classroom_records(classroom_id))
            .await
    }
}

#[async_trait]
impl ClassroomAdmin for Storage {
    async fn create_classroom(&self, name: &str, teacher_id: UserId) -> Result<Classroom> {
        let name = name.to_string();
        self.blocking(move |s| s.insert_classroom(&name, teacher_id))
            .await
    }

    async fn enroll(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<MemberBalance> {
        self.blocking(move |s| s.insert_member(classroom_id, user_id))
            .await
    }

    async fn unenroll(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        self.blocking(move |s| s.delete_member(classroom_id, user_id))
            .await
    }

    async fn set_pool(
        &self,
        classroom_id: ClassroomId,
        actor_id: UserId,
        neurons: u64,
    ) -> Result<Option<TransactionRecord>> {
        self.blocking(move |s| s.reset_pool(classroom_id, actor_id, neurons))
            .await
    }

    async fn roster(&self, classroom_id: ClassroomId) -> Result<Vec<MemberBalance>> {
        self.blocking(move |s| s.get_members(classroom_id)).await
    }

    async fn classrooms(&self) -> Result<Vec<Classroom>> {
        self.blocking(|s| s.get_classrooms()).await
    }
}
