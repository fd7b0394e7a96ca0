//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Conservation: transfers never change pool + Σ(member balances)
//! - Non-negativity: only `InsufficientBalance` stops an over-draw
//! - Log pairing: one record per committed transfer
//! - Replay: reconciliation is always clean
//! - Backends agree: RocksDB and the in-memory store end in the same state

use neuron_ledger::{
    ClassroomId, Config, ErrorKind, Ledger, MemoryDirectory, MemoryStore, Role, TransactionKind,
    UserId,
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

const TEACHER: UserId = UserId::new(1);
const STUDENTS: [UserId; 3] = [UserId::new(10), UserId::new(11), UserId::new(12)];

#[derive(Debug, Clone)]
enum Op {
    Assign { student: usize, amount: i64 },
    Return { student: usize, amount: i64 },
}

/// Strategy for generating transfers against one of the students
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..STUDENTS.len(), 1i64..80).prop_map(|(student, amount)| Op::Assign { student, amount }),
        (0..STUDENTS.len(), 1i64..80).prop_map(|(student, amount)| Op::Return { student, amount }),
    ]
}

fn directory() -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(TEACHER, Role::Teacher);
    for student in STUDENTS {
        directory.insert(student, Role::Student);
    }
    directory
}

fn memory_ledger() -> Ledger {
    Ledger::with_store(
        Arc::new(MemoryStore::new()),
        directory(),
        Default::default(),
    )
    .unwrap()
}

/// Create test ledger with temp directory
fn rocksdb_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    (Ledger::open(&config, directory()).unwrap(), temp_dir)
}

async fn classroom(ledger: &Ledger, pool: i64) -> ClassroomId {
    let classroom = ledger.create_classroom(TEACHER, "Property").await.unwrap();
    for student in STUDENTS {
        ledger.enroll(TEACHER, classroom.id, student).await.unwrap();
    }
    ledger.set_pool(TEACHER, classroom.id, pool).await.unwrap();
    classroom.id
}

async fn total(ledger: &Ledger, classroom_id: ClassroomId) -> u64 {
    let roster = ledger.roster(classroom_id).await.unwrap();
    let pool = ledger.classroom(classroom_id).await.unwrap().pool_balance;
    pool + roster.iter().map(|m| m.balance).sum::<u64>()
}

/// Apply `ops`, returning the number that committed
async fn apply(ledger: &Ledger, classroom_id: ClassroomId, ops: &[Op]) -> usize {
    let mut committed = 0;
    for op in ops {
        let result = match op {
            Op::Assign { student, amount } => {
                ledger
                    .assign(TEACHER, classroom_id, STUDENTS[*student], *amount)
                    .await
            }
            Op::Return { student, amount } => {
                ledger
                    .return_neurons(STUDENTS[*student], classroom_id, *amount)
                    .await
            }
        };
        match result {
            Ok(_) => committed += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientBalance, "{}", e),
        }
    }
    committed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Transfers conserve pool + Σ(member balances)
    #[test]
    fn prop_transfers_conserve_value(
        pool in 1i64..300,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger();
            let classroom_id = classroom(&ledger, pool).await;

            for op in &ops {
                apply(&ledger, classroom_id, std::slice::from_ref(op)).await;
                prop_assert_eq!(total(&ledger, classroom_id).await, pool as u64);
            }
            Ok(())
        })?;
    }

    /// Property: Every committed transfer has exactly one record
    #[test]
    fn prop_log_pairing(
        pool in 1i64..300,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger();
            let classroom_id = classroom(&ledger, pool).await;

            let committed = apply(&ledger, classroom_id, &ops).await;

            let records = ledger.history(classroom_id).await.unwrap();
            let transfers = records
                .iter()
                .filter(|r| matches!(r.kind, TransactionKind::Assignment | TransactionKind::Return))
                .count();
            prop_assert_eq!(transfers, committed);
            prop_assert!(records.iter().all(|r| r.amount > 0));
            prop_assert!(records.windows(2).all(|w| w[0].id < w[1].id));
            Ok(())
        })?;
    }

    /// Property: Replaying the log always reproduces the stored balances
    #[test]
    fn prop_reconciliation_clean(
        pool in 0i64..300,
        ops in prop::collection::vec(op_strategy(), 0..40),
        reset in prop::option::of(0i64..300),
        leaver in prop::option::of(0..STUDENTS.len()),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = memory_ledger();
            let classroom_id = classroom(&ledger, pool).await;

            let (before, after) = ops.split_at(ops.len() / 2);
            apply(&ledger, classroom_id, before).await;
            if let Some(neurons) = reset {
                ledger.set_pool(TEACHER, classroom_id, neurons).await.unwrap();
            }
            if let Some(student) = leaver {
                ledger.unenroll(TEACHER, classroom_id, STUDENTS[student]).await.unwrap();
            }
            for op in after {
                // A departed student's transfers fail lookups, not balances
                let _ = apply_lenient(&ledger, classroom_id, op).await;
            }

            let result = ledger.reconcile(classroom_id).await.unwrap();
            prop_assert!(result.is_clean(), "{:?}", result.discrepancies);
            Ok(())
        })?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: RocksDB and the in-memory store agree on every balance
    #[test]
    fn prop_backends_agree(
        pool in 1i64..300,
        ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let memory = memory_ledger();
            let (rocks, _temp) = rocksdb_ledger();

            let memory_classroom = classroom(&memory, pool).await;
            let rocks_classroom = classroom(&rocks, pool).await;

            let memory_committed = apply(&memory, memory_classroom, &ops).await;
            let rocks_committed = apply(&rocks, rocks_classroom, &ops).await;
            prop_assert_eq!(memory_committed, rocks_committed);

            for student in STUDENTS {
                prop_assert_eq!(
                    memory.query(student, memory_classroom).await.unwrap(),
                    rocks.query(student, rocks_classroom).await.unwrap()
                );
            }
            prop_assert!(rocks.reconcile(rocks_classroom).await.unwrap().is_clean());
            Ok(())
        })?;
    }
}

async fn apply_lenient(
    ledger: &Ledger,
    classroom_id: ClassroomId,
    op: &Op,
) -> neuron_ledger::Result<()> {
    match op {
        Op::Assign { student, amount } => {
            ledger
                .assign(TEACHER, classroom_id, STUDENTS[*student], *amount)
                .await?;
        }
        Op::Return { student, amount } => {
            ledger
                .return_neurons(STUDENTS[*student], classroom_id, *amount)
                .await?;
        }
    }
    Ok(())
}
