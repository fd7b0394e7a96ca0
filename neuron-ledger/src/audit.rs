//! Log replay and reconciliation
//!
//! A classroom starts with an empty pool and no balances, so its whole state
//! can be rebuilt from its log. [`replay`] does that, checks every record's
//! `pool_after`/`member_after` snapshot along the way, and finally compares
//! the rebuilt balances to the stored rows.
//!
//! The inputs are read separately, so reconcile a classroom while it is
//! quiescent or expect spurious balance mismatches.

use crate::types::{
    Classroom, ClassroomId, MemberBalance, TransactionKind, TransactionRecord, UserId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One problem found while reconciling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Record ids must strictly increase
    OutOfOrder { txn_id: u64, previous: u64 },

    /// Records always carry a positive amount
    ZeroAmount { txn_id: u64 },

    /// Applying the record would drive a balance below zero
    Underflow { txn_id: u64 },

    /// Adjustment amount is not the distance between the old and new pool
    AdjustmentDelta {
        txn_id: u64,
        replayed: u64,
        recorded: u64,
    },

    /// Recorded pool snapshot differs from the replay
    PoolSnapshot {
        txn_id: u64,
        replayed: u64,
        recorded: u64,
    },

    /// Recorded member snapshot differs from the replay
    MemberSnapshot {
        txn_id: u64,
        user_id: UserId,
        replayed: u64,
        recorded: Option<u64>,
    },

    /// Stored pool differs from the replay
    PoolBalance { replayed: u64, stored: u64 },

    /// Stored member balance differs from the replay
    MemberBalance {
        user_id: UserId,
        replayed: u64,
        stored: u64,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::OutOfOrder { txn_id, previous } => {
                write!(f, "record {} follows record {}", txn_id, previous)
            }
            Discrepancy::ZeroAmount { txn_id } => write!(f, "record {} has zero amount", txn_id),
            Discrepancy::Underflow { txn_id } => {
                write!(f, "record {} drives a balance negative", txn_id)
            }
            Discrepancy::AdjustmentDelta {
                txn_id,
                replayed,
                recorded,
            } => write!(
                f,
                "record {} adjusts by {} but the pool moved by {}",
                txn_id, recorded, replayed
            ),
            Discrepancy::PoolSnapshot {
                txn_id,
                replayed,
                recorded,
            } => write!(
                f,
                "record {} pool_after {} but replay gives {}",
                txn_id, recorded, replayed
            ),
            Discrepancy::MemberSnapshot {
                txn_id,
                user_id,
                replayed,
                recorded,
            } => write!(
                f,
                "record {} member_after {:?} for user {} but replay gives {}",
                txn_id, recorded, user_id, replayed
            ),
            Discrepancy::PoolBalance { replayed, stored } => {
                write!(f, "pool is {} but log gives {}", stored, replayed)
            }
            Discrepancy::MemberBalance {
                user_id,
                replayed,
                stored,
            } => write!(
                f,
                "user {} holds {} but log gives {}",
                user_id, stored, replayed
            ),
        }
    }
}

/// Outcome of reconciling one classroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub classroom_id: ClassroomId,
    /// Records replayed
    pub records: usize,
    /// Pool balance rebuilt from the log
    pub replayed_pool: u64,
    /// Sum of member balances rebuilt from the log
    pub replayed_members: u64,
    /// Problems found, empty when clean
    pub discrepancies: Vec<Discrepancy>,
}

impl Reconciliation {
    /// Whether the log and the stored balances agree
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Rebuild a classroom from its log and compare against stored rows.
///
/// `records` must be the classroom's full history in creation order and
/// `roster` its current membership rows.
pub fn replay(
    classroom: &Classroom,
    records: &[TransactionRecord],
    roster: &[MemberBalance],
) -> Reconciliation {
    let mut discrepancies = Vec::new();
    let mut pool: u64 = 0;
    let mut members: BTreeMap<UserId, u64> = BTreeMap::new();
    let mut previous: Option<u64> = None;

    for record in records {
        if let Some(previous) = previous {
            if record.id <= previous {
                discrepancies.push(Discrepancy::OutOfOrder {
                    txn_id: record.id,
                    previous,
                });
            }
        }
        previous = Some(record.id);

        if record.amount == 0 {
            discrepancies.push(Discrepancy::ZeroAmount { txn_id: record.id });
        }

        if record.kind == TransactionKind::Adjustment {
            let delta = pool.abs_diff(record.pool_after);
            if delta != record.amount {
                discrepancies.push(Discrepancy::AdjustmentDelta {
                    txn_id: record.id,
                    replayed: delta,
                    recorded: record.amount,
                });
            }
            // An adjustment overwrites the pool, so its snapshot is the state
            pool = record.pool_after;
            continue;
        }

        let member = members.entry(record.user_id).or_insert(0);
        let applied = match record.kind {
            TransactionKind::Assignment => pool
                .checked_sub(record.amount)
                .zip(member.checked_add(record.amount)),
            TransactionKind::Return | TransactionKind::Reclaim => member
                .checked_sub(record.amount)
                .and_then(|m| Some((pool.checked_add(record.amount)?, m))),
            TransactionKind::Adjustment => continue,
        };

        match applied {
            Some((new_pool, new_member)) => {
                pool = new_pool;
                *member = new_member;
            }
            None => {
                discrepancies.push(Discrepancy::Underflow { txn_id: record.id });
                // Resync on the recorded snapshot so one bad record is
                // reported once
                pool = record.pool_after;
                if let Some(recorded) = record.member_after {
                    *member = recorded;
                }
                continue;
            }
        }

        if pool != record.pool_after {
            discrepancies.push(Discrepancy::PoolSnapshot {
                txn_id: record.id,
                replayed: pool,
                recorded: record.pool_after,
            });
            pool = record.pool_after;
        }

        if record.member_after != Some(*member) {
            discrepancies.push(Discrepancy::MemberSnapshot {
                txn_id: record.id,
                user_id: record.user_id,
                replayed: *member,
                recorded: record.member_after,
            });
            if let Some(recorded) = record.member_after {
                *member = recorded;
            }
        }
    }

    if pool != classroom.pool_balance {
        discrepancies.push(Discrepancy::PoolBalance {
            replayed: pool,
            stored: classroom.pool_balance,
        });
    }

    // A departed member has no row and must replay to zero
    let mut stored: BTreeMap<UserId, u64> =
        roster.iter().map(|m| (m.user_id, m.balance)).collect();
    for (user_id, replayed) in &members {
        let stored = stored.remove(user_id).unwrap_or(0);
        if *replayed != stored {
            discrepancies.push(Discrepancy::MemberBalance {
                user_id: *user_id,
                replayed: *replayed,
                stored,
            });
        }
    }
    for (user_id, stored) in stored {
        if stored != 0 {
            discrepancies.push(Discrepancy::MemberBalance {
                user_id,
                replayed: 0,
                stored,
            });
        }
    }

    Reconciliation {
        classroom_id: classroom.id,
        records: records.len(),
        replayed_pool: pool,
        replayed_members: members.values().sum(),
        discrepancies,
    }
}
