//! In-memory store
//!
//! Implements every store trait over plain collections. One mutex guards the
//! whole state and is the transaction boundary: each operation stages its
//! changes on copies of the rows and writes them back only after every
//! fallible step has passed.

use crate::{
    balance,
    store::{ClassroomAdmin, ClassroomDirectory, LedgerStore, MembershipStore},
    types::{
        Classroom, ClassroomId, MemberBalance, Transfer, TransactionKind, TransactionRecord,
        UserId,
    },
    Error, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
struct State {
    classrooms: BTreeMap<ClassroomId, Classroom>,
    members: BTreeMap<(ClassroomId, UserId), MemberBalance>,
    log: Vec<TransactionRecord>,
    next_classroom_id: i64,
    next_txn_id: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            classrooms: BTreeMap::new(),
            members: BTreeMap::new(),
            log: Vec::new(),
            next_classroom_id: 1,
            next_txn_id: 1,
        }
    }
}

impl State {
    fn classroom(&self, id: ClassroomId) -> Result<&Classroom> {
        self.classrooms
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Classroom {}", id)))
    }

    fn member(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<&MemberBalance> {
        self.members.get(&(classroom_id, user_id)).ok_or_else(|| {
            Error::NotFound(format!(
                "User {} is not a member of classroom {}",
                user_id, classroom_id
            ))
        })
    }

    fn append(
        &mut self,
        classroom: &Classroom,
        user_id: UserId,
        amount: u64,
        kind: TransactionKind,
        member_after: Option<u64>,
    ) -> TransactionRecord {
        let record = TransactionRecord {
            id: self.next_txn_id,
            classroom_id: classroom.id,
            user_id,
            amount,
            kind,
            pool_after: classroom.pool_balance,
            member_after,
            created_at: Utc::now(),
        };
        self.next_txn_id += 1;
        self.log.push(record.clone());
        record
    }
}

/// In-memory implementation of the store traits
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all classrooms
    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }
}

#[async_trait]
impl ClassroomDirectory for MemoryStore {
    async fn classroom(&self, id: ClassroomId) -> Result<Classroom> {
        self.state.lock().classroom(id).cloned()
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn is_member(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .members
            .contains_key(&(classroom_id, user_id)))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn transfer(&self, transfer: &Transfer) -> Result<TransactionRecord> {
        let mut state = self.state.lock();

        let mut classroom = state.classroom(transfer.classroom_id)?.clone();
        let mut member = state
            .member(transfer.classroom_id, transfer.member_id)?
            .clone();

        balance::apply_transfer(
            transfer.direction,
            &mut classroom.pool_balance,
            &mut member.balance,
            transfer.amount,
        )?;

        let record = state.append(
            &classroom,
            member.user_id,
            transfer.amount,
            transfer.direction.kind(),
            Some(member.balance),
        );
        state
            .members
            .insert((member.classroom_id, member.user_id), member);
        state.classrooms.insert(classroom.id, classroom);

        Ok(record)
    }

    async fn member_balance(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<u64>> {
        Ok(self
            .state
            .lock()
            .members
            .get(&(classroom_id, user_id))
            .map(|m| m.balance))
    }

    async fn history(&self, classroom_id: ClassroomId) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .state
            .lock()
            .log
            .iter()
            .filter(|r| r.classroom_id == classroom_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ClassroomAdmin for MemoryStore {
    async fn create_classroom(&self, name: &str, teacher_id: UserId) -> Result<Classroom> {
        let mut state = self.state.lock();
        let classroom = Classroom {
            id: ClassroomId::new(state.next_classroom_id),
            name: name.to_string(),
            teacher_id,
            pool_balance: 0,
            created_at: Utc::now(),
        };
        state.next_classroom_id += 1;
        state.classrooms.insert(classroom.id, classroom.clone());
        Ok(classroom)
    }

    async fn enroll(&self, classroom_id: ClassroomId, user_id: UserId) -> Result<MemberBalance> {
        let mut state = self.state.lock();
        state.classroom(classroom_id)?;

        if state.members.contains_key(&(classroom_id, user_id)) {
            return Err(Error::InvalidArgument(format!(
                "User {} is already a member of classroom {}",
                user_id, classroom_id
            )));
        }

        let member = MemberBalance::new(classroom_id, user_id);
        state
            .members
            .insert((classroom_id, user_id), member.clone());
        Ok(member)
    }

    async fn unenroll(
        &self,
        classroom_id: ClassroomId,
        user_id: UserId,
    ) -> Result<Option<TransactionRecord>> {
        let mut state = self.state.lock();

        let mut classroom = state.classroom(classroom_id)?.clone();
        let mut member = state.member(classroom_id, user_id)?.clone();

        let reclaimed = balance::reclaim(&mut classroom.pool_balance, &mut member.balance)?;
        let record = (reclaimed > 0).then(|| {
            state.append(&classroom, user_id, reclaimed, TransactionKind::Reclaim, Some(0))
        });

        state.members.remove(&(classroom_id, user_id));
        state.classrooms.insert(classroom_id, classroom);
        Ok(record)
    }

    async fn set_pool(
        &self,
        classroom_id: ClassroomId,
        actor_id: UserId,
        neurons: u64,
    ) -> Result<Option<TransactionRecord>> {
        let mut state = self.state.lock();
        let mut classroom = state.classroom(classroom_id)?.clone();

        let Some(delta) = balance::adjustment_delta(classroom.pool_balance, neurons) else {
            return Ok(None);
        };

        balance::check_pool_capacity(
            neurons,
            state
                .members
                .range((classroom_id, UserId::new(i64::MIN))..=(classroom_id, UserId::new(i64::MAX)))
                .map(|(_, m)| m.balance),
        )?;

        classroom.pool_balance = neurons;
        let record = state.append(&classroom, actor_id, delta, TransactionKind::Adjustment, None);
        state.classrooms.insert(classroom_id, classroom);
        Ok(Some(record))
    }

    async fn roster(&self, classroom_id: ClassroomId) -> Result<Vec<MemberBalance>> {
        Ok(self
            .state
            .lock()
            .members
            .range((classroom_id, UserId::new(i64::MIN))..=(classroom_id, UserId::new(i64::MAX)))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn classrooms(&self) -> Result<Vec<Classroom>> {
        Ok(self.state.lock().classrooms.values().cloned().collect())
    }
}
