//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Non-negative balances by construction (`u64`)
//! - Closed role set, parsed only at the directory boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User identifier (teacher or student)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Create new user ID
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Reject zero and negative ids
    pub fn validate(&self) -> crate::Result<()> {
        if self.0 <= 0 {
            return Err(crate::Error::InvalidArgument(format!(
                "Malformed user id: {}",
                self.0
            )));
        }
        Ok(())
    }

    pub(crate) fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classroom identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassroomId(i64);

impl ClassroomId {
    /// Create new classroom ID
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Reject zero and negative ids
    pub fn validate(&self) -> crate::Result<()> {
        if self.0 <= 0 {
            return Err(crate::Error::InvalidArgument(format!(
                "Malformed classroom id: {}",
                self.0
            )));
        }
        Ok(())
    }

    pub(crate) fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub(crate) fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(Self(i64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for ClassroomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns classrooms and assigns neurons
    Teacher,
    /// Holds neurons inside the classrooms they belong to
    Student,
}

impl Role {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(crate::Error::InvalidArgument(format!(
                "Unrecognized role: {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User ID
    pub id: UserId,
    /// Role
    pub role: Role,
}

/// Classroom with its neuron pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
    /// Classroom ID
    pub id: ClassroomId,

    /// Display name
    pub name: String,

    /// Owning teacher
    pub teacher_id: UserId,

    /// Undistributed neurons
    pub pool_balance: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// One student's holding in one classroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBalance {
    /// Classroom ID
    pub classroom_id: ClassroomId,

    /// Student ID
    pub user_id: UserId,

    /// Neurons held
    pub balance: u64,

    /// Enrollment timestamp
    pub joined_at: DateTime<Utc>,
}

impl MemberBalance {
    /// Fresh membership row with zero balance
    pub fn new(classroom_id: ClassroomId, user_id: UserId) -> Self {
        Self {
            classroom_id,
            user_id,
            balance: 0,
            joined_at: Utc::now(),
        }
    }

    pub(crate) fn key(classroom_id: ClassroomId, user_id: UserId) -> Vec<u8> {
        let mut key = classroom_id.to_key().to_vec();
        key.extend_from_slice(&user_id.to_key());
        key
    }
}

/// Direction of a transfer between pool and member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Pool -> member
    Assign,
    /// Member -> pool
    Return,
}

impl Direction {
    /// Log kind produced by this direction
    pub fn kind(&self) -> TransactionKind {
        match self {
            Direction::Assign => TransactionKind::Assignment,
            Direction::Return => TransactionKind::Return,
        }
    }
}

/// A validated transfer request handed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Direction
    pub direction: Direction,
    /// Classroom whose pool is involved
    pub classroom_id: ClassroomId,
    /// Member whose balance is involved
    pub member_id: UserId,
    /// Strictly positive amount
    pub amount: u64,
}

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionKind {
    /// Teacher moved neurons from pool to student
    Assignment = 1,
    /// Student moved neurons back to pool
    Return = 2,
    /// Balance swept back to pool when a student left
    Reclaim = 3,
    /// Administrative pool reset (outside conservation)
    Adjustment = 4,
}

impl TransactionKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Assignment => "assignment",
            TransactionKind::Return => "return",
            TransactionKind::Reclaim => "reclaim",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// Whether this kind conserves pool + members
    pub fn is_conserving(&self) -> bool {
        !matches!(self, TransactionKind::Adjustment)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record, written once per balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Store-wide increasing ID
    pub id: u64,

    /// Classroom ID
    pub classroom_id: ClassroomId,

    /// Student for transfers and reclaims, acting teacher for adjustments
    pub user_id: UserId,

    /// Strictly positive amount (absolute delta for adjustments)
    pub amount: u64,

    /// Record kind
    pub kind: TransactionKind,

    /// Pool balance after this record applied
    pub pool_after: u64,

    /// Member balance after this record applied (`None` for adjustments)
    pub member_after: Option<u64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub(crate) fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    pub(crate) fn index_key(classroom_id: ClassroomId, id: u64) -> Vec<u8> {
        let mut key = classroom_id.to_key().to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}
