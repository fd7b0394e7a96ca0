//! Conditional balance mutation
//!
//! Both store backends run these inside their own transaction boundary
//! (a RocksDB transaction holding row locks, or the in-memory mutex). The
//! debit is conditional and always attempted before the credit, so a failed
//! debit leaves both rows untouched and nothing needs compensating.

use crate::{types::Direction, Error, Result};

/// Decrement `balance` by `amount` only if it covers the amount.
///
/// Returns the number of rows changed (0 or 1), mirroring
/// `UPDATE .. SET balance = balance - $1 WHERE balance >= $1`.
pub fn conditional_debit(balance: &mut u64, amount: u64) -> usize {
    match balance.checked_sub(amount) {
        Some(remaining) => {
            *balance = remaining;
            1
        }
        None => 0,
    }
}

/// Increment `balance` by `amount`
pub fn credit(balance: &mut u64, amount: u64) -> Result<()> {
    *balance = balance
        .checked_add(amount)
        .ok_or_else(|| Error::InvalidArgument(format!("Credit of {} overflows balance", amount)))?;
    Ok(())
}

/// Move `amount` between a pool and a member balance.
///
/// On error neither balance has been modified.
pub fn apply_transfer(
    direction: Direction,
    pool: &mut u64,
    member: &mut u64,
    amount: u64,
) -> Result<()> {
    let (from, to) = match direction {
        Direction::Assign => (pool, member),
        Direction::Return => (member, pool),
    };

    // Check the credit side first so an overflow can't strand a debit
    to.checked_add(amount)
        .ok_or_else(|| Error::InvalidArgument(format!("Credit of {} overflows balance", amount)))?;

    let available = *from;
    if conditional_debit(from, amount) == 0 {
        return Err(Error::InsufficientBalance {
            required: amount,
            available,
        });
    }
    credit(to, amount)
}

/// Sweep a departing member's whole balance back into the pool.
///
/// Returns the reclaimed amount; zero means nothing moved.
pub fn reclaim(pool: &mut u64, member: &mut u64) -> Result<u64> {
    let amount = *member;
    if amount == 0 {
        return Ok(0);
    }
    apply_transfer(Direction::Return, pool, member, amount)?;
    Ok(amount)
}

/// Absolute delta of an administrative pool reset, `None` for a no-op
pub fn adjustment_delta(current: u64, target: u64) -> Option<u64> {
    (current != target).then(|| current.abs_diff(target))
}

/// Check that a pool of `target` plus every member balance fits in a `u64`.
///
/// Reclaiming a member credits the pool with their whole balance, so this
/// bound keeps every later transfer and reclaim free of overflow.
pub fn check_pool_capacity<I>(target: u64, balances: I) -> Result<()>
where
    I: IntoIterator<Item = u64>,
{
    balances
        .into_iter()
        .try_fold(target, u64::checked_add)
        .map(|_| ())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Pool of {} would overflow the classroom total",
                target
            ))
        })
}
