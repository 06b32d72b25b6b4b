//! Stake Core Primitives
//!
//! Scalar types and the block-reward math shared by the staking pallet.
//! Every routine is exact integer arithmetic: products are taken in U256,
//! divisions truncate toward zero, overflow is reported as `None`.

#![cfg_attr(not(feature = "std"), no_std)]

pub use sp_core::U256;

pub type Balance = u128;
pub type BlockNumber = u64;
pub type PoolId = u32;
pub type PoolWeight = u64;

/// Fixed-point scale of the per-stake accumulator (10^18)
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Pool 0 always stakes the native coin
pub const NATIVE_POOL_ID: PoolId = 0;

/// Number of reward-eligible blocks in `[from, to)` clipped to the
/// `[start, end]` reward window. Zero when the ranges do not overlap.
pub fn eligible_blocks(from: BlockNumber, to: BlockNumber, start: BlockNumber, end: BlockNumber) -> BlockNumber {
    let from = from.max(start);
    let to = to.min(end);
    to.saturating_sub(from)
}

/// Share of the global emission earned by one pool over `blocks`.
///
/// `blocks * reward_per_block * weight / total_weight`, truncated.
/// A zero denominator yields zero.
pub fn pool_reward(
    blocks: BlockNumber,
    reward_per_block: Balance,
    weight: PoolWeight,
    total_weight: PoolWeight,
) -> Option<U256> {
    if total_weight == 0 {
        return Some(U256::zero());
    }
    U256::from(blocks)
        .checked_mul(U256::from(reward_per_block))?
        .checked_mul(U256::from(weight))?
        .checked_div(U256::from(total_weight))
}

/// Advances an accumulator by `reward` spread over `total_staked` units.
/// An empty pool leaves the accumulator untouched.
pub fn accumulate(acc: U256, reward: U256, total_staked: Balance) -> Option<U256> {
    if total_staked == 0 {
        return Some(acc);
    }
    let per_stake = reward
        .checked_mul(U256::from(PRECISION))?
        .checked_div(U256::from(total_staked))?;
    acc.checked_add(per_stake)
}

/// `amount * acc / PRECISION`: reward attributable to `amount` under an
/// accumulator value. Used both for the checkpoint and for the owed delta.
pub fn accrued(amount: Balance, acc: U256) -> Option<Balance> {
    let value = U256::from(amount)
        .checked_mul(acc)?
        .checked_div(U256::from(PRECISION))?;
    to_balance(value)
}

/// Narrows a U256 into a `Balance`, failing instead of truncating.
pub fn to_balance(value: U256) -> Option<Balance> {
    if value.bits() > 128 {
        None
    } else {
        Some(value.low_u128())
    }
}
