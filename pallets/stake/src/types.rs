//! Storage records of the staking ledger.

use codec::{Decode, Encode, MaxEncodedLen};
use frame_support::{pallet_prelude::RuntimeDebug, traits::Get, BoundedVec};
use scale_info::TypeInfo;
use sp_core::U256;
use sp_runtime::traits::Zero;
use stake_primitives::PoolWeight;

/// Asset a pool accepts as stake.
///
/// Pool 0 is pinned to `Native`, every other pool to `Fungible`.
#[derive(Clone, Encode, Decode, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
pub enum StakeAsset<AssetId> {
    Native,
    Fungible(AssetId),
}

impl<AssetId> StakeAsset<AssetId> {
    pub fn is_native(&self) -> bool {
        matches!(self, StakeAsset::Native)
    }
}

/// One staking pool.
#[derive(Clone, Encode, Decode, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
pub struct PoolInfo<AssetId, Balance, BlockNumber> {
    /// Asset staked into this pool. Never changes after creation.
    pub stake_asset: StakeAsset<AssetId>,
    /// Share of the global reward rate.
    pub weight: PoolWeight,
    /// Block at which `acc_reward_per_stake` was last brought current.
    pub last_reward_block: BlockNumber,
    /// Reward per staked unit since creation, scaled by `PRECISION`.
    pub acc_reward_per_stake: U256,
    /// Sum of every staker's `amount`.
    pub total_staked: Balance,
    pub min_deposit: Balance,
    /// Blocks an unstaked amount waits before it can be withdrawn.
    pub unstake_locked_blocks: BlockNumber,
}

/// Principal earmarked by an unstake, withdrawable from `unlock_block` on.
#[derive(Clone, Encode, Decode, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
pub struct WithdrawRequest<Balance, BlockNumber> {
    pub amount: Balance,
    pub unlock_block: BlockNumber,
}

/// Per (pool, account) accounting state.
#[derive(Clone, Encode, Decode, PartialEq, Eq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
#[codec(mel_bound(skip_type_params(MaxRequests)))]
#[scale_info(skip_type_params(MaxRequests))]
pub struct UserStake<Balance, BlockNumber, MaxRequests: Get<u32>> {
    /// Balance currently earning rewards.
    pub amount: Balance,
    /// `amount * acc_reward_per_stake / PRECISION` at the last settlement.
    pub finished_reward: Balance,
    /// Accrued and not yet claimed.
    pub pending_reward: Balance,
    pub withdraw_requests: BoundedVec<WithdrawRequest<Balance, BlockNumber>, MaxRequests>,
}

impl<Balance: Zero, BlockNumber, MaxRequests: Get<u32>> Default
    for UserStake<Balance, BlockNumber, MaxRequests>
{
    fn default() -> Self {
        Self {
            amount: Zero::zero(),
            finished_reward: Zero::zero(),
            pending_reward: Zero::zero(),
            withdraw_requests: BoundedVec::default(),
        }
    }
}

impl<Balance, BlockNumber, MaxRequests> UserStake<Balance, BlockNumber, MaxRequests>
where
    Balance: Copy + Zero + sp_runtime::traits::Saturating,
    BlockNumber: PartialOrd + Copy,
    MaxRequests: Get<u32>,
{
    /// `(total requested, unlocked at block now)` over all open requests.
    pub fn withdraw_amounts(&self, now: BlockNumber) -> (Balance, Balance) {
        self.withdraw_requests.iter().fold(
            (Zero::zero(), Zero::zero()),
            |(requested, unlocked): (Balance, Balance), r| {
                let unlocked = if r.unlock_block <= now {
                    unlocked.saturating_add(r.amount)
                } else {
                    unlocked
                };
                (requested.saturating_add(r.amount), unlocked)
            },
        )
    }

    /// Removes every request unlocked at `now` and returns their sum.
    /// Requests are never split.
    pub fn take_unlocked(&mut self, now: BlockNumber) -> Balance {
        let mut total: Balance = Zero::zero();
        self.withdraw_requests.retain(|r| {
            if r.unlock_block <= now {
                total = total.saturating_add(r.amount);
                false
            } else {
                true
            }
        });
        total
    }
}
