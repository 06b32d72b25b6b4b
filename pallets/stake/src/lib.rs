//! # Stake Pallet
//!
//! Weighted multi-pool staking with block rewards:
//! - Pool 0 stakes the native coin, every later pool stakes one fungible asset
//! - `RewardPerBlock` is split across pools by weight inside `[StartBlock, EndBlock]`
//! - Each pool keeps a reward-per-stake accumulator scaled by `PRECISION`
//! - Unstaked principal sits in a time lock before it can be withdrawn
//!
//! Every call that touches balances settles the target pool and the caller
//! first, then mutates accounting, then moves tokens. A failing call leaves
//! storage untouched, settlement included.
//!
//! Changing `RewardPerBlock`, `StartBlock` or `EndBlock` does not settle the
//! pools: the new values apply to the whole unsettled interval of every pool.
//! Call `mass_update_pools` first for an exact cutover.
//!
//! The pallet account must be endowed with the native existential deposit
//! and the minimum balance of every asset it holds. Payouts keep that
//! endowment in place so the account is never reaped while it owes funds.

#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

pub mod types;

#[cfg(test)]
mod mock;

const LOG_TARGET: &str = "runtime::stake";

#[frame_support::pallet]
pub mod pallet {
    use crate::{
        types::{PoolInfo, StakeAsset, UserStake, WithdrawRequest},
        LOG_TARGET,
    };
    use frame_support::{
        pallet_prelude::*,
        traits::{fungibles, tokens::Preservation, Currency, ExistenceRequirement},
        PalletId,
    };
    use frame_system::pallet_prelude::*;
    use sp_core::U256;
    use sp_runtime::traits::{
        AccountIdConversion, CheckedAdd, CheckedSub, SaturatedConversion, Saturating, Zero,
    };
    use stake_primitives::{self as math, BlockNumber, PoolId, PoolWeight, NATIVE_POOL_ID};

    pub type BalanceOf<T> =
        <<T as Config>::Currency as Currency<<T as frame_system::Config>::AccountId>>::Balance;
    pub type AssetIdOf<T> = <<T as Config>::Assets as fungibles::Inspect<
        <T as frame_system::Config>::AccountId,
    >>::AssetId;
    pub type StakeAssetOf<T> = StakeAsset<AssetIdOf<T>>;
    pub type PoolInfoOf<T> = PoolInfo<AssetIdOf<T>, BalanceOf<T>, BlockNumberFor<T>>;
    pub type UserStakeOf<T> =
        UserStake<BalanceOf<T>, BlockNumberFor<T>, <T as Config>::MaxWithdrawRequests>;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Native coin, staked in pool 0.
        type Currency: Currency<Self::AccountId>;

        /// Fungible assets staked in pools 1.. and paid out as reward.
        type Assets: fungibles::Mutate<Self::AccountId, Balance = BalanceOf<Self>>;

        /// Origin allowed to create pools and change reward parameters.
        type AdminOrigin: EnsureOrigin<Self::RuntimeOrigin>;

        /// Owner of the account holding staked principal and reward funds.
        #[pallet::constant]
        type PalletId: Get<PalletId>;

        /// Open withdraw requests per staker per pool.
        #[pallet::constant]
        type MaxWithdrawRequests: Get<u32>;
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    /// Asset paid out as reward. Set once by `initialize`.
    #[pallet::storage]
    #[pallet::getter(fn reward_asset)]
    pub type RewardAsset<T: Config> = StorageValue<_, AssetIdOf<T>, OptionQuery>;

    /// Reward emitted per block, shared by all pools.
    #[pallet::storage]
    #[pallet::getter(fn reward_per_block)]
    pub type RewardPerBlock<T: Config> = StorageValue<_, BalanceOf<T>, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn start_block)]
    pub type StartBlock<T: Config> = StorageValue<_, BlockNumberFor<T>, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn end_block)]
    pub type EndBlock<T: Config> = StorageValue<_, BlockNumberFor<T>, ValueQuery>;

    /// Sum of all pool weights.
    #[pallet::storage]
    #[pallet::getter(fn total_pool_weight)]
    pub type TotalPoolWeight<T: Config> = StorageValue<_, PoolWeight, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn withdraw_paused)]
    pub type WithdrawPaused<T: Config> = StorageValue<_, bool, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn claim_paused)]
    pub type ClaimPaused<T: Config> = StorageValue<_, bool, ValueQuery>;

    /// Number of pools; also the id of the next pool.
    #[pallet::storage]
    #[pallet::getter(fn pool_count)]
    pub type PoolCount<T: Config> = StorageValue<_, PoolId, ValueQuery>;

    #[pallet::storage]
    #[pallet::getter(fn pool_info)]
    pub type Pools<T: Config> = StorageMap<_, Twox64Concat, PoolId, PoolInfoOf<T>, OptionQuery>;

    /// Per (pool, staker) accounting. Kept at zero balance.
    #[pallet::storage]
    #[pallet::getter(fn user_info)]
    pub type Stakers<T: Config> = StorageDoubleMap<
        _,
        Twox64Concat,
        PoolId,
        Blake2_128Concat,
        T::AccountId,
        UserStakeOf<T>,
        ValueQuery,
    >;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// Reward schedule configured
        Initialized {
            reward_asset: AssetIdOf<T>,
            start_block: BlockNumberFor<T>,
            end_block: BlockNumberFor<T>,
            reward_per_block: BalanceOf<T>,
        },
        PoolCreated {
            pool_id: PoolId,
            stake_asset: StakeAssetOf<T>,
            weight: PoolWeight,
            min_deposit: BalanceOf<T>,
            unstake_locked_blocks: BlockNumberFor<T>,
        },
        PoolUpdated {
            pool_id: PoolId,
            min_deposit: BalanceOf<T>,
            unstake_locked_blocks: BlockNumberFor<T>,
        },
        PoolWeightSet { pool_id: PoolId, weight: PoolWeight, total_weight: PoolWeight },
        RewardPerBlockSet { reward_per_block: BalanceOf<T> },
        StartBlockSet { start_block: BlockNumberFor<T> },
        EndBlockSet { end_block: BlockNumberFor<T> },
        WithdrawPauseSet { paused: bool },
        ClaimPauseSet { paused: bool },
        /// Pool accumulator advanced
        PoolSettled {
            pool_id: PoolId,
            last_reward_block: BlockNumberFor<T>,
            acc_reward_per_stake: U256,
        },
        Deposited { who: T::AccountId, pool_id: PoolId, amount: BalanceOf<T> },
        UnstakeRequested {
            who: T::AccountId,
            pool_id: PoolId,
            amount: BalanceOf<T>,
            unlock_block: BlockNumberFor<T>,
        },
        Withdrawn { who: T::AccountId, pool_id: PoolId, amount: BalanceOf<T> },
        RewardClaimed { who: T::AccountId, pool_id: PoolId, amount: BalanceOf<T> },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// Deposit below the pool minimum
        DepositTooSmall,
        /// Unstake exceeds the staked balance
        InsufficientStake,
        /// Caller is not the admin
        Unauthorized,
        /// Withdraw or claim is paused
        ActionPaused,
        /// Token movement failed
        TransferFailed,
        /// Pool asset, weight or reward window is invalid
        InvalidPoolConfiguration,
        /// `initialize` has not been called
        NotInitialized,
        /// `initialize` was already called
        AlreadyInitialized,
        PoolNotFound,
        /// Native pool deposited through the asset path
        AssetMismatch,
        /// Pause flag already has the requested value
        PauseStateUnchanged,
        /// Staker has too many open withdraw requests in this pool
        TooManyWithdrawRequests,
        /// Arithmetic overflow
        ArithmeticOverflow,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Set the reward asset and the initial reward schedule. Admin only, once.
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(20_000_000, 0))]
        pub fn initialize(
            origin: OriginFor<T>,
            reward_asset: AssetIdOf<T>,
            start_block: BlockNumberFor<T>,
            end_block: BlockNumberFor<T>,
            reward_per_block: BalanceOf<T>,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            ensure!(RewardAsset::<T>::get().is_none(), Error::<T>::AlreadyInitialized);
            ensure!(start_block < end_block, Error::<T>::InvalidPoolConfiguration);

            RewardAsset::<T>::put(reward_asset.clone());
            StartBlock::<T>::put(start_block);
            EndBlock::<T>::put(end_block);
            RewardPerBlock::<T>::put(reward_per_block);
            frame_system::Pallet::<T>::inc_providers(&Self::account_id());

            log::info!(
                target: LOG_TARGET,
                "reward schedule set: {:?} per block over [{:?}, {:?}]",
                reward_per_block,
                start_block,
                end_block
            );

            Self::deposit_event(Event::Initialized {
                reward_asset,
                start_block,
                end_block,
                reward_per_block,
            });
            Ok(())
        }

        /// Append a pool. Pool 0 must stake the native coin, later pools a fungible asset.
        ///
        /// With `with_update` every existing pool is settled under the old
        /// weight split before the new weight is added.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(50_000_000, 0))]
        pub fn create_pool(
            origin: OriginFor<T>,
            stake_asset: StakeAssetOf<T>,
            weight: PoolWeight,
            min_deposit: BalanceOf<T>,
            unstake_locked_blocks: BlockNumberFor<T>,
            with_update: bool,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::ensure_initialized()?;
            ensure!(weight > 0, Error::<T>::InvalidPoolConfiguration);

            let pool_id = PoolCount::<T>::get();
            ensure!(
                (pool_id == NATIVE_POOL_ID) == stake_asset.is_native(),
                Error::<T>::InvalidPoolConfiguration
            );
            let next_id = pool_id.checked_add(1).ok_or(Error::<T>::ArithmeticOverflow)?;
            let total_weight = TotalPoolWeight::<T>::get()
                .checked_add(weight)
                .ok_or(Error::<T>::ArithmeticOverflow)?;

            if with_update {
                Self::settle_all()?;
            }

            let pool = PoolInfo {
                stake_asset: stake_asset.clone(),
                weight,
                last_reward_block: Self::now().max(StartBlock::<T>::get()),
                acc_reward_per_stake: U256::zero(),
                total_staked: Zero::zero(),
                min_deposit,
                unstake_locked_blocks,
            };
            Pools::<T>::insert(pool_id, pool);
            PoolCount::<T>::put(next_id);
            TotalPoolWeight::<T>::put(total_weight);

            log::info!(
                target: LOG_TARGET,
                "pool {} created for {:?}, weight {} of {}",
                pool_id,
                stake_asset,
                weight,
                total_weight
            );

            Self::deposit_event(Event::PoolCreated {
                pool_id,
                stake_asset,
                weight,
                min_deposit,
                unstake_locked_blocks,
            });
            Ok(())
        }

        /// Change a pool's deposit floor and unstake lock length.
        #[pallet::call_index(2)]
        #[pallet::weight(Weight::from_parts(20_000_000, 0))]
        pub fn update_pool(
            origin: OriginFor<T>,
            pool_id: PoolId,
            min_deposit: BalanceOf<T>,
            unstake_locked_blocks: BlockNumberFor<T>,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Pools::<T>::try_mutate(pool_id, |maybe_pool| -> DispatchResult {
                let pool = maybe_pool.as_mut().ok_or(Error::<T>::PoolNotFound)?;
                pool.min_deposit = min_deposit;
                pool.unstake_locked_blocks = unstake_locked_blocks;
                Ok(())
            })?;

            Self::deposit_event(Event::PoolUpdated { pool_id, min_deposit, unstake_locked_blocks });
            Ok(())
        }

        /// Change a pool's weight, optionally settling all pools first.
        #[pallet::call_index(3)]
        #[pallet::weight(Weight::from_parts(50_000_000, 0))]
        pub fn set_pool_weight(
            origin: OriginFor<T>,
            pool_id: PoolId,
            weight: PoolWeight,
            with_update: bool,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            ensure!(weight > 0, Error::<T>::InvalidPoolConfiguration);
            let old_weight = Pools::<T>::get(pool_id).ok_or(Error::<T>::PoolNotFound)?.weight;

            if with_update {
                Self::settle_all()?;
            }

            let total_weight = TotalPoolWeight::<T>::get()
                .checked_sub(old_weight)
                .and_then(|w| w.checked_add(weight))
                .ok_or(Error::<T>::ArithmeticOverflow)?;
            Pools::<T>::mutate(pool_id, |maybe_pool| {
                if let Some(pool) = maybe_pool {
                    pool.weight = weight;
                }
            });
            TotalPoolWeight::<T>::put(total_weight);

            log::info!(
                target: LOG_TARGET,
                "pool {} weight {} -> {}, total {}",
                pool_id,
                old_weight,
                weight,
                total_weight
            );

            Self::deposit_event(Event::PoolWeightSet { pool_id, weight, total_weight });
            Ok(())
        }

        /// Change the global reward rate. Pools are not settled.
        #[pallet::call_index(4)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn set_reward_per_block(
            origin: OriginFor<T>,
            reward_per_block: BalanceOf<T>,
        ) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::ensure_initialized()?;
            RewardPerBlock::<T>::put(reward_per_block);

            log::info!(target: LOG_TARGET, "reward per block set to {:?}", reward_per_block);

            Self::deposit_event(Event::RewardPerBlockSet { reward_per_block });
            Ok(())
        }

        #[pallet::call_index(5)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn set_start_block(origin: OriginFor<T>, start_block: BlockNumberFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::ensure_initialized()?;
            ensure!(start_block < EndBlock::<T>::get(), Error::<T>::InvalidPoolConfiguration);
            StartBlock::<T>::put(start_block);

            log::info!(target: LOG_TARGET, "start block set to {:?}", start_block);

            Self::deposit_event(Event::StartBlockSet { start_block });
            Ok(())
        }

        #[pallet::call_index(6)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn set_end_block(origin: OriginFor<T>, end_block: BlockNumberFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::ensure_initialized()?;
            ensure!(StartBlock::<T>::get() < end_block, Error::<T>::InvalidPoolConfiguration);
            EndBlock::<T>::put(end_block);

            log::info!(target: LOG_TARGET, "end block set to {:?}", end_block);

            Self::deposit_event(Event::EndBlockSet { end_block });
            Ok(())
        }

        #[pallet::call_index(7)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn pause_withdraw(origin: OriginFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::set_withdraw_paused(true)
        }

        #[pallet::call_index(8)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn unpause_withdraw(origin: OriginFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::set_withdraw_paused(false)
        }

        #[pallet::call_index(9)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn pause_claim(origin: OriginFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::set_claim_paused(true)
        }

        #[pallet::call_index(10)]
        #[pallet::weight(Weight::from_parts(10_000_000, 0))]
        pub fn unpause_claim(origin: OriginFor<T>) -> DispatchResult {
            Self::ensure_admin(origin)?;
            Self::set_claim_paused(false)
        }

        /// Bring one pool's accumulator up to the current block.
        #[pallet::call_index(11)]
        #[pallet::weight(Weight::from_parts(20_000_000, 0))]
        pub fn settle_pool(origin: OriginFor<T>, pool_id: PoolId) -> DispatchResult {
            ensure_signed(origin)?;
            Self::do_settle_pool(pool_id).map(|_| ())
        }

        /// Settle every pool in id order.
        #[pallet::call_index(12)]
        #[pallet::weight(Weight::from_parts(100_000_000, 0))]
        pub fn mass_update_pools(origin: OriginFor<T>) -> DispatchResult {
            ensure_signed(origin)?;
            Self::settle_all()
        }

        /// Stake native coin into pool 0.
        #[pallet::call_index(13)]
        #[pallet::weight(Weight::from_parts(60_000_000, 0))]
        pub fn deposit_native(origin: OriginFor<T>, amount: BalanceOf<T>) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_deposit(who, NATIVE_POOL_ID, amount)
        }

        /// Stake the pool's fungible asset. Pool 0 is rejected.
        #[pallet::call_index(14)]
        #[pallet::weight(Weight::from_parts(60_000_000, 0))]
        pub fn deposit(origin: OriginFor<T>, pool_id: PoolId, amount: BalanceOf<T>) -> DispatchResult {
            let who = ensure_signed(origin)?;
            ensure!(pool_id != NATIVE_POOL_ID, Error::<T>::AssetMismatch);
            Self::do_deposit(who, pool_id, amount)
        }

        /// Stop `amount` from earning and queue it for withdrawal after the
        /// pool's lock. No tokens move.
        #[pallet::call_index(15)]
        #[pallet::weight(Weight::from_parts(60_000_000, 0))]
        pub fn unstake(origin: OriginFor<T>, pool_id: PoolId, amount: BalanceOf<T>) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_unstake(who, pool_id, amount)
        }

        /// Pay out every unlocked withdraw request. Nothing unlocked pays zero.
        #[pallet::call_index(16)]
        #[pallet::weight(Weight::from_parts(60_000_000, 0))]
        pub fn withdraw(origin: OriginFor<T>, pool_id: PoolId) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_withdraw(who, pool_id)
        }

        /// Pay out the caller's pending reward. Zero pending pays zero.
        #[pallet::call_index(17)]
        #[pallet::weight(Weight::from_parts(60_000_000, 0))]
        pub fn claim(origin: OriginFor<T>, pool_id: PoolId) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_claim(who, pool_id)
        }
    }

    impl<T: Config> Pallet<T> {
        /// Account holding staked principal and reward funds
        pub fn account_id() -> T::AccountId {
            T::PalletId::get().into_account_truncating()
        }

        /// Reward the caller would receive if `pool_id` were settled now.
        pub fn pending_reward(
            pool_id: PoolId,
            who: &T::AccountId,
        ) -> Result<BalanceOf<T>, DispatchError> {
            let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::PoolNotFound)?;
            Self::accrue(&mut pool, Self::now())?;
            let stake = Stakers::<T>::get(pool_id, who);
            let owed = Self::owed(&pool, &stake)?;
            stake.pending_reward.checked_add(&owed).ok_or(Error::<T>::ArithmeticOverflow.into())
        }

        pub fn staked_balance(pool_id: PoolId, who: &T::AccountId) -> BalanceOf<T> {
            Stakers::<T>::get(pool_id, who).amount
        }

        /// `(total requested, withdrawable now)` for a staker.
        pub fn withdraw_amount(pool_id: PoolId, who: &T::AccountId) -> (BalanceOf<T>, BalanceOf<T>) {
            Stakers::<T>::get(pool_id, who).withdraw_amounts(Self::now())
        }

        /// Reward-eligible blocks in `[from, to)` under the current window.
        pub fn eligible_blocks(from: BlockNumberFor<T>, to: BlockNumberFor<T>) -> BlockNumberFor<T> {
            math::eligible_blocks(
                Self::block_u64(from),
                Self::block_u64(to),
                Self::block_u64(StartBlock::<T>::get()),
                Self::block_u64(EndBlock::<T>::get()),
            )
            .saturated_into()
        }

        fn now() -> BlockNumberFor<T> {
            frame_system::Pallet::<T>::block_number()
        }

        fn block_u64(block: BlockNumberFor<T>) -> BlockNumber {
            block.saturated_into::<BlockNumber>()
        }

        fn ensure_admin(origin: OriginFor<T>) -> DispatchResult {
            T::AdminOrigin::ensure_origin(origin).map_err(|_| Error::<T>::Unauthorized)?;
            Ok(())
        }

        fn ensure_initialized() -> Result<AssetIdOf<T>, DispatchError> {
            RewardAsset::<T>::get().ok_or_else(|| Error::<T>::NotInitialized.into())
        }

        fn set_withdraw_paused(paused: bool) -> DispatchResult {
            ensure!(WithdrawPaused::<T>::get() != paused, Error::<T>::PauseStateUnchanged);
            WithdrawPaused::<T>::put(paused);
            log::info!(target: LOG_TARGET, "withdraw paused: {}", paused);
            Self::deposit_event(Event::WithdrawPauseSet { paused });
            Ok(())
        }

        fn set_claim_paused(paused: bool) -> DispatchResult {
            ensure!(ClaimPaused::<T>::get() != paused, Error::<T>::PauseStateUnchanged);
            ClaimPaused::<T>::put(paused);
            log::info!(target: LOG_TARGET, "claim paused: {}", paused);
            Self::deposit_event(Event::ClaimPauseSet { paused });
            Ok(())
        }

        /// Advances `pool` to `now` in memory and returns the reward credited.
        ///
        /// Shared by settlement and the pending-reward projection so both
        /// produce identical numbers.
        fn accrue(pool: &mut PoolInfoOf<T>, now: BlockNumberFor<T>) -> Result<U256, DispatchError> {
            if now <= pool.last_reward_block {
                return Ok(U256::zero());
            }
            if pool.total_staked.is_zero() {
                pool.last_reward_block = now;
                return Ok(U256::zero());
            }

            let blocks = math::eligible_blocks(
                Self::block_u64(pool.last_reward_block),
                Self::block_u64(now),
                Self::block_u64(StartBlock::<T>::get()),
                Self::block_u64(EndBlock::<T>::get()),
            );
            let reward = math::pool_reward(
                blocks,
                RewardPerBlock::<T>::get().saturated_into::<u128>(),
                pool.weight,
                TotalPoolWeight::<T>::get(),
            )
            .ok_or(Error::<T>::ArithmeticOverflow)?;
            pool.acc_reward_per_stake = math::accumulate(
                pool.acc_reward_per_stake,
                reward,
                pool.total_staked.saturated_into::<u128>(),
            )
            .ok_or(Error::<T>::ArithmeticOverflow)?;
            pool.last_reward_block = now;
            Ok(reward)
        }

        fn do_settle_pool(pool_id: PoolId) -> Result<PoolInfoOf<T>, DispatchError> {
            let mut pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::PoolNotFound)?;
            let now = Self::now();
            let reward = Self::accrue(&mut pool, now)?;
            Pools::<T>::insert(pool_id, &pool);

            if !reward.is_zero() {
                log::debug!(
                    target: LOG_TARGET,
                    "pool {} settled at {:?}: +{} reward, acc {}",
                    pool_id,
                    now,
                    reward,
                    pool.acc_reward_per_stake
                );
                Self::deposit_event(Event::PoolSettled {
                    pool_id,
                    last_reward_block: now,
                    acc_reward_per_stake: pool.acc_reward_per_stake,
                });
            }
            Ok(pool)
        }

        fn settle_all() -> DispatchResult {
            for pool_id in 0..PoolCount::<T>::get() {
                Self::do_settle_pool(pool_id)?;
            }
            Ok(())
        }

        /// `amount * acc / PRECISION` in the runtime balance type.
        fn accrued(amount: BalanceOf<T>, acc: U256) -> Result<BalanceOf<T>, DispatchError> {
            let value = math::accrued(amount.saturated_into::<u128>(), acc)
                .ok_or(Error::<T>::ArithmeticOverflow)?;
            BalanceOf::<T>::try_from(value).map_err(|_| Error::<T>::ArithmeticOverflow.into())
        }

        fn owed(pool: &PoolInfoOf<T>, stake: &UserStakeOf<T>) -> Result<BalanceOf<T>, DispatchError> {
            let accrued = Self::accrued(stake.amount, pool.acc_reward_per_stake)?;
            Ok(accrued.saturating_sub(stake.finished_reward))
        }

        /// Moves owed reward into `pending_reward` and resyncs the checkpoint.
        /// `pool` must already be settled.
        fn settle_user(pool: &PoolInfoOf<T>, stake: &mut UserStakeOf<T>) -> DispatchResult {
            let owed = Self::owed(pool, stake)?;
            stake.pending_reward =
                stake.pending_reward.checked_add(&owed).ok_or(Error::<T>::ArithmeticOverflow)?;
            Self::checkpoint(pool, stake)
        }

        fn checkpoint(pool: &PoolInfoOf<T>, stake: &mut UserStakeOf<T>) -> DispatchResult {
            stake.finished_reward = Self::accrued(stake.amount, pool.acc_reward_per_stake)?;
            Ok(())
        }

        fn transfer(
            asset: &StakeAssetOf<T>,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: BalanceOf<T>,
        ) -> DispatchResult {
            if amount.is_zero() {
                return Ok(());
            }
            // payouts never dip into the pallet account's endowment
            let (existence, preservation) = if *from == Self::account_id() {
                (ExistenceRequirement::KeepAlive, Preservation::Preserve)
            } else {
                (ExistenceRequirement::AllowDeath, Preservation::Expendable)
            };
            let result = match asset {
                StakeAsset::Native => <T::Currency as Currency<T::AccountId>>::transfer(
                    from, to, amount, existence,
                ),
                StakeAsset::Fungible(id) => <T::Assets as fungibles::Mutate<T::AccountId>>::transfer(
                    id.clone(),
                    from,
                    to,
                    amount,
                    preservation,
                )
                .map(|_| ()),
            };
            result.map_err(|e| {
                log::warn!(
                    target: LOG_TARGET,
                    "transfer of {:?} {:?} failed: {:?}",
                    amount,
                    asset,
                    e
                );
                Error::<T>::TransferFailed.into()
            })
        }

        fn do_deposit(who: T::AccountId, pool_id: PoolId, amount: BalanceOf<T>) -> DispatchResult {
            Self::ensure_initialized()?;
            let pool = Pools::<T>::get(pool_id).ok_or(Error::<T>::PoolNotFound)?;
            ensure!(amount >= pool.min_deposit, Error::<T>::DepositTooSmall);

            let mut pool = Self::do_settle_pool(pool_id)?;
            let mut stake = Stakers::<T>::get(pool_id, &who);
            Self::settle_user(&pool, &mut stake)?;

            stake.amount = stake.amount.checked_add(&amount).ok_or(Error::<T>::ArithmeticOverflow)?;
            pool.total_staked =
                pool.total_staked.checked_add(&amount).ok_or(Error::<T>::ArithmeticOverflow)?;
            Self::checkpoint(&pool, &mut stake)?;

            Pools::<T>::insert(pool_id, &pool);
            Stakers::<T>::insert(pool_id, &who, stake);

            Self::transfer(&pool.stake_asset, &who, &Self::account_id(), amount)?;

            Self::deposit_event(Event::Deposited { who, pool_id, amount });
            Ok(())
        }

        fn do_unstake(who: T::AccountId, pool_id: PoolId, amount: BalanceOf<T>) -> DispatchResult {
            ensure!(Pools::<T>::contains_key(pool_id), Error::<T>::PoolNotFound);
            ensure!(
                amount <= Stakers::<T>::get(pool_id, &who).amount,
                Error::<T>::InsufficientStake
            );

            let mut pool = Self::do_settle_pool(pool_id)?;
            let mut stake = Stakers::<T>::get(pool_id, &who);
            Self::settle_user(&pool, &mut stake)?;

            stake.amount = stake.amount.checked_sub(&amount).ok_or(Error::<T>::InsufficientStake)?;
            pool.total_staked =
                pool.total_staked.checked_sub(&amount).ok_or(Error::<T>::ArithmeticOverflow)?;
            let unlock_block = Self::now().saturating_add(pool.unstake_locked_blocks);
            if !amount.is_zero() {
                stake
                    .withdraw_requests
                    .try_push(WithdrawRequest { amount, unlock_block })
                    .map_err(|_| Error::<T>::TooManyWithdrawRequests)?;
            }
            Self::checkpoint(&pool, &mut stake)?;

            Pools::<T>::insert(pool_id, &pool);
            Stakers::<T>::insert(pool_id, &who, stake);

            Self::deposit_event(Event::UnstakeRequested { who, pool_id, amount, unlock_block });
            Ok(())
        }

        fn do_withdraw(who: T::AccountId, pool_id: PoolId) -> DispatchResult {
            ensure!(!WithdrawPaused::<T>::get(), Error::<T>::ActionPaused);

            let pool = Self::do_settle_pool(pool_id)?;
            let mut stake = Stakers::<T>::get(pool_id, &who);
            Self::settle_user(&pool, &mut stake)?;

            let amount = stake.take_unlocked(Self::now());
            Stakers::<T>::insert(pool_id, &who, stake);

            Self::transfer(&pool.stake_asset, &Self::account_id(), &who, amount)?;

            Self::deposit_event(Event::Withdrawn { who, pool_id, amount });
            Ok(())
        }

        fn do_claim(who: T::AccountId, pool_id: PoolId) -> DispatchResult {
            ensure!(!ClaimPaused::<T>::get(), Error::<T>::ActionPaused);
            let reward_asset = Self::ensure_initialized()?;

            let pool = Self::do_settle_pool(pool_id)?;
            let mut stake = Stakers::<T>::get(pool_id, &who);
            Self::settle_user(&pool, &mut stake)?;

            let amount = sp_std::mem::take(&mut stake.pending_reward);
            Stakers::<T>::insert(pool_id, &who, stake);

            Self::transfer(&StakeAsset::Fungible(reward_asset), &Self::account_id(), &who, amount)?;

            Self::deposit_event(Event::RewardClaimed { who, pool_id, amount });
            Ok(())
        }
    }
}
