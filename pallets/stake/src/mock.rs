use crate as pallet_stake;
use frame_support::{
    derive_impl, ord_parameter_types, parameter_types,
    traits::{AsEnsureOriginWithArg, ConstU128, ConstU32},
    PalletId,
};
use frame_system::{EnsureRoot, EnsureSigned, EnsureSignedBy};
use sp_runtime::{traits::IdentityLookup, BuildStorage};

type Block = frame_system::mocking::MockBlock<Test>;

pub type AccountId = u64;
pub type Balance = u128;

pub const UNIT: Balance = 1_000_000_000_000_000_000;

pub const ALICE: AccountId = 1;
pub const BOB: AccountId = 2;
pub const CHARLIE: AccountId = 3;
/// Holds barely any native coin.
pub const DAVE: AccountId = 4;
pub const ADMIN: AccountId = 9;

pub const REWARD_ASSET: u32 = 10;
pub const STAKE_ASSET: u32 = 20;

pub const INITIAL_BALANCE: Balance = 1_000 * UNIT;
pub const REWARD_FUNDS: Balance = 1_000_000 * UNIT;

frame_support::construct_runtime!(
    pub enum Test {
        System: frame_system,
        Balances: pallet_balances,
        Assets: pallet_assets,
        Stake: pallet_stake,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type Block = Block;
    type AccountId = AccountId;
    type Lookup = IdentityLookup<Self::AccountId>;
    type AccountData = pallet_balances::AccountData<Balance>;
}

#[derive_impl(pallet_balances::config_preludes::TestDefaultConfig)]
impl pallet_balances::Config for Test {
    type Balance = Balance;
    type ExistentialDeposit = ExistentialDeposit;
    type AccountStore = System;
}

impl pallet_assets::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type Balance = Balance;
    type RemoveItemsLimit = ConstU32<1000>;
    type AssetId = u32;
    type AssetIdParameter = u32;
    type Currency = Balances;
    type CreateOrigin = AsEnsureOriginWithArg<EnsureSigned<AccountId>>;
    type ForceOrigin = EnsureRoot<AccountId>;
    type AssetDeposit = ConstU128<1>;
    type AssetAccountDeposit = ConstU128<1>;
    type MetadataDepositBase = ConstU128<1>;
    type MetadataDepositPerByte = ConstU128<1>;
    type ApprovalDeposit = ConstU128<1>;
    type StringLimit = ConstU32<50>;
    type Freezer = ();
    type Extra = ();
    type CallbackHandle = ();
    type WeightInfo = ();
}

parameter_types! {
    pub static ExistentialDeposit: Balance = 1;
    pub const StakePalletId: PalletId = PalletId(*b"py/stake");
}

ord_parameter_types! {
    pub const Admin: AccountId = ADMIN;
}

impl pallet_stake::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type Currency = Balances;
    type Assets = Assets;
    type AdminOrigin = EnsureSignedBy<Admin, AccountId>;
    type PalletId = StakePalletId;
    type MaxWithdrawRequests = ConstU32<8>;
}

pub struct ExtBuilder {
    reward_funds: Balance,
    existential_deposit: Balance,
}

impl Default for ExtBuilder {
    fn default() -> Self {
        Self { reward_funds: REWARD_FUNDS, existential_deposit: 1 }
    }
}

impl ExtBuilder {
    /// Reward tokens held by the pallet account at genesis.
    pub fn reward_funds(mut self, amount: Balance) -> Self {
        self.reward_funds = amount;
        self
    }

    pub fn existential_deposit(mut self, amount: Balance) -> Self {
        self.existential_deposit = amount;
        self
    }

    pub fn build(self) -> sp_io::TestExternalities {
        ExistentialDeposit::set(self.existential_deposit);
        let mut t = frame_system::GenesisConfig::<Test>::default().build_storage().unwrap();
        let pallet_account = Stake::account_id();

        pallet_balances::GenesisConfig::<Test> {
            balances: vec![
                (ALICE, INITIAL_BALANCE),
                (BOB, INITIAL_BALANCE),
                (CHARLIE, INITIAL_BALANCE),
                (DAVE, UNIT),
                (ADMIN, INITIAL_BALANCE),
                (pallet_account, self.existential_deposit),
            ],
            ..Default::default()
        }
        .assimilate_storage(&mut t)
        .unwrap();

        let mut accounts = vec![
            (STAKE_ASSET, ALICE, INITIAL_BALANCE),
            (STAKE_ASSET, BOB, INITIAL_BALANCE),
            (STAKE_ASSET, CHARLIE, INITIAL_BALANCE),
            (STAKE_ASSET, pallet_account, 1),
        ];
        if self.reward_funds > 0 {
            accounts.push((REWARD_ASSET, pallet_account, self.reward_funds));
        }
        pallet_assets::GenesisConfig::<Test> {
            assets: vec![(REWARD_ASSET, ADMIN, true, 1), (STAKE_ASSET, ADMIN, true, 1)],
            metadata: vec![],
            accounts,
            ..Default::default()
        }
        .assimilate_storage(&mut t)
        .unwrap();

        let mut ext = sp_io::TestExternalities::new(t);
        ext.execute_with(|| System::set_block_number(1));
        ext
    }
}

pub fn new_test_ext() -> sp_io::TestExternalities {
    ExtBuilder::default().build()
}

pub fn run_to_block(n: u64) {
    System::set_block_number(n);
}

pub fn reward_balance(who: AccountId) -> Balance {
    Assets::balance(REWARD_ASSET, who)
}

pub fn stake_asset_balance(who: AccountId) -> Balance {
    Assets::balance(STAKE_ASSET, who)
}
