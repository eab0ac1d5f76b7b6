mod frame;
mod traits;
mod types;

pub use frame::EventFrame;
pub use traits::{ChatTransportT, GameDbReaderT, PeriodicJob, RconPoolT, RegistryStoreT};
pub use types::{
    ChatId, Entitlement, ItemDna, Listing, ListingStatus, OrderedFloat, PendingRegistration,
    PlatformId, PlatformIdentity, PlayerHome, PlayerRow, PlaytimeRow, RewardIntervals,
    ServerProfile, Wallet, WithdrawalStatus, WithdrawalTx, PROP_ID_INSTANCE_GUID,
    PROP_ID_SELL_MARK, PROP_ID_STACK_QTY,
};
