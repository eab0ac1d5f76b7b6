mod desk;
mod guildsync;
mod reward;
mod tick;

pub use desk::RegistrationDesk;
pub use guildsync::GuildSyncConsumer;
pub use reward::{RewardConsumer, RewardProfile};
pub use tick::{StatusServer, StatusTick};
