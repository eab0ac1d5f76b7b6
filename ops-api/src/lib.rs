//! Error taxonomy and small wire-level primitives shared across the
//! operations plane. Every crate in this workspace converts library errors
//! (`rusqlite::Error`, `std::io::Error`, ...) into [`Error`] at its own
//! boundary rather than propagating a foreign error type across a crate.

use thiserror::Error;

pub mod sanitize;
pub mod session;

pub use sanitize::is_command_safe;
pub use session::SessionIndex;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("rcon transport failed: {0}")]
    TransientTransport(String),

    #[error("player is not online")]
    PlayerNotOnline,

    #[error("rendered rcon command contained a rejected character")]
    SanitizationRejected,

    #[error("wallet balance would go negative")]
    InsufficientFunds,

    #[error("listing is not active")]
    ListingNotActive,

    #[error("game database is unavailable: {0}")]
    DbUnavailable(String),

    #[error("buyer already holds a stack of this item")]
    StackCollision,

    #[error("withdrawal is pending manual review")]
    Pending,

    #[error("registry storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed item data blob: {0}")]
    MalformedBlob(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
