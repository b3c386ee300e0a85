//! Transaction engine module.

pub mod engine;
pub mod traits;
pub mod transactor;

pub use engine::{TransactionOutcome, TransactionSpec, transact};
pub use traits::{Channel, ChannelError, TransactionError};
pub use transactor::{TransactionSettings, Transactor};
