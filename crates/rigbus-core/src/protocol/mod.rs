//! Protocol module - shared constants and reply framing.

pub mod constants;
pub mod reply;

pub use constants::*;
pub use reply::Reply;
