//! Request handlers.

pub mod events;
pub mod health;

pub use events::*;
pub use health::*;
