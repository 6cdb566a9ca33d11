//! Repository layer — entity-scoped database operations.
//!
//! Plain functions over a borrowed `Connection`; business rules
//! (permissions, derivation, caching) live one layer up in
//! [`crate::medications`].

mod dose;
mod medication;

pub use dose::*;
pub use medication::*;
