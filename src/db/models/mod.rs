#![allow(unused_imports)]

//! Database models split into separate files.

pub mod booking;
pub mod event;
pub mod google_token;
pub mod user;

// Re-export all types at the `crate::db::models` namespace.
pub use self::booking::*;
pub use self::event::*;
pub use self::google_token::*;
pub use self::user::*;
