//! Database module
//!
//! SQLite persistence for users, provider links, repository sessions and play
//! history, exposed to the rest of the crate through the [`PlayStore`] and
//! [`UserStore`] traits.

mod engine;
mod migrations;
mod store;
pub mod tables;

pub use engine::DbEngine;
pub use migrations::run_migrations;
pub use store::{PlayStore, SqliteStore, UserStore};
