//! Database collaborators.
//!
//! The agent only sees [`sqlchat_agent::Database`]; [`mysql::MySqlDatabase`]
//! is the production implementation.

pub mod mysql;

pub use mysql::MySqlDatabase;
