//! # haruki-store
//!
//! SQLite storage for the Haruki toolbox backend: player documents (suite,
//! mysekai, birthday party), toolbox users and their iOS upload codes, game
//! account bindings with privacy flags, webhook subscriptions, and OAuth2
//! access tokens.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every model.

pub mod bindings;
pub mod database;
pub mod documents;
pub mod migrations;
pub mod models;
pub mod oauth;
pub mod users;
pub mod webhooks;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
