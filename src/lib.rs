// SPDX-License-Identifier: MPL-2.0

//! Local-first synchronization engine for a Pubky social client.
//!
//! The engine keeps a normalized SQLite cache of users, posts, relationships,
//! tags, streams and notifications; applies user mutations optimistically
//! against the homeserver with rollback on failure; and refreshes the stream
//! the user is looking at in the background.
//!
//! Module order, leaves first: [`identity`], [`cache`], [`streams`],
//! [`actions`], [`coordinator`].

pub mod actions;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod logging;
pub mod remote;
pub mod settings;
pub mod streams;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SyncError};
