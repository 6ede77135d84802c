//! Database module: view models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: insert payloads and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `tg_digestbot::db`; the repository API
//! and commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{
    ConsumeOutcome, DraftBatch, InsertOutcome, NewPost, PostForSummary, SummaryLinkState, SummaryWithPosts,
};
