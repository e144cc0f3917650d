//! Client-side review of classified cell image batches.
//!
//! Storage, identity and inference are external services reached through
//! [`store::RecordStore`], [`auth::IdentityProvider`] and
//! [`inference::InferenceService`]. This crate shapes their data into
//! per-class summaries, drill-downs and explanation requests.

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod deletion;
pub mod details;
pub mod error;
pub mod explain;
pub mod inference;
pub mod intake;
pub mod listing;
pub mod models;
pub mod navigation;
pub mod report;
pub mod session;
pub mod store;
