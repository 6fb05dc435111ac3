//! tally-core: the aggregation core for itemized campaign-finance filings.
//!
//! The library keeps three denormalized rollup tables (by state, by zip,
//! by donation-size bucket) and a full-text search shadow table consistent
//! with a continuously mutating ledger of itemized transactions, without
//! full recomputation on every write. Mutations go through
//! [`db::ledger`], which applies the ledger row and its derived deltas in
//! one transaction; readers use [`db::query`] and [`db::search`] and never
//! trigger recomputation. [`db::rebuild`] re-derives a scope from scratch
//! for initial population and recovery.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` at the edges; typed
//!   [`error::CoreError`] values ride the chain for callers that branch
//!   (`err.downcast_ref::<CoreError>()`).
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod categorize;
pub mod config;
pub mod db;
pub mod error;
pub mod lexical;
pub mod model;
