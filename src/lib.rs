//! futquant: retail futures quant toolkit.
//!
//! A cache-first bar store kept in sync with a remote quote service, a
//! trading calendar, and per-instrument streams that execute orders without
//! look-ahead for backtests and live runs.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
#[cfg(all(feature = "sqlite", feature = "http"))]
pub mod cli;
