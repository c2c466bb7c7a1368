//! Core domain types and logic.

pub mod bar;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod instrument;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod reconciler;
pub mod series;
pub mod settings;
pub mod store_lock;
pub mod stream;
