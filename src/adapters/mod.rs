//! Concrete adapter implementations for ports.

pub mod calendar_file_adapter;
pub mod csv_adapter;
pub mod file_config_adapter;
#[cfg(feature = "http")]
pub mod http_quote_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
