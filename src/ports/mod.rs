//! Port traits at the boundary between domain logic and I/O.

pub mod calendar_port;
pub mod config_port;
pub mod quote_port;
pub mod store_port;
