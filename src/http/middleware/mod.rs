//! Pipeline layers that belong to the HTTP transport rather than to security.

pub mod recover;

pub use recover::handle_panic;
