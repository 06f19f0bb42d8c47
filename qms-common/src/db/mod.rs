//! Database initialization, schema and migrations

pub mod init;
pub mod migrations;
pub mod sequence;

pub use init::*;
pub use migrations::*;
pub use sequence::next_number;
