pub mod connection;
pub mod migrate;

pub use connection::{Database, LiveConnection};
