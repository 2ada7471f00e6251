//! Backup administration service
//!
//! Creates point-in-time dumps of the application database, keeps a catalog of
//! them inside that same database, and restores a dump by rebuilding the live
//! database while carrying the catalog across the rebuild.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::{AppError, BackupError};
