//! Database abstraction layer
//!
//! This module provides the engine-agnostic capability interface and one
//! plugin per supported engine. SQL engines share the generic plugin in
//! [`sql`]; MongoDB implements the interface directly.

pub mod connection;
pub mod crud;
pub mod dialect;
pub mod sql;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mongodb")]
pub mod mongodb;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

// Re-export the main trait
pub use traits::Plugin;
