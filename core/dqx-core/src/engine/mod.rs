//! Database Engine Module

pub mod database;

pub use database::Database;
