//! Forum presence and private messaging hub.
//! This crate exposes its modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testutil;
