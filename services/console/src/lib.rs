//! Parlance Console Library Crate
//!
//! Everything the console binary needs: environment configuration, the
//! credential cache, cpal-backed audio devices, the JSON-RPC wallet client,
//! and the terminal view. The `bin/console.rs` binary is a thin wrapper that
//! wires these into a `parlance_core::SessionManager`.

pub mod config;
pub mod credentials;
pub mod devices;
pub mod view;
pub mod wallet;
