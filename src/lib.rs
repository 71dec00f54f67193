//! Core library for the ELN MCP bridge: authentication, scoped resource
//! discovery, the upstream HTTP client, and the JSON-RPC dispatcher.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod folder_path;
pub mod http_client;
pub mod protocol;
pub mod resources;
pub mod sanitize;
pub mod scope;
pub mod signer;

pub use config::Configuration;
pub use error::{CoreError, CoreResult};
