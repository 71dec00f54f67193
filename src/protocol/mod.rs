//! MCP wire protocol: JSON-RPC types, stdio framing, and request dispatch
//! (spec §4.8, §6.1).

pub mod dispatcher;
pub mod framing;
pub mod jsonrpc;

pub use dispatcher::ProtocolDispatcher;
