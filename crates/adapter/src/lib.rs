//! Standalone OpenAPI -> MCP tool adapter.
//!
//! Builds tools for every configured namespace, serves an inspection endpoint, reloads when the
//! config or local specs change, and offers offline `tools`/`slim` commands.

pub mod commands;
pub mod error;
pub mod inspection;
pub mod watch;
