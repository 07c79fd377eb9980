//! OpenAPI -> tool adapter engine.
//!
//! Loads an `OpenAPI` document (with external and cyclic references), selects operations by path
//! pattern, synthesizes a flat typed argument list per operation, and dispatches tool calls as
//! outbound HTTP requests. [`slimmer`] extracts a self-contained subset of a spec offline.
//!
//! Typical flow: [`config::AdapterConfig`] -> [`registry::NamespaceRegistry::rebuild`] ->
//! [`registry::NamespaceRegistry::call_tool`].

pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod registry;
pub mod reload;
pub mod schema;
pub mod selector;
pub mod slimmer;
pub mod synthesizer;
pub mod transport;

#[cfg(test)]
mod testing;
