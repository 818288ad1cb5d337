//! LSP plumbing: stdio framing, wire types, per-language clients, and the
//! enrichment orchestrator.

pub mod client;
pub mod servers;
pub mod service;
pub mod transport;
pub mod types;

pub use client::Client;
pub use service::LspService;
