//! # Polymath
//!
//! Context retrieval and federation: import long-form writing into
//! libraries of embedded text chunks ("bits"), serve each library over HTTP,
//! and assemble one token-bounded context from many library servers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Importers  │──▶│ Chunk+Embed  │──▶│ Library file │
//! │ Medium / FS │   │  (ingest)    │   │  / backend   │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                      ┌──────▼───────┐
//!                                      │ Library HTTP │  × N
//!                                      │    server    │
//!                                      └──────┬───────┘
//!                                             │
//!                                      ┌──────▼───────┐
//!                                      │  Federator   │
//!                                      │ (polymath    │
//!                                      │   query)     │
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! polymath import medium ./medium-export      # write libraries/medium-<user>-published.json
//! polymath inspect libraries/medium-alice-published.json
//! polymath serve                               # serve [library] on [server].bind
//! polymath query "how do teams scale?" --server http://127.0.0.1:8080/
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`importer`] | Medium export and filesystem importers |
//! | [`ingest`] | Import pipeline and library files |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`backends`] | Backend selection |
//! | [`backend_pinecone`] | Pinecone vector index backend |
//! | [`backend_sqlite`] | SQLite brute-force backend |
//! | [`protocol`] | Retrieval request wire format |
//! | [`server`] | Library HTTP server |
//! | [`federate`] | Multi-server query client |
//! | [`inspect`] | Library file statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! The data model, chunker, and `Backend` trait live in `polymath-core`.

pub mod backend_pinecone;
pub mod backend_sqlite;
pub mod backends;
pub mod config;
pub mod db;
pub mod embedding;
pub mod federate;
pub mod importer;
pub mod ingest;
pub mod inspect;
pub mod logging;
pub mod migrate;
pub mod protocol;
pub mod server;

pub use polymath_core::{Bit, Info, Library, PolymathError};
