//! # Polymath Core
//!
//! Shared, transport-free logic for Polymath: the bit and library data
//! model, paragraph chunking, embedding vector helpers, the backend trait,
//! and the library query contract.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! backends that talk to external services live in the `polymath` app crate.

pub mod backend;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod query;

pub use error::PolymathError;
pub use models::{Bit, Info, Library};
