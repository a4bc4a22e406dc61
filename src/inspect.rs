//! Summary statistics for a library file.

use anyhow::Result;
use polymath_core::Library;
use std::path::Path;

use crate::backends;

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryStats {
    pub embedding_model: String,
    pub bits: usize,
    pub documents: usize,
    pub tokens: usize,
    pub embedded: usize,
}

impl LibraryStats {
    pub fn of(library: &Library) -> Self {
        Self {
            embedding_model: library.embedding_model().to_string(),
            bits: library.len(),
            documents: library.sources().len(),
            tokens: library.total_tokens(),
            embedded: library.iter().filter(|b| b.embedding.is_some()).count(),
        }
    }
}

pub fn run_inspect(path: &Path) -> Result<()> {
    let stats = LibraryStats::of(&backends::read_library(path)?);

    println!("Library: {}", path.display());
    println!("  embedding model: {}", stats.embedding_model);
    println!("  bits:            {}", stats.bits);
    println!("  documents:       {}", stats.documents);
    println!("  tokens (est.):   {}", stats.tokens);
    println!("  embedded bits:   {}", stats.embedded);
    Ok(())
}
