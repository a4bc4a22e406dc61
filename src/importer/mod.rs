//! Importers turn an exported source (a Medium export, a directory of
//! notes) into chunks ready to become Bits.
//!
//! Each importer yields [`Document`]s lazily, one per source document, and
//! the provided [`Importer::get_chunks`] packs each document's paragraphs
//! with the chunker. Chunks never span two documents.
//!
//! # Registry
//!
//! The set of importers is closed and selected by name:
//!
//! | Name | Source | Output base |
//! |------|--------|-------------|
//! | `medium` | Medium export directory | `medium-<user>-<include>` |
//! | `filesystem` | any directory | `filesystem-<dir>` |
//!
//! ```rust
//! use polymath::config::Config;
//! use polymath::importer::ImporterRegistry;
//!
//! let registry = ImporterRegistry::from_config(&Config::minimal());
//! assert!(registry.find("medium").is_some());
//! assert!(registry.find("notion").is_none());
//! ```

pub mod filesystem;
pub mod medium;

use anyhow::Result;
use polymath_core::chunk::{generate_chunks, ChunkPolicy};
use polymath_core::Info;
use std::path::Path;

use crate::config::Config;

/// One source document: its provenance and body paragraphs in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub info: Info,
    pub paragraphs: Vec<String>,
}

/// A packed chunk of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedChunk {
    pub text: String,
    pub info: Info,
    /// Position of the chunk within its document, from 0.
    pub ordinal: usize,
}

/// Lazy, single-pass sequence of results.
pub type Stream<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

pub trait Importer: Send + Sync {
    /// Registry name, e.g. `"medium"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Base name (without extension) of the library file for `source`.
    fn output_base_filename(&self, source: &Path) -> Result<String>;

    /// Documents found under `source`, read as the stream is consumed.
    ///
    /// A document that cannot be extracted is yielded as an error item;
    /// the stream continues with the next document.
    fn documents<'a>(&'a self, source: &'a Path) -> Result<Stream<'a, Document>>;

    /// Chunks of every document under `source`, in document order.
    fn get_chunks<'a>(&'a self, source: &'a Path, policy: ChunkPolicy) -> Result<Stream<'a, ImportedChunk>> {
        let documents = self.documents(source)?;
        Ok(Box::new(documents.flat_map(move |document| -> Stream<'a, ImportedChunk> {
            match document {
                Err(e) => Box::new(std::iter::once(Err(e))),
                Ok(Document { info, paragraphs }) => Box::new(
                    generate_chunks([paragraphs], &policy)
                        .enumerate()
                        .map(move |(ordinal, chunk)| {
                            Ok(ImportedChunk {
                                text: chunk.text(),
                                info: info.clone(),
                                ordinal,
                            })
                        }),
                ),
            }
        })))
    }
}

pub struct ImporterRegistry {
    importers: Vec<Box<dyn Importer>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self {
            importers: Vec::new(),
        }
    }

    /// Registry holding every built-in importer, configured from
    /// `[importers.*]`.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(medium::MediumImporter::new(
            config.importers.medium.include,
        )));
        registry.register(Box::new(filesystem::FilesystemImporter::new(
            config.importers.filesystem.clone(),
        )));
        registry
    }

    pub fn register(&mut self, importer: Box<dyn Importer>) {
        self.importers.push(importer);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Importer> {
        self.importers
            .iter()
            .find(|i| i.name() == name)
            .map(|i| i.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.importers.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }
}

impl Default for ImporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
