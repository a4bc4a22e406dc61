//! Import pipeline: importer → chunks → Bits → Library → embeddings →
//! library file → optional upload.
//!
//! Bit ids are derived from the document URL and chunk text, so importing
//! the same export twice produces the same library; duplicate chunks within
//! one import collapse under the library replace policy.
//!
//! Extraction errors abort the import unless
//! `ingest.skip_extraction_errors` is set, in which case the offending
//! document is logged and skipped.

use anyhow::{anyhow, bail, Context, Result};
use polymath_core::chunk::ChunkPolicy;
use polymath_core::embedding::EmbeddingProvider;
use polymath_core::{Bit, Library, PolymathError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backends;
use crate::config::{Config, EmbeddingConfig};
use crate::embedding;
use crate::importer::medium::MediumInclude;
use crate::importer::{Importer, ImporterRegistry};

/// Per-run command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub medium_include: Option<MediumInclude>,
    pub upload: bool,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub output: PathBuf,
    pub bits: usize,
    pub embedded: usize,
    pub skipped_documents: usize,
    pub uploaded: Option<usize>,
}

pub async fn run_import(
    config: &Config,
    importer_name: &str,
    source: &Path,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let mut config = config.clone();
    if let Some(include) = options.medium_include {
        config.importers.medium.include = include;
    }

    let registry = ImporterRegistry::from_config(&config);
    let importer = registry.find(importer_name).ok_or_else(|| {
        anyhow!(
            "Unknown importer: '{}'. Available: {}",
            importer_name,
            registry.names().join(", ")
        )
    })?;

    let base = importer.output_base_filename(source)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let library = if config.embedding.is_enabled() {
        Library::with_dims(provider.model_id(), provider.dims())
    } else {
        config.library.empty_library()
    };
    if options.upload {
        ensure_served_model(&config, library.embedding_model(), importer_name)?;
    }

    let (mut library, skipped_documents) = build_library(
        importer,
        source,
        config.chunking.policy(),
        library,
        config.ingest.skip_extraction_errors,
    )?;
    info!(importer = importer_name, bits = library.len(), skipped_documents, "imported");

    let embedded = if config.embedding.is_enabled() {
        embed_library(provider.as_ref(), &config.embedding, &mut library).await?
    } else {
        0
    };

    std::fs::create_dir_all(&config.ingest.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.ingest.output_dir.display()
        )
    })?;
    let output = config.ingest.output_dir.join(format!("{}.json", base));
    std::fs::write(&output, library.to_json(false)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(path = %output.display(), "wrote library file");

    let uploaded = if options.upload {
        let backend = backends::open_backend(&config).await?;
        Some(backend.upsert_library(&library).await?)
    } else {
        None
    };

    Ok(ImportSummary {
        output,
        bits: library.len(),
        embedded,
        skipped_documents,
        uploaded,
    })
}

/// Upload a previously written library file to the configured backend.
pub async fn run_upload(config: &Config, path: &Path) -> Result<usize> {
    let library = backends::read_library(path)?;
    ensure_served_model(config, library.embedding_model(), &path.display().to_string())?;
    let backend = backends::open_backend(config).await?;
    let uploaded = backend.upsert_library(&library).await?;
    info!(path = %path.display(), uploaded, "uploaded library");
    Ok(uploaded)
}

/// Refuse to mix vectors of another model into the configured backend.
fn ensure_served_model(config: &Config, model: &str, origin: &str) -> Result<()> {
    if model != config.library.embedding_model {
        bail!(
            "{} uses embedding model '{}', but [library] serves '{}'",
            origin,
            model,
            config.library.embedding_model
        );
    }
    Ok(())
}

/// Drain the importer into `library`. Returns the library and the number
/// of documents skipped for extraction errors.
pub fn build_library(
    importer: &dyn Importer,
    source: &Path,
    policy: ChunkPolicy,
    mut library: Library,
    skip_extraction_errors: bool,
) -> Result<(Library, usize)> {
    let mut skipped = 0;
    for item in importer.get_chunks(source, policy)? {
        match item {
            Ok(chunk) => {
                library.insert(Bit::from_chunk(chunk.text, chunk.info, chunk.ordinal))?;
            }
            Err(e) => match e.downcast_ref::<PolymathError>() {
                Some(PolymathError::Extraction { path, message }) if skip_extraction_errors => {
                    warn!(path = %path, message = %message, "skipping document");
                    skipped += 1;
                }
                _ => return Err(e),
            },
        }
    }
    Ok((library, skipped))
}

/// Embed every Bit in batches of `embedding.batch_size`.
pub async fn embed_library(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    library: &mut Library,
) -> Result<usize> {
    let texts: Vec<String> = library.context();
    let mut vectors = Vec::with_capacity(texts.len());
    for (batch_no, batch) in texts.chunks(config.batch_size.max(1)).enumerate() {
        let batch_vectors = embedding::embed_texts(provider, config, batch).await?;
        info!(batch = batch_no, size = batch.len(), "embedded batch");
        vectors.extend(batch_vectors);
    }
    let count = vectors.len();
    library.set_embeddings(vectors)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::filesystem::FilesystemImporter;
    use crate::config::FilesystemImporterConfig;

    fn notes() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n\nOne.\n\nTwo.\n\nThree.").unwrap();
        std::fs::write(dir.path().join("b.txt"), "One.").unwrap();
        dir
    }

    #[test]
    fn test_build_library_ids_are_stable() {
        let dir = notes();
        let importer = FilesystemImporter::new(FilesystemImporterConfig::default());
        let (first, _) =
            build_library(&importer, dir.path(), ChunkPolicy::new(1), Library::default(), false).unwrap();
        let (second, _) =
            build_library(&importer, dir.path(), ChunkPolicy::new(1), Library::default(), false).unwrap();
        assert_eq!(first.len(), 5);
        let ids = |l: &Library| l.iter().map(|b| b.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        // Same text in two files still gives two bits: the url differs.
        assert_eq!(first.iter().filter(|b| b.text == "One.").count(), 2);
        assert!(first.iter().all(|b| b.token_count.is_some()));
    }

    #[test]
    fn test_repeated_chunk_in_one_document_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("refrain.txt"), "Chorus.\n\nVerse.\n\nChorus.").unwrap();
        let importer = FilesystemImporter::new(FilesystemImporterConfig::default());
        let (library, _) =
            build_library(&importer, dir.path(), ChunkPolicy::new(1), Library::default(), false).unwrap();
        assert_eq!(library.context(), vec!["Chorus.", "Verse.", "Chorus."]);
    }

    #[test]
    fn test_extraction_errors_fatal_unless_skipped() {
        let dir = notes();
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe]).unwrap();
        let importer = FilesystemImporter::new(FilesystemImporterConfig::default());

        assert!(build_library(&importer, dir.path(), ChunkPolicy::default(), Library::default(), false).is_err());
        let (library, skipped) =
            build_library(&importer, dir.path(), ChunkPolicy::default(), Library::default(), true).unwrap();
        assert_eq!(skipped, 1);
        assert!(!library.is_empty());
    }

    #[tokio::test]
    async fn test_run_import_writes_library_file() {
        let dir = notes();
        let out = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.ingest.output_dir = out.path().to_path_buf();

        let summary = run_import(&config, "filesystem", dir.path(), &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.embedded, 0);
        assert!(summary.uploaded.is_none());

        let written = backends::read_library(&summary.output).unwrap();
        assert_eq!(written.len(), summary.bits);
        assert_eq!(written.embedding_model(), config.library.embedding_model);
    }

    #[tokio::test]
    async fn test_upload_to_sqlite() {
        let dir = notes();
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.ingest.output_dir = tmp.path().join("libraries");
        config.library.backend = "sqlite".to_string();
        config.library.sqlite = Some(crate::config::SqliteConfig {
            path: tmp.path().join("polymath.sqlite"),
        });

        let summary = run_import(&config, "filesystem", dir.path(), &ImportOptions::default())
            .await
            .unwrap();
        let uploaded = run_upload(&config, &summary.output).await.unwrap();
        assert_eq!(uploaded, summary.bits);
    }

    #[tokio::test]
    async fn test_upload_rejects_other_embedding_model() {
        std::env::set_var("OPENAI_API_KEY", "test-key-not-used");
        let dir = notes();
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.ingest.output_dir = tmp.path().join("libraries");
        config.embedding.provider = "openai".to_string();
        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);

        let options = ImportOptions {
            upload: true,
            ..ImportOptions::default()
        };
        let err = run_import(&config, "filesystem", dir.path(), &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("openai.com:text-embedding-3-small"));
        // Rejected before anything is embedded or written.
        assert!(!config.ingest.output_dir.exists());
    }

    #[tokio::test]
    async fn test_unknown_importer() {
        let err = run_import(&Config::minimal(), "notion", Path::new("."), &ImportOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("medium, filesystem"));
    }
}
