//! Importer for a directory of plain-text and Markdown notes.
//!
//! Files are selected by `[importers.filesystem]` include/exclude globs
//! (matched against the path relative to the source directory) and read in
//! path order. Paragraphs are blocks separated by blank lines, with the
//! lines of a block joined by spaces. The title is the first Markdown
//! heading, falling back to the file name.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use polymath_core::{Info, PolymathError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Document, Importer, Stream};
use crate::config::FilesystemImporterConfig;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct FilesystemImporter {
    config: FilesystemImporterConfig,
}

impl FilesystemImporter {
    pub fn new(config: FilesystemImporterConfig) -> Self {
        Self { config }
    }

    fn matching_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            bail!("Filesystem import source is not a directory: {}", root.display());
        }

        let include_set = build_globset(&self.config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(self.config.exclude_globs.iter().cloned());
        let exclude_set = build_globset(&excludes)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let rel_str = relative.to_string_lossy();
            if exclude_set.is_match(&*rel_str) || !include_set.is_match(&*rel_str) {
                continue;
            }
            files.push(entry.path().to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Split text into blank-line separated paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

fn heading_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}

fn read_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8(bytes).map_err(|_| PolymathError::Extraction {
        path: path.display().to_string(),
        message: "file is not valid UTF-8".to_string(),
    })?;

    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let title = heading_title(&text).or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
    });

    Ok(Document {
        info: Info {
            url: format!("file://{}", absolute.display()),
            image_url: None,
            title,
            description: None,
        },
        paragraphs: split_paragraphs(&text),
    })
}

impl Importer for FilesystemImporter {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Markdown and text files under a directory"
    }

    fn output_base_filename(&self, source: &Path) -> Result<String> {
        let absolute = std::fs::canonicalize(source)
            .with_context(|| format!("Failed to resolve {}", source.display()))?;
        let dir_name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());
        Ok(format!("filesystem-{}", dir_name))
    }

    fn documents<'a>(&'a self, source: &'a Path) -> Result<Stream<'a, Document>> {
        let files = self.matching_files(source)?;
        Ok(Box::new(files.into_iter().map(|path| read_document(&path))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn importer() -> FilesystemImporter {
        FilesystemImporter::new(FilesystemImporterConfig::default())
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "# Title\n\nFirst line\nsame paragraph.\n\n\n  Second.  \n";
        assert_eq!(
            split_paragraphs(text),
            vec!["# Title", "First line same paragraph.", "Second."]
        );
        assert!(split_paragraphs("\n\n").is_empty());
    }

    #[test]
    fn test_documents_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "# Bee\n\nBuzz.").unwrap();
        std::fs::write(dir.path().join("a.txt"), "Plain note.").unwrap();
        std::fs::write(dir.path().join("skip.rs"), "fn main() {}").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/x.md"), "vendored").unwrap();

        let importer = importer();
        let docs: Vec<Document> = importer
            .documents(dir.path())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].info.title.as_deref(), Some("a.txt"));
        assert!(docs[0].info.url.starts_with("file://"));
        assert!(docs[0].info.url.ends_with("a.txt"));
        assert_eq!(docs[1].info.title.as_deref(), Some("Bee"));
        assert_eq!(docs[1].paragraphs, vec!["# Bee", "Buzz."]);
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("drafts/wip.md"), "WIP").unwrap();
        std::fs::write(dir.path().join("done.md"), "Done").unwrap();

        let importer = FilesystemImporter::new(FilesystemImporterConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..FilesystemImporterConfig::default()
        });
        let count = importer.documents(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_output_base_filename() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        assert_eq!(
            importer().output_base_filename(&notes).unwrap(),
            "filesystem-notes"
        );
    }

    #[test]
    fn test_invalid_utf8_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0x00]).unwrap();
        let items: Vec<Result<Document>> = importer().documents(dir.path()).unwrap().collect();
        assert!(matches!(
            items[0].as_ref().unwrap_err().downcast_ref::<PolymathError>(),
            Some(PolymathError::Extraction { .. })
        ));
    }

    #[test]
    fn test_missing_source_fails_up_front() {
        assert!(importer().documents(Path::new("/nonexistent/polymath")).is_err());
    }
}
