//! Importer for Medium account exports.
//!
//! An export directory holds `profile/profile.html` and one HTML file per
//! post under `posts/`. Drafts are the files whose name starts with
//! `draft_`. For each post:
//!
//! | Field | Source | Required |
//! |-------|--------|----------|
//! | url | `a.p-canonical` href, or the first `footer a` href for drafts | yes |
//! | body | `p` elements inside `section.e-content` | yes |
//! | title | `h1.p-name` | no |
//! | image_url | `img.graf-image` src | no |
//! | description | `section.p-summary`, else the first body paragraph | no |
//!
//! Missing required elements are [`PolymathError::Extraction`] errors.

use anyhow::{anyhow, Context, Result};
use polymath_core::{Info, PolymathError};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Document, Importer, Stream};

const DRAFT_PREFIX: &str = "draft_";

/// Which posts of an export to import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediumInclude {
    All,
    Drafts,
    #[default]
    Published,
}

impl MediumInclude {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediumInclude::All => "all",
            MediumInclude::Drafts => "drafts",
            MediumInclude::Published => "published",
        }
    }

    fn wants(&self, is_draft: bool) -> bool {
        match self {
            MediumInclude::All => true,
            MediumInclude::Drafts => is_draft,
            MediumInclude::Published => !is_draft,
        }
    }
}

impl fmt::Display for MediumInclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct MediumImporter {
    include: MediumInclude,
}

impl MediumImporter {
    pub fn new(include: MediumInclude) -> Self {
        Self { include }
    }
}

struct Selectors {
    username: Selector,
    canonical: Selector,
    footer_link: Selector,
    image: Selector,
    title: Selector,
    summary: Selector,
    body: Selector,
    paragraph: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid CSS selector {}: {:?}", css, e))
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            username: selector("a.u-url")?,
            canonical: selector("a.p-canonical")?,
            footer_link: selector("footer a")?,
            image: selector("img.graf-image")?,
            title: selector("h1.p-name")?,
            summary: selector("section.p-summary")?,
            body: selector("section.e-content")?,
            paragraph: selector("p")?,
        })
    }
}

/// Text of an element with each text node trimmed and joined by a space.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn extraction(path: &Path, message: &str) -> anyhow::Error {
    PolymathError::Extraction {
        path: path.display().to_string(),
        message: message.to_string(),
    }
    .into()
}

fn read_html(path: &Path) -> Result<Html> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Html::parse_document(&html))
}

fn parse_post(path: &Path, is_draft: bool, selectors: &Selectors) -> Result<Document> {
    let html = read_html(path)?;

    let link = if is_draft {
        html.select(&selectors.footer_link).next()
    } else {
        html.select(&selectors.canonical).next()
    };
    let url = link
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
        .ok_or_else(|| {
            extraction(
                path,
                if is_draft {
                    "draft has no footer link"
                } else {
                    "post has no a.p-canonical link"
                },
            )
        })?;

    let body = html
        .select(&selectors.body)
        .next()
        .ok_or_else(|| extraction(path, "post has no section.e-content"))?;
    let paragraphs: Vec<String> = body
        .select(&selectors.paragraph)
        .map(element_text)
        .collect();

    let image_url = html
        .select(&selectors.image)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);
    let title = html
        .select(&selectors.title)
        .next()
        .map(element_text)
        .and_then(non_empty);
    let description = html
        .select(&selectors.summary)
        .next()
        .map(element_text)
        .and_then(non_empty)
        .or_else(|| paragraphs.iter().find(|p| !p.is_empty()).cloned());

    Ok(Document {
        info: Info {
            url,
            image_url,
            title,
            description,
        },
        paragraphs,
    })
}

impl Importer for MediumImporter {
    fn name(&self) -> &str {
        "medium"
    }

    fn description(&self) -> &str {
        "Posts from a Medium account export"
    }

    fn output_base_filename(&self, source: &Path) -> Result<String> {
        let profile = source.join("profile").join("profile.html");
        let html = read_html(&profile)?;
        let username = html
            .select(&Selectors::new()?.username)
            .next()
            .map(element_text)
            .and_then(non_empty)
            .ok_or_else(|| extraction(&profile, "profile has no a.u-url username"))?;
        Ok(format!(
            "medium-{}-{}",
            username.replace('@', ""),
            self.include
        ))
    }

    fn documents<'a>(&'a self, source: &'a Path) -> Result<Stream<'a, Document>> {
        let selectors = Selectors::new()?;
        let posts_dir = source.join("posts");
        let mut posts: Vec<PathBuf> = std::fs::read_dir(&posts_dir)
            .with_context(|| format!("Failed to read {}", posts_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "html"))
            .collect();
        posts.sort();

        let include = self.include;
        Ok(Box::new(posts.into_iter().filter_map(move |path| {
            let is_draft = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(DRAFT_PREFIX));
            if !include.wants(is_draft) {
                debug!(path = %path.display(), include = %include, "skipping post");
                return None;
            }
            Some(parse_post(&path, is_draft, &selectors))
        })))
    }
}
