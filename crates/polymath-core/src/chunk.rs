//! Paragraph-packing text chunker.
//!
//! Turns groups of paragraphs (one group per source document) into
//! [`Chunk`]s that stay within a token budget. Chunks never cross a group
//! boundary and paragraphs are never split.
//!
//! # Algorithm
//!
//! 1. Whitespace-only paragraphs join the chunk being built without
//!    counting against the budget, so they never start or close a chunk.
//!    A group made only of blank paragraphs yields nothing.
//! 2. Accumulate consecutive paragraphs of the current group while the
//!    joined text stays within `max_tokens` (estimated at 4 chars/token).
//! 3. When the next paragraph would exceed the budget, emit the buffer and
//!    start a new chunk with that paragraph.
//! 4. A paragraph that alone exceeds the budget is emitted as its own chunk.
//! 5. At the end of a group, emit whatever is buffered.
//!
//! [`generate_chunks`] is lazy and single-pass: it pulls paragraphs from its
//! input only as chunks are requested, and cannot be restarted.
//!
//! # Example
//!
//! ```rust
//! use polymath_core::chunk::{generate_chunks, ChunkPolicy};
//!
//! let groups = vec![vec!["One.", "Two.", "Three."]];
//! let texts: Vec<String> = generate_chunks(groups, &ChunkPolicy::new(3))
//!     .map(|c| c.text())
//!     .collect();
//! assert_eq!(texts, vec!["One. Two.", "Three."]);
//! ```

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 500;

/// Separator placed between paragraphs of the same chunk.
pub const PARAGRAPH_SEPARATOR: &str = " ";

/// Estimate the token count of `text` (`ceil(chars / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    estimate_tokens_for_chars(text.chars().count())
}

fn estimate_tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Size policy for [`generate_chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Largest estimated token count a multi-paragraph chunk may reach.
    pub max_tokens: usize,
}

impl ChunkPolicy {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

/// A contiguous run of paragraphs from a single document group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub paragraphs: Vec<String>,
}

impl Chunk {
    /// The chunk text: non-blank paragraphs joined by [`PARAGRAPH_SEPARATOR`].
    pub fn text(&self) -> String {
        self.content().collect::<Vec<_>>().join(PARAGRAPH_SEPARATOR)
    }

    /// Estimated token count of [`text`](Chunk::text).
    pub fn estimated_tokens(&self) -> usize {
        let content: Vec<&str> = self.content().collect();
        let text_chars: usize = content.iter().map(|p| p.chars().count()).sum();
        estimate_tokens_for_chars(
            text_chars + content.len().saturating_sub(1) * PARAGRAPH_SEPARATOR.len(),
        )
    }

    fn content(&self) -> impl Iterator<Item = &str> {
        self.paragraphs
            .iter()
            .map(String::as_str)
            .filter(|p| !is_blank(p))
    }
}

fn is_blank(paragraph: &str) -> bool {
    paragraph.trim().is_empty()
}

/// Lazily pack `groups` of paragraphs into chunks.
///
/// Each item of `groups` is one document's paragraph sequence. The returned
/// iterator owns its input and yields every paragraph exactly once, in input
/// order, except those of groups with no non-blank paragraph.
pub fn generate_chunks<G, P, S>(groups: G, policy: &ChunkPolicy) -> Chunks<G::IntoIter, P::IntoIter>
where
    G: IntoIterator<Item = P>,
    P: IntoIterator<Item = S>,
    S: Into<String>,
{
    Chunks {
        groups: groups.into_iter(),
        current: None,
        buffer: Vec::new(),
        buffer_chars: 0,
        has_content: false,
        max_tokens: policy.max_tokens,
    }
}

/// Iterator returned by [`generate_chunks`].
pub struct Chunks<G, P> {
    groups: G,
    current: Option<P>,
    buffer: Vec<String>,
    buffer_chars: usize,
    /// Whether the buffer holds a non-blank paragraph.
    has_content: bool,
    max_tokens: usize,
}

impl<G, P> Chunks<G, P> {
    fn flush(&mut self) -> Option<Chunk> {
        self.buffer_chars = 0;
        if !self.has_content {
            self.buffer.clear();
            return None;
        }
        self.has_content = false;
        Some(Chunk {
            paragraphs: std::mem::take(&mut self.buffer),
        })
    }

    fn push(&mut self, paragraph: String, chars: usize) {
        if self.has_content {
            self.buffer_chars += PARAGRAPH_SEPARATOR.len();
        }
        self.buffer_chars += chars;
        self.has_content = true;
        self.buffer.push(paragraph);
    }
}

impl<G, P, S> Iterator for Chunks<G, P>
where
    G: Iterator,
    G::Item: IntoIterator<Item = S, IntoIter = P>,
    P: Iterator<Item = S>,
    S: Into<String>,
{
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let next_paragraph = match self.current.as_mut() {
                Some(paragraphs) => paragraphs.next(),
                None => match self.groups.next() {
                    Some(group) => {
                        self.current = Some(group.into_iter());
                        continue;
                    }
                    None => return None,
                },
            };

            let Some(paragraph) = next_paragraph else {
                // Group exhausted: close it before touching the next one.
                self.current = None;
                match self.flush() {
                    Some(chunk) => return Some(chunk),
                    None => continue,
                }
            };

            let paragraph: String = paragraph.into();
            if is_blank(&paragraph) {
                self.buffer.push(paragraph);
                continue;
            }

            let chars = paragraph.chars().count();
            let would_be = if self.has_content {
                self.buffer_chars + PARAGRAPH_SEPARATOR.len() + chars
            } else {
                chars
            };

            if self.has_content && estimate_tokens_for_chars(would_be) > self.max_tokens {
                let full = self.flush();
                self.push(paragraph, chars);
                return full;
            }

            self.push(paragraph, chars);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(groups: Vec<Vec<&str>>, max_tokens: usize) -> Vec<String> {
        generate_chunks(groups, &ChunkPolicy::new(max_tokens))
            .map(|c| c.text())
            .collect()
    }

    #[test]
    fn test_two_sentences_per_chunk() {
        let chunks = texts(vec![vec!["One.", "Two.", "Three."]], 3);
        assert_eq!(chunks, vec!["One. Two.", "Three."]);
    }

    #[test]
    fn test_small_group_single_chunk() {
        let chunks = texts(vec![vec!["Hello, world!", "Second paragraph."]], 500);
        assert_eq!(chunks, vec!["Hello, world! Second paragraph."]);
    }

    #[test]
    fn test_groups_never_mixed() {
        let chunks = texts(vec![vec!["Alpha."], vec!["Beta."]], 500);
        assert_eq!(chunks, vec!["Alpha.", "Beta."]);
    }

    #[test]
    fn test_oversized_paragraph_emitted_alone() {
        let long = "x".repeat(200);
        let groups = vec![vec!["short", long.as_str(), "tail"]];
        let chunks: Vec<Chunk> = generate_chunks(groups, &ChunkPolicy::new(10)).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].paragraphs, vec!["short"]);
        assert_eq!(chunks[1].paragraphs, vec![long.clone()]);
        assert_eq!(chunks[2].paragraphs, vec!["tail"]);
        assert!(chunks[1].estimated_tokens() > 10);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let groups: Vec<Vec<String>> = vec![vec![], vec![]];
        assert_eq!(generate_chunks(groups, &ChunkPolicy::default()).count(), 0);
    }

    #[test]
    fn test_blank_paragraphs_kept_but_not_in_text() {
        let chunks: Vec<Chunk> =
            generate_chunks(vec![vec!["  ", "Real.", "\n"]], &ChunkPolicy::new(500)).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].paragraphs, vec!["  ", "Real.", "\n"]);
        assert_eq!(chunks[0].text(), "Real.");
        assert_eq!(chunks[0].estimated_tokens(), 2);
    }

    #[test]
    fn test_blank_paragraphs_never_alone() {
        let groups = vec![
            vec!["", "Alpha.", "   ", "Beta.", "\t", "Gamma.", " "],
            vec!["  ", "\n"],
            vec!["Delta."],
        ];
        let chunks: Vec<Chunk> = generate_chunks(groups, &ChunkPolicy::new(2)).collect();
        let paragraphs: Vec<Vec<String>> = chunks.iter().map(|c| c.paragraphs.clone()).collect();
        assert_eq!(
            paragraphs,
            vec![
                vec!["", "Alpha.", "   "],
                vec!["Beta.", "\t"],
                vec!["Gamma.", " "],
                vec!["Delta."],
            ]
        );
        assert!(chunks.iter().all(|c| !c.text().is_empty()));
    }

    #[test]
    fn test_blank_paragraph_covered_mid_group() {
        let rebuilt: Vec<String> =
            generate_chunks(vec![vec!["Alpha.", "   ", "Beta."]], &ChunkPolicy::new(500))
                .flat_map(|c| c.paragraphs)
                .collect();
        assert_eq!(rebuilt, vec!["Alpha.", "   ", "Beta."]);
    }

    #[test]
    fn test_coverage_and_order() {
        let groups: Vec<Vec<String>> = (0..7)
            .map(|g| {
                (0..(g * 3 + 1))
                    .map(|p| format!("Group {} paragraph {} {}", g, p, "word ".repeat(p % 5)))
                    .collect()
            })
            .collect();
        let expected: Vec<String> = groups.iter().flatten().cloned().collect();

        for budget in [1, 5, 12, 40, 1000] {
            let chunks: Vec<Chunk> =
                generate_chunks(groups.clone(), &ChunkPolicy::new(budget)).collect();
            assert!(chunks.iter().all(|c| !c.paragraphs.is_empty()));
            let rebuilt: Vec<String> = chunks.into_iter().flat_map(|c| c.paragraphs).collect();
            assert_eq!(rebuilt, expected, "coverage broken at budget {}", budget);
        }
    }

    #[test]
    fn test_multi_paragraph_chunks_respect_budget() {
        let groups = vec![(0..40).map(|i| format!("Sentence number {}.", i)).collect::<Vec<_>>()];
        for c in generate_chunks(groups, &ChunkPolicy::new(12)) {
            if c.paragraphs.len() > 1 {
                assert!(c.estimated_tokens() <= 12);
            }
        }
    }

    #[test]
    fn test_lazy_consumption() {
        let pulled = std::cell::Cell::new(0usize);
        let groups = vec![(0..100).map(|i| {
            pulled.set(pulled.get() + 1);
            format!("p{}", i)
        })];
        let mut chunks = generate_chunks(groups, &ChunkPolicy::new(1));
        let first = chunks.next().unwrap();
        assert_eq!(first.paragraphs, vec!["p0"]);
        assert!(pulled.get() < 100);
    }

    #[test]
    fn test_estimate_tokens_multibyte() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("┌──┐"), 1);
    }
}
