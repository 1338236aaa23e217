//! Phrase index for trigger matching.
//!
//! Trigger phrases from every workflow template are compiled into a single
//! [`aho_corasick`] automaton, so one pass over the user message finds every
//! phrase it contains regardless of how many templates are registered.
//!
//! Matching is case-insensitive and respects word boundaries: the phrase
//! `"plan"` does not match inside `"planet"`.
//!
//! # Example
//!
//! ```rust
//! # use flowmate_kernel::router::PhraseIndex;
//! let index = PhraseIndex::new([("weekly review", 0), ("meeting notes", 1)]).unwrap();
//!
//! let hits = index.find("Can you do my Weekly Review?");
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].owner, 0);
//! ```

use std::collections::BTreeSet;

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A phrase found in the searched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseMatch {
    /// Caller-defined owner of the phrase (e.g. a catalog index).
    pub owner: usize,
    /// The phrase that matched, lowercased.
    pub phrase: String,
}

// ---------------------------------------------------------------------------
// PhraseIndex
// ---------------------------------------------------------------------------

/// Immutable multi-phrase matcher.
///
/// The index is **not** `Clone` because it holds a compiled automaton that is
/// expensive to duplicate.  Wrap in `Arc` if shared access is needed.
pub struct PhraseIndex {
    /// Lowercased phrases and their owners, in registration order.
    phrases: Vec<(String, usize)>,

    /// The compiled automaton; `None` when there are no phrases.
    automaton: Option<AhoCorasick>,
}

impl PhraseIndex {
    /// Compile an index from `(phrase, owner)` pairs.
    ///
    /// Blank phrases are ignored.
    pub fn new<I, S>(phrases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: AsRef<str>,
    {
        let phrases: Vec<(String, usize)> = phrases
            .into_iter()
            .map(|(p, owner)| (normalize(p.as_ref()), owner))
            .filter(|(p, _)| !p.is_empty())
            .collect();

        if phrases.is_empty() {
            return Ok(Self {
                phrases,
                automaton: None,
            });
        }

        let patterns: Vec<&str> = phrases.iter().map(|(p, _)| p.as_str()).collect();
        let automaton =
            AhoCorasick::new(&patterns).map_err(|e| KernelError::RouterBuildError {
                reason: e.to_string(),
            })?;

        tracing::trace!(count = phrases.len(), "phrase automaton built");

        Ok(Self {
            phrases,
            automaton: Some(automaton),
        })
    }

    /// Return every distinct phrase contained in `text` as a whole-word
    /// match, ordered by owner and then by registration order.
    pub fn find(&self, text: &str) -> Vec<PhraseMatch> {
        let Some(ac) = self.automaton.as_ref() else {
            return Vec::new();
        };

        let lowered = normalize(text);
        let bytes = lowered.as_bytes();
        let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();

        for mat in ac.find_overlapping_iter(&lowered) {
            let starts_clean = mat.start() == 0 || !is_word_byte(bytes[mat.start() - 1]);
            let ends_clean = mat.end() == bytes.len() || !is_word_byte(bytes[mat.end()]);
            if starts_clean && ends_clean {
                let idx = mat.pattern().as_usize();
                seen.insert((self.phrases[idx].1, idx));
            }
        }

        seen.into_iter()
            .map(|(owner, idx)| PhraseMatch {
                owner,
                phrase: self.phrases[idx].0.clone(),
            })
            .collect()
    }

    /// Return the number of indexed phrases.
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Whether the index holds no phrases.
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Lowercase and collapse runs of whitespace to a single space.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
