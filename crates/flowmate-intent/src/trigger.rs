//! Trigger detection: pick the workflow a user message is asking for.
//!
//! Detection sits behind the [`TriggerDetector`] trait so the matching
//! strategy can be swapped without touching the engine.  The default
//! [`KeywordTriggerDetector`] scores every active template on three signals,
//! strongest first:
//!
//! 1. trigger phrases contained in the message (one pass over an
//!    Aho-Corasick [`PhraseIndex`] covering the whole catalog),
//! 2. the number of distinct template keywords present in the message,
//! 3. a boost when a recent conversation topic mentions one of the
//!    template's domain nouns.
//!
//! The weighted score only gates a candidate against `min_score`.  Among
//! the candidates that pass, the signals are compared in that order, so a
//! phrase hit outranks any number of keywords whatever the weights.  The
//! boost only applies on top of a message hit; topics alone never trigger a
//! workflow.  Ties go to the template declared first.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use flowmate_kernel::PhraseIndex;
use tracing::{debug, warn};

use crate::catalog::{RegisteredWorkflow, WorkflowCatalog};
use crate::config::TriggerWeights;
use crate::error::Result;

/// Selects a workflow template from free text.
pub trait TriggerDetector: Send + Sync {
    /// Return the best matching workflow, or `None` when the message is not
    /// a workflow request.  Must not have side effects.
    fn detect(&self, message: &str, recent_topics: &[String]) -> Option<Arc<RegisteredWorkflow>>;
}

/// Score breakdown for one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerScore {
    pub template_id: String,
    pub phrase_hits: usize,
    pub keyword_hits: usize,
    pub topic_boosted: bool,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// KeywordTriggerDetector
// ---------------------------------------------------------------------------

/// Weighted phrase/keyword matcher over a catalog snapshot.
pub struct KeywordTriggerDetector {
    workflows: Vec<Arc<RegisteredWorkflow>>,
    phrases: PhraseIndex,
    /// Normalized keyword tokens per workflow.
    keywords: Vec<BTreeSet<String>>,
    /// Normalized domain tokens per workflow.
    domains: Vec<BTreeSet<String>>,
    weights: TriggerWeights,
}

impl KeywordTriggerDetector {
    /// Build a detector over every workflow currently in `catalog`.
    pub fn new(catalog: &WorkflowCatalog, weights: TriggerWeights) -> Result<Self> {
        let workflows: Vec<Arc<RegisteredWorkflow>> = catalog.iter().cloned().collect();

        let phrases = PhraseIndex::new(workflows.iter().enumerate().flat_map(|(owner, wf)| {
            wf.template
                .trigger
                .phrases
                .iter()
                .map(move |p| (p.as_str(), owner))
        }))?;

        let keywords: Vec<BTreeSet<String>> = workflows
            .iter()
            .map(|wf| wf.template.trigger.keywords.iter().flat_map(|k| tokens(k)).collect())
            .collect();
        let domains = workflows
            .iter()
            .map(|wf| wf.template.trigger.domains.iter().flat_map(|d| tokens(d)).collect())
            .collect();

        let max_keywords = keywords.iter().map(BTreeSet::len).max().unwrap_or(0);
        let keyword_ceiling = weights.keyword_weight * max_keywords as f64 + weights.topic_boost;
        if keyword_ceiling >= weights.phrase_weight {
            warn!(
                phrase_weight = weights.phrase_weight,
                keyword_ceiling,
                "trigger weights let keywords outscore a phrase; ranking still prefers phrases"
            );
        }

        Ok(Self {
            workflows,
            phrases,
            keywords,
            domains,
            weights,
        })
    }

    /// Score every active template that the message hits at all, in
    /// declaration order.
    pub fn score(&self, message: &str, recent_topics: &[String]) -> Vec<TriggerScore> {
        let mut phrase_hits: HashMap<usize, usize> = HashMap::new();
        for hit in self.phrases.find(message) {
            *phrase_hits.entry(hit.owner).or_default() += 1;
        }

        let words: BTreeSet<String> = tokens(message).collect();
        let topic_words: BTreeSet<String> = recent_topics.iter().flat_map(|t| tokens(t)).collect();

        let w = &self.weights;
        let mut scores = Vec::new();
        for (i, wf) in self.workflows.iter().enumerate() {
            if !wf.template.active {
                continue;
            }
            let phrases = phrase_hits.get(&i).copied().unwrap_or(0);
            let keywords = self.keywords[i].intersection(&words).count();
            let base = w.phrase_weight * phrases as f64 + w.keyword_weight * keywords as f64;
            if base <= 0.0 {
                continue;
            }
            let boosted = !self.domains[i].is_disjoint(&topic_words);
            let score = if boosted { base + w.topic_boost } else { base };
            scores.push(TriggerScore {
                template_id: wf.template.id.clone(),
                phrase_hits: phrases,
                keyword_hits: keywords,
                topic_boosted: boosted,
                score,
            });
        }
        scores
    }
}

impl TriggerScore {
    /// Signal strength, compared lexicographically.
    fn rank(&self) -> (usize, usize, bool) {
        (self.phrase_hits, self.keyword_hits, self.topic_boosted)
    }
}

impl TriggerDetector for KeywordTriggerDetector {
    fn detect(&self, message: &str, recent_topics: &[String]) -> Option<Arc<RegisteredWorkflow>> {
        let scores = self.score(message, recent_topics);

        let mut best: Option<&TriggerScore> = None;
        for candidate in scores.iter().filter(|s| s.score >= self.weights.min_score) {
            // Strictly greater: an equal rank never displaces an earlier template.
            if best.is_none_or(|b| candidate.rank() > b.rank()) {
                best = Some(candidate);
            }
        }

        let best = best?;
        debug!(
            template_id = %best.template_id,
            score = best.score,
            phrase_hits = best.phrase_hits,
            keyword_hits = best.keyword_hits,
            topic_boosted = best.topic_boosted,
            "workflow trigger matched"
        );
        self.workflows
            .iter()
            .find(|wf| wf.template.id == best.template_id)
            .cloned()
    }
}

/// Lowercased alphanumeric tokens with a crude plural strip
/// ("tasks" and "task" compare equal).
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let lower = t.to_lowercase();
            match lower.strip_suffix('s') {
                Some(stem) if lower.len() > 3 && !stem.ends_with('s') => stem.to_string(),
                _ => lower,
            }
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
