//! Merging per-backend outcomes into one ranked result
//!
//! Pipeline: flatten (tagging each record with its backend) -> count per
//! backend -> dedup -> filter -> cross reference -> rank -> truncate.
//!
//! Backends are visited in alphabetical order of their names, which makes
//! "first encountered" well defined for dedup ties and ranking ties.

use crate::backend::{clamp_confidence, KnowledgeRecord};
use crate::cache::key::{content_hash, query_fingerprint};
use crate::fanout::Outcome;
use crate::query::{Query, QueryFilters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Confidence gap under which two records are ranked by lexical relevance
pub const RELEVANCE_EPSILON: f64 = 0.1;

/// Bonus added when the whole query text appears verbatim in a record
pub const VERBATIM_BONUS: f64 = 0.5;

/// Merged answer to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Query text the result was computed for
    pub query: String,
    /// Fingerprint of the query text and filters
    pub fingerprint: String,
    /// Ranked records, truncated to the query limit
    pub results: Vec<KnowledgeRecord>,
    /// Records that survived dedup and filtering, before truncation
    pub total_found: usize,
    /// Records returned by each backend before dedup; 0 for failed backends
    pub sources: BTreeMap<String, usize>,
    pub served_from_cache: bool,
    pub generated_at: DateTime<Utc>,
}

impl AggregateResult {
    /// Result with no records; every listed backend counts zero
    pub fn empty(query: &Query, backends: impl IntoIterator<Item = String>) -> Self {
        Self {
            query: query.text.clone(),
            fingerprint: query_fingerprint(query),
            results: Vec::new(),
            total_found: 0,
            sources: backends.into_iter().map(|b| (b, 0)).collect(),
            served_from_cache: false,
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupKey {
    Id(String),
    Content(String),
}

impl DedupKey {
    fn of(record: &KnowledgeRecord) -> Self {
        match record.dedup_id() {
            Some(id) => DedupKey::Id(id.to_string()),
            None => DedupKey::Content(content_hash(&record.content)),
        }
    }
}

/// One dedup group: the surviving record plus every backend that returned it
struct Group {
    best: KnowledgeRecord,
    seen_in: Vec<String>,
}

/// Stateless merger; see module docs for the pipeline
#[derive(Debug, Clone, Default)]
pub struct ResultMerger;

impl ResultMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(&self, query: &Query, outcomes: &BTreeMap<String, Outcome>) -> AggregateResult {
        let filters = query.filters();

        let mut sources = BTreeMap::new();
        let mut flattened = Vec::new();
        for (backend, outcome) in outcomes {
            sources.insert(backend.clone(), outcome.result_count());
            if let Outcome::Success { results, .. } = outcome {
                flattened.extend(results.iter().cloned().map(|mut record| {
                    record.backend = backend.clone();
                    record.confidence = clamp_confidence(record.confidence);
                    record.also_found_in.clear();
                    record
                }));
            }
        }
        let returned = flattened.len();

        let groups = dedup(flattened);
        let unique = groups.len();

        let mut survivors: Vec<KnowledgeRecord> = groups
            .into_iter()
            .filter(|group| passes_filters(&group.best, &filters))
            .map(|group| {
                let Group { mut best, seen_in } = group;
                if query.options.cross_reference {
                    best.also_found_in = seen_in
                        .into_iter()
                        .filter(|backend| *backend != best.backend)
                        .collect();
                }
                best
            })
            .collect();

        rank(&mut survivors, query);

        let total_found = survivors.len();
        survivors.truncate(query.options.limit);

        debug!(
            returned,
            unique,
            total_found,
            kept = survivors.len(),
            "Merged backend outcomes"
        );

        AggregateResult {
            query: query.text.clone(),
            fingerprint: query_fingerprint(query),
            results: survivors,
            total_found,
            sources,
            served_from_cache: false,
            generated_at: Utc::now(),
        }
    }
}

/// Group by id (or content hash) and keep the most confident record.
/// Ties keep the record seen first. Group order is first-seen order.
fn dedup(records: Vec<KnowledgeRecord>) -> Vec<Group> {
    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for record in records {
        let key = DedupKey::of(&record);
        match index.get(&key) {
            Some(&at) => {
                let group = &mut groups[at];
                if !group.seen_in.contains(&record.backend) {
                    group.seen_in.push(record.backend.clone());
                }
                if record.confidence > group.best.confidence {
                    group.best = record;
                }
            }
            None => {
                index.insert(key, groups.len());
                groups.push(Group {
                    seen_in: vec![record.backend.clone()],
                    best: record,
                });
            }
        }
    }

    groups
}

fn passes_filters(record: &KnowledgeRecord, filters: &QueryFilters) -> bool {
    if let Some(min) = filters.min_confidence {
        if record.confidence < min {
            return false;
        }
    }
    filters.allows_content_type(record.content_type())
}

/// Share of query terms found in the content, plus a bonus when the whole
/// query text appears verbatim. Zero for an empty query.
pub fn relevance_score(query: &Query, content: &str) -> f64 {
    let terms = query.terms();
    if terms.is_empty() {
        return 0.0;
    }

    let content = content.to_lowercase();
    let mut score = terms
        .iter()
        .filter(|term| content.contains(term.as_str()))
        .count() as f64;

    let phrase = query.text.trim().to_lowercase();
    if !phrase.is_empty() && content.contains(&phrase) {
        score += VERBATIM_BONUS;
    }

    score / terms.len() as f64
}

/// Whether `a` should be placed before `b`
fn ranks_before(a: &(KnowledgeRecord, f64), b: &(KnowledgeRecord, f64)) -> bool {
    let (record_a, relevance_a) = a;
    let (record_b, relevance_b) = b;

    if (record_a.confidence - record_b.confidence).abs() < RELEVANCE_EPSILON {
        relevance_a > relevance_b
    } else {
        record_a.confidence > record_b.confidence
    }
}

/// Stable insertion sort. The epsilon comparison is not transitive, so this
/// avoids handing it to `sort_by`, which expects a total order.
fn rank(records: &mut Vec<KnowledgeRecord>, query: &Query) {
    let mut scored: Vec<(KnowledgeRecord, f64)> = records
        .drain(..)
        .map(|record| {
            let relevance = relevance_score(query, &record.content);
            (record, relevance)
        })
        .collect();

    for i in 1..scored.len() {
        let mut j = i;
        while j > 0 && ranks_before(&scored[j], &scored[j - 1]) {
            scored.swap(j, j - 1);
            j -= 1;
        }
    }

    records.extend(scored.into_iter().map(|(record, _)| record));
}
