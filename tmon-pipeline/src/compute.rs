//! Corpus assembly and topic extraction
//!
//! [`ComputeTrigger::run`] turns buffered articles into a corpus of
//! `(id, label, text)` documents, hands it to the [`ComputeEngine`] through
//! the retry policy, and reassembles one [`TopicResult`] per distinct input
//! article. The run either yields a result for every article or fails as a
//! whole; partial results are never returned.
//!
//! **Non-determinism:** topic extraction is typically randomized. Unless
//! [`ComputeParameters::seed`] is set and the engine honours it, the same
//! corpus can produce different topics on different runs, including a
//! re-flush of a retained buffer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tmon_common::config::AccumulatorConfig;
use tmon_common::{Article, CorpusDocument, TopicResult};

use crate::collaborators::{ComputeEngine, ComputeParameters};
use crate::delivery::RetryPolicy;
use crate::error::PipelineError;

#[derive(Clone)]
pub struct ComputeTrigger {
    engine: Arc<dyn ComputeEngine>,
    retry: RetryPolicy,
    params: ComputeParameters,
}

impl ComputeTrigger {
    pub fn new(engine: Arc<dyn ComputeEngine>, retry: RetryPolicy, params: ComputeParameters) -> Self {
        Self {
            engine,
            retry,
            params,
        }
    }

    pub fn parameters_from_config(config: &AccumulatorConfig) -> ComputeParameters {
        ComputeParameters {
            num_topics: config.num_topics,
            num_top_words: config.num_top_words,
            seed: config.seed,
        }
    }

    pub fn parameters(&self) -> &ComputeParameters {
        &self.params
    }

    /// Run topic extraction over `articles`
    ///
    /// Duplicate article ids (possible after an at-least-once redelivery)
    /// collapse to their first occurrence. An empty input returns no results
    /// without calling the engine.
    pub async fn run(&self, articles: &[Article]) -> Result<Vec<TopicResult>, PipelineError> {
        let distinct = dedupe_by_id(articles);
        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let corpus: Vec<CorpusDocument> = distinct.iter().map(|a| CorpusDocument::from(*a)).collect();

        tracing::info!(
            documents = corpus.len(),
            duplicates = articles.len() - distinct.len(),
            num_topics = self.params.num_topics,
            seeded = self.params.seed.is_some(),
            "Running topic extraction"
        );

        let topics = self
            .retry
            .attempt("compute", || self.engine.extract_topics(&corpus, &self.params))
            .await
            .map_err(|e| match e {
                PipelineError::Compute(_) => e,
                other => PipelineError::Compute(other.to_string()),
            })?;

        let mut by_id: HashMap<String, Vec<Vec<String>>> = topics
            .into_iter()
            .map(|doc| (doc.id, doc.top_words))
            .collect();

        let mut results = Vec::with_capacity(distinct.len());
        for article in distinct {
            let top_words = by_id.remove(&article.id).ok_or_else(|| {
                PipelineError::Compute(format!(
                    "engine returned no topics for document {}",
                    article.id
                ))
            })?;
            results.push(TopicResult::new(article, top_words));
        }

        if !by_id.is_empty() {
            tracing::warn!(
                unknown = by_id.len(),
                "Engine returned topics for documents outside the corpus, ignoring"
            );
        }

        Ok(results)
    }
}

fn dedupe_by_id(articles: &[Article]) -> Vec<&Article> {
    let mut seen = HashSet::new();
    articles
        .iter()
        .filter(|a| seen.insert(a.id.as_str()))
        .collect()
}
