//! # Result Explanations
//!
//! Asks a completion model for a short Markdown guide to a ranked result
//! list. The model only sees title, date, a clipped abstract, and the paper
//! URL of each result, in display order.

use std::future::Future;

use rig::{
    agent::{Agent, AgentBuilder},
    completion::{Chat, CompletionModel},
};
use tracing::{debug, instrument};

use super::{RankedResult, SearchError};

/// Longest abstract passed to the model, in characters
const ABSTRACT_LIMIT: usize = 1500;

const PREAMBLE: &str = "You explain a fixed, non-interactive list of research papers \
returned for a search query.

Produce one compact Markdown panel:
1. List every paper 1..N in the given order. Do not re-rank or omit any.
   For each: `[**Title**](URL)`, then one italic line on why it belongs, then a \
2-3 sentence summary (problem, approach, takeaway).
2. End with a short \"How these fit together\" section of 2-3 bullets.
3. If the matches look weak overall, add one refined query of at most 8 words.

Use only the given title, date, abstract, and URL. Do not invent authors, venues, \
datasets, metrics, or results. If an abstract is empty, say the summary is inferred \
from the title only. No scores, no code fences, no emojis.";

/// Produces an explanation for a result list
pub trait Explain: Send + Sync {
    /// `Ok(None)` when explanations are not available
    fn explain(
        &self,
        query: &str,
        results: &[RankedResult],
    ) -> impl Future<Output = Result<Option<String>, SearchError>> + Send;
}

/// Explainer that never explains
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExplainer;

impl Explain for NoExplainer {
    async fn explain(
        &self,
        _query: &str,
        _results: &[RankedResult],
    ) -> Result<Option<String>, SearchError> {
        Ok(None)
    }
}

/// Explains results with a `rig` agent
pub struct Explainer<M: CompletionModel> {
    agent: Agent<M>,
}

impl<M: CompletionModel> Explainer<M> {
    pub fn new(model: M) -> Self {
        let preamble = format!(
            "{}\n\nToday is {}. Use it with the publication dates when discussing recency.",
            PREAMBLE,
            chrono::Utc::now().format("%Y-%m-%d")
        );
        Self {
            agent: AgentBuilder::new(model).preamble(&preamble).build(),
        }
    }
}

impl<M: CompletionModel> Explain for Explainer<M> {
    #[instrument(skip(self, results), fields(results = results.len()))]
    async fn explain(
        &self,
        query: &str,
        results: &[RankedResult],
    ) -> Result<Option<String>, SearchError> {
        let prompt = user_prompt(query, results);
        debug!("Requesting explanation ({} chars of context)", prompt.len());
        let response = self
            .agent
            .chat(prompt.as_str(), Vec::new())
            .await
            .map_err(|e| SearchError::Explanation(e.to_string()))?;
        Ok(Some(response.trim().to_string()))
    }
}

fn user_prompt(query: &str, results: &[RankedResult]) -> String {
    let rows: Vec<String> = results
        .iter()
        .map(|r| {
            let doc = &r.document;
            let or_none = |s: &str| if s.is_empty() { "None".to_string() } else { s.to_string() };
            format!(
                "Title: {} | Date: {}\nAbstract: {}\nURL: {}\n",
                or_none(&doc.title),
                doc.date.as_deref().map(or_none).unwrap_or_else(|| "None".to_string()),
                clip(&doc.abstract_text, ABSTRACT_LIMIT),
                or_none(&doc.paper_url),
            )
        })
        .collect();

    format!(
        "User query: {}\n\nRetrieved papers (metadata only):\n\n{}\n",
        query,
        rows.join("\n\n")
    )
}

/// Shorten `text` to at most `limit` characters without splitting a word
pub fn clip(text: &str, limit: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(limit) else {
        return text.to_string();
    };
    let head = &text[..cut];
    let head = match head.rfind(' ') {
        Some(space) => &head[..space],
        None => head,
    };
    format!("{}…", head)
}
