//! Grounded answer synthesis.
//!
//! [`AnswerSynthesizer`] turns a query plus its retrieved chunks into the
//! final user-facing text. Every path produces an [`Answer`]; nothing here
//! returns an error to the caller.
//!
//! # Outcomes
//!
//! | Outcome | When | Text |
//! |---------|------|------|
//! | [`AnswerOutcome::NoContext`] | retrieval returned nothing | [`NO_CONTEXT_MESSAGE`] + disclaimer |
//! | [`AnswerOutcome::OffTopic`] | strict mode and the query is not in the context | [`NOT_IN_DOCUMENTS_MESSAGE`] + disclaimer |
//! | [`AnswerOutcome::Answered`] | the model replied | answer + citation line + disclaimer |
//! | [`AnswerOutcome::HighTraffic`] | 429 or transport failures exhausted the budget | [`HIGH_TRAFFIC_MESSAGE`] |
//! | [`AnswerOutcome::TechnicalIssue`] | any other upstream failure | [`TECHNICAL_ISSUE_MESSAGE`] |
//!
//! The citation line is always built from the retrieval hits, never taken
//! from the model. A trailing `Citations:` line written by the model is
//! replaced.

use std::sync::Arc;

use serde::Serialize;

use pagewise_core::models::RetrievalHit;

use crate::completion::{ChatMessage, CompletionClient, CompletionError, CompletionRequest};
use crate::config::{CitationGrouping, CompletionConfig};
use crate::retry::{with_retry, RetryOutcome, RetryPolicy};

pub const NO_CONTEXT_MESSAGE: &str = "Sorry, no relevant information found in the uploaded PDFs.";
pub const NOT_IN_DOCUMENTS_MESSAGE: &str =
    "Sorry, this information was not found in the uploaded documentation.";
pub const HIGH_TRAFFIC_MESSAGE: &str =
    "We are currently experiencing high traffic. Please try again later.";
pub const TECHNICAL_ISSUE_MESSAGE: &str =
    "We are currently experiencing technical issues. Please try again later.";
pub const DISCLAIMER: &str = "Disclaimer: This answer is for informational purposes only. \
Please consult a qualified professional before acting on it.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Always answer clearly and \
conversationally, and cite page numbers at the end of the response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    NoContext,
    OffTopic,
    Answered,
    HighTraffic,
    TechnicalIssue,
}

impl AnswerOutcome {
    /// True when the completion service could not produce an answer.
    pub fn is_degraded(&self) -> bool {
        matches!(self, AnswerOutcome::HighTraffic | AnswerOutcome::TechnicalIssue)
    }
}

/// Pages cited from one source document, in retrieval order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub source: String,
    pub pages: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub outcome: AnswerOutcome,
    /// The model's answer, or the fallback message.
    pub body: String,
    /// Empty unless the outcome is `Answered`.
    pub citations: Vec<Citation>,
    /// Completion attempts made; zero when no request was sent.
    pub attempts: u32,
    #[serde(skip)]
    grouping: CitationGrouping,
}

impl Answer {
    pub(crate) fn fallback(outcome: AnswerOutcome, body: &str, attempts: u32) -> Self {
        Self {
            outcome,
            body: body.to_string(),
            citations: Vec::new(),
            attempts,
            grouping: CitationGrouping::default(),
        }
    }

    /// The final text shown to the user.
    pub fn formatted(&self) -> String {
        match self.outcome {
            AnswerOutcome::NoContext | AnswerOutcome::OffTopic => {
                format!("{}\n\n{}", self.body, DISCLAIMER)
            }
            AnswerOutcome::Answered => format!(
                "{}\n\n{}\n\n{}",
                self.body,
                citation_line(&self.citations, self.grouping),
                DISCLAIMER
            ),
            AnswerOutcome::HighTraffic | AnswerOutcome::TechnicalIssue => self.body.clone(),
        }
    }
}

/// Settings that vary between deployments of the same pipeline.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub model_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub strict_context_match: bool,
    pub citation_grouping: CitationGrouping,
    pub system_prompt: Option<String>,
}

impl From<&CompletionConfig> for SynthesisSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            strict_context_match: config.strict_context_match,
            citation_grouping: config.citation_grouping,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

pub struct AnswerSynthesizer {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    settings: SynthesisSettings,
}

impl AnswerSynthesizer {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        policy: RetryPolicy,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            client,
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Produce an answer for `query` grounded in `hits`.
    pub async fn synthesize(&self, query: &str, hits: &[RetrievalHit]) -> Answer {
        if hits.is_empty() {
            return Answer::fallback(AnswerOutcome::NoContext, NO_CONTEXT_MESSAGE, 0);
        }

        if self.settings.strict_context_match && !context_mentions_query(query, hits) {
            tracing::info!("query text not present in retrieved context, skipping generation");
            return Answer::fallback(AnswerOutcome::OffTopic, NOT_IN_DOCUMENTS_MESSAGE, 0);
        }

        let request = self.build_request(query, hits);
        let client = self.client.clone();
        let outcome = with_retry(&self.policy, || {
            let client = client.clone();
            let request = &request;
            async move { client.complete(request).await }
        })
        .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => Answer {
                outcome: AnswerOutcome::Answered,
                body: strip_model_citations(&value),
                citations: collect_citations(hits),
                attempts,
                grouping: self.settings.citation_grouping,
            },
            RetryOutcome::Failed {
                last_error,
                attempts,
            } => {
                tracing::warn!(attempts, error = %last_error, "completion failed");
                match last_error {
                    CompletionError::RateLimited | CompletionError::Transport(_) => {
                        Answer::fallback(AnswerOutcome::HighTraffic, HIGH_TRAFFIC_MESSAGE, attempts)
                    }
                    CompletionError::Upstream { .. } | CompletionError::InvalidResponse(_) => {
                        Answer::fallback(
                            AnswerOutcome::TechnicalIssue,
                            TECHNICAL_ISSUE_MESSAGE,
                            attempts,
                        )
                    }
                }
            }
        }
    }

    pub fn build_request(&self, query: &str, hits: &[RetrievalHit]) -> CompletionRequest {
        let system = self
            .settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        CompletionRequest {
            model: self.settings.model_id.clone(),
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(build_prompt(
                    query,
                    hits,
                    self.settings.citation_grouping,
                )),
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}

/// One line per hit, `"{source} | Page {n}: {text}"`, separated by blank lines.
pub fn build_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|h| {
            format!(
                "{} | Page {}: {}",
                h.metadata.source, h.metadata.page_number, h.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(query: &str, hits: &[RetrievalHit], grouping: CitationGrouping) -> String {
    let grouping_rule = match grouping {
        CitationGrouping::PerPage => "",
        CitationGrouping::PerDocument => {
            "- Group multiple pages from the same PDF together in citations if applicable.\n"
        }
    };
    format!(
        "You are a medical assistant chatbot. Answer the user query using ONLY the provided PDF context.\n\
\n\
Rules:\n\
- Use the context below to answer the query.\n\
- If the context does not contain the answer, say so instead of guessing.\n\
- Keep the answer clear.\n\
- At the end, add citations in this format: Citations: page no: <page numbers>\n\
{grouping_rule}\
\n\
Context:\n\
{context}\n\
\n\
Question: {query}\n\
\n\
Answer:",
        context = build_context(hits),
    )
}

/// Case-insensitive literal match of the trimmed query in the joined context.
pub fn context_mentions_query(query: &str, hits: &[RetrievalHit]) -> bool {
    let needle = query.trim().to_lowercase();
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
        .contains(&needle)
}

/// Distinct pages per source, sources and pages in order of first retrieval.
pub fn collect_citations(hits: &[RetrievalHit]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for hit in hits {
        let page = hit.metadata.page_number;
        match citations
            .iter_mut()
            .find(|c| c.source == hit.metadata.source)
        {
            Some(c) => {
                if !c.pages.contains(&page) {
                    c.pages.push(page);
                }
            }
            None => citations.push(Citation {
                source: hit.metadata.source.clone(),
                pages: vec![page],
            }),
        }
    }
    citations
}

/// Render the citation line.
///
/// Per-page lists distinct page numbers, taking sources in order of first
/// retrieval and each source's pages in retrieval order; per-document
/// renders the same grouping with the source file names.
pub fn citation_line(citations: &[Citation], grouping: CitationGrouping) -> String {
    match grouping {
        CitationGrouping::PerPage => {
            let mut pages: Vec<u32> = Vec::new();
            for p in citations.iter().flat_map(|c| c.pages.iter().copied()) {
                if !pages.contains(&p) {
                    pages.push(p);
                }
            }
            format!("Citations: page no: {}", join_pages(&pages))
        }
        CitationGrouping::PerDocument => {
            let groups: Vec<String> = citations
                .iter()
                .map(|c| {
                    let label = if c.pages.len() == 1 { "page" } else { "pages" };
                    format!("{} ({} {})", c.source, label, join_pages(&c.pages))
                })
                .collect();
            format!("Citations: {}", groups.join("; "))
        }
    }
}

fn join_pages(pages: &[u32]) -> String {
    pages
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drop the citation block the model added on its own: everything from
/// the last line that opens with `Citations:` to the end of the text.
fn strip_model_citations(text: &str) -> String {
    let mut cut = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if is_citation_heading(line) {
            cut = Some(offset);
        }
        offset += line.len();
    }
    let kept = match cut {
        Some(at) => &text[..at],
        None => text,
    };
    kept.trim_end().to_string()
}

/// `Citations:`, ignoring case and leading markdown emphasis or heading marks.
fn is_citation_heading(line: &str) -> bool {
    line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '_'))
        .to_lowercase()
        .starts_with("citations:")
}
