use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::domain::context::{
    ExternalContext, ExternalEntry, ExternalOmission, ExternalTextOrigin,
    OmissionReason, char_len, truncate_with_marker,
};
use crate::domain::ticket::ExternalReference;
use crate::services::{LanguageModelService, ReferenceDocument, ReferenceFetcher};
use crate::workflow::retry::{CallKind, RetryPolicy};

/// Smallest per-reference text allowance when many references share the budget.
const MIN_SUB_BUDGET: usize = 500;

/// What to do with one fetched document before it is budgeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAction {
    KeepRaw,
    Summarize,
    Truncate,
}

impl TextAction {
    /// | over sub-budget | summarization on | action    |
    /// |-----------------|------------------|-----------|
    /// | no              | any              | keep raw  |
    /// | yes             | yes              | summarize |
    /// | yes             | no               | truncate  |
    pub fn decide(text_chars: usize, sub_budget: usize, summarize: bool) -> Self {
        match (text_chars > sub_budget, summarize) {
            (false, _) => TextAction::KeepRaw,
            (true, true) => TextAction::Summarize,
            (true, false) => TextAction::Truncate,
        }
    }
}

pub struct ExternalContextFetcher {
    fetcher: Arc<dyn ReferenceFetcher>,
    summarizer: Option<Arc<dyn LanguageModelService>>,
    budget: usize,
    fetch_timeout: Duration,
    retry: RetryPolicy,
    max_output_tokens: u32,
}

impl ExternalContextFetcher {
    /// `summarizer` is only consulted when summarization is enabled.
    pub fn new(
        config: &PipelineConfig,
        fetcher: Arc<dyn ReferenceFetcher>,
        summarizer: Arc<dyn LanguageModelService>,
    ) -> Self {
        Self {
            fetcher,
            summarizer: config.summarize_external.then_some(summarizer),
            budget: config.external_budget,
            fetch_timeout: config.external_fetch_timeout,
            retry: RetryPolicy::once(config.retry_backoff),
            max_output_tokens: config.max_output_tokens,
        }
    }

    #[instrument(skip_all, fields(references = references.len(), budget = self.budget))]
    pub async fn gather(&self, references: &[ExternalReference]) -> ExternalContext {
        let mut context = ExternalContext::empty(self.budget);
        if references.is_empty() {
            return context;
        }

        let fetched = join_all(references.iter().map(|reference| self.fetch_one(reference))).await;

        let mut documents = Vec::new();
        for (reference, result) in references.iter().zip(fetched) {
            match result {
                Ok(document) => documents.push((reference, document)),
                Err(reason) => {
                    warn!(url = %reference.url, %reason, "external reference omitted");
                    context.omitted.push(ExternalOmission {
                        url: reference.url.clone(),
                        reason,
                    });
                }
            }
        }
        if documents.is_empty() {
            return context;
        }

        let share = (self.budget / documents.len()).max(MIN_SUB_BUDGET);
        for (reference, document) in documents {
            let label = format!("{}: {}", reference.kind.label(), document.title);
            let frame = ExternalEntry {
                url: reference.url.clone(),
                label: label.clone(),
                text: String::new(),
                origin: ExternalTextOrigin::Raw,
            }
            .rendered_len();
            if context.budget.remaining() <= frame {
                warn!(url = %reference.url, "external context budget exhausted; reference skipped");
                context.omitted.push(ExternalOmission {
                    url: reference.url.clone(),
                    reason: OmissionReason::BudgetExhausted,
                });
                continue;
            }
            let sub_budget = share.min(self.budget).saturating_sub(frame);
            let (text, origin) = self.condense(&label, &document.text, sub_budget).await;
            let entry = ExternalEntry {
                url: reference.url.clone(),
                label,
                text,
                origin,
            };
            if context.budget.try_consume(entry.rendered_len()) {
                debug!(
                    url = %entry.url,
                    chars = entry.rendered_len(),
                    ?origin,
                    "external reference included"
                );
                context.entries.push(entry);
            } else {
                warn!(url = %entry.url, "external context budget exhausted; reference dropped");
                context.omitted.push(ExternalOmission {
                    url: entry.url,
                    reason: OmissionReason::BudgetExhausted,
                });
            }
        }

        info!(
            included = context.entries.len(),
            omitted = context.omitted.len(),
            chars = context.budget.used(),
            limit = context.budget.limit(),
            "external context gathered"
        );
        context
    }

    async fn fetch_one(
        &self,
        reference: &ExternalReference,
    ) -> Result<ReferenceDocument, OmissionReason> {
        let fetcher = &self.fetcher;
        let attempt = self
            .retry
            .run("fetch external reference", CallKind::ReadOnly, move || {
                fetcher.fetch(reference)
            });
        match tokio::time::timeout(self.fetch_timeout, attempt).await {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(error)) => Err(OmissionReason::FetchFailed(error.to_string())),
            Err(_) => Err(OmissionReason::TimedOut),
        }
    }

    async fn condense(
        &self,
        label: &str,
        text: &str,
        sub_budget: usize,
    ) -> (String, ExternalTextOrigin) {
        let action = TextAction::decide(char_len(text), sub_budget, self.summarizer.is_some());
        match (action, &self.summarizer) {
            (TextAction::Summarize, Some(model)) => {
                let prompt = summary_prompt(label, text, sub_budget);
                match model.complete(&prompt, self.max_output_tokens).await {
                    Ok(summary) if !summary.trim().is_empty() => (
                        truncate_with_marker(summary.trim(), sub_budget),
                        ExternalTextOrigin::Summarized,
                    ),
                    Ok(_) => {
                        warn!(label, "summary came back empty; truncating instead");
                        (truncate_with_marker(text, sub_budget), ExternalTextOrigin::Truncated)
                    }
                    Err(error) => {
                        warn!(label, %error, "summarization failed; truncating instead");
                        (truncate_with_marker(text, sub_budget), ExternalTextOrigin::Truncated)
                    }
                }
            }
            (TextAction::KeepRaw, _) => (text.to_string(), ExternalTextOrigin::Raw),
            _ => (truncate_with_marker(text, sub_budget), ExternalTextOrigin::Truncated),
        }
    }
}

fn summary_prompt(label: &str, text: &str, char_limit: usize) -> String {
    format!(
        "You are assisting in software development. Summarize the following reference material \
         titled '{label}' into a concise developer brief under {char_limit} characters. \
         Capture only the most relevant requirements, interfaces, decisions, and constraints. \
         Do not include code fences or markdown, just plain text.\n\n\
         --- BEGIN REFERENCE ---\n{text}\n--- END REFERENCE ---\n"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::ticket::ExternalReferenceKind;
    use crate::error::{AppError, AppResult};

    struct FakeFetcher {
        documents: HashMap<String, String>,
        hang: Vec<String>,
    }

    #[async_trait]
    impl ReferenceFetcher for FakeFetcher {
        async fn fetch(&self, reference: &ExternalReference) -> AppResult<ReferenceDocument> {
            if self.hang.contains(&reference.url) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.documents
                .get(&reference.url)
                .map(|text| ReferenceDocument {
                    title: "Doc".to_string(),
                    text: text.clone(),
                })
                .ok_or_else(|| AppError::SourceHost(format!("404 for {}", reference.url)))
        }
    }

    struct FakeModel {
        reply: AppResult<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModelService for FakeModel {
        async fn complete(&self, prompt: &str, _max_output_tokens: u32) -> AppResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AppError::LanguageModel("boom".to_string())),
            }
        }
    }

    fn wiki(url: &str) -> ExternalReference {
        ExternalReference {
            url: url.to_string(),
            kind: ExternalReferenceKind::WikiPage,
        }
    }

    fn config(budget: usize, summarize: bool) -> PipelineConfig {
        PipelineConfig {
            external_budget: budget,
            summarize_external: summarize,
            external_fetch_timeout: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn fetcher_for(
        config: &PipelineConfig,
        documents: &[(&str, String)],
        hang: &[&str],
        reply: AppResult<String>,
    ) -> (ExternalContextFetcher, Arc<FakeModel>) {
        let model = Arc::new(FakeModel {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let fetcher = Arc::new(FakeFetcher {
            documents: documents
                .iter()
                .map(|(url, text)| (url.to_string(), text.clone()))
                .collect(),
            hang: hang.iter().map(|url| url.to_string()).collect(),
        });
        (
            ExternalContextFetcher::new(config, fetcher, model.clone()),
            model,
        )
    }

    #[test]
    fn text_action_table() {
        assert_eq!(TextAction::decide(10, 100, true), TextAction::KeepRaw);
        assert_eq!(TextAction::decide(101, 100, true), TextAction::Summarize);
        assert_eq!(TextAction::decide(101, 100, false), TextAction::Truncate);
    }

    #[tokio::test]
    async fn timed_out_reference_is_omitted_not_fatal() {
        let config = config(6000, false);
        let (fetcher, _) = fetcher_for(
            &config,
            &[("https://wiki/confluence/a", "design notes".to_string())],
            &["https://wiki/confluence/slow"],
            Ok(String::new()),
        );
        let context = fetcher
            .gather(&[wiki("https://wiki/confluence/slow"), wiki("https://wiki/confluence/a")])
            .await;
        assert_eq!(context.entries.len(), 1);
        assert_eq!(context.entries[0].text, "design notes");
        assert_eq!(
            context.omitted,
            vec![ExternalOmission {
                url: "https://wiki/confluence/slow".to_string(),
                reason: OmissionReason::TimedOut,
            }]
        );
    }

    #[tokio::test]
    async fn failed_fetch_is_recorded() {
        let config = config(6000, false);
        let (fetcher, _) = fetcher_for(&config, &[], &[], Ok(String::new()));
        let context = fetcher.gather(&[wiki("https://wiki/confluence/gone")]).await;
        assert!(context.entries.is_empty());
        assert!(matches!(context.omitted[0].reason, OmissionReason::FetchFailed(_)));
    }

    #[tokio::test]
    async fn summarizes_long_documents_within_sub_budget() {
        let config = config(2000, true);
        let (fetcher, model) = fetcher_for(
            &config,
            &[("https://wiki/confluence/long", "x".repeat(5000))],
            &[],
            Ok("short brief".to_string()),
        );
        let context = fetcher.gather(&[wiki("https://wiki/confluence/long")]).await;
        assert_eq!(context.entries[0].text, "short brief");
        assert_eq!(context.entries[0].origin, ExternalTextOrigin::Summarized);
        assert!(model.prompts.lock().unwrap()[0].contains("concise developer brief"));
    }

    #[tokio::test]
    async fn summarization_failure_falls_back_to_marked_truncation() {
        let config = config(1000, true);
        let (fetcher, _) = fetcher_for(
            &config,
            &[("https://wiki/confluence/long", "y".repeat(5000))],
            &[],
            Err(AppError::LanguageModel("down".to_string())),
        );
        let context = fetcher.gather(&[wiki("https://wiki/confluence/long")]).await;
        let entry = &context.entries[0];
        assert_eq!(entry.origin, ExternalTextOrigin::Truncated);
        assert!(entry.text.ends_with(crate::domain::context::TRUNCATION_MARKER));
        assert!(context.budget.used() <= 1000);
    }

    #[tokio::test]
    async fn full_budget_skips_summarizing_later_references() {
        let config = config(500, true);
        let (fetcher, model) = fetcher_for(
            &config,
            &[
                ("https://wiki/confluence/one", "a".repeat(5000)),
                ("https://wiki/confluence/two", "c".repeat(5000)),
            ],
            &[],
            Ok("b".repeat(2000)),
        );
        let context = fetcher
            .gather(&[wiki("https://wiki/confluence/one"), wiki("https://wiki/confluence/two")])
            .await;
        assert_eq!(context.entries.len(), 1);
        assert_eq!(
            context.omitted,
            vec![ExternalOmission {
                url: "https://wiki/confluence/two".to_string(),
                reason: OmissionReason::BudgetExhausted,
            }]
        );
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn total_external_text_never_exceeds_budget() {
        for budget in [0, 200, 700, 1500, 6000] {
            let config = config(budget, false);
            let docs = (0..6)
                .map(|i| (format!("https://wiki/confluence/{i}"), "z".repeat(900 + i * 50)))
                .collect::<Vec<_>>();
            let doc_refs = docs
                .iter()
                .map(|(url, text)| (url.as_str(), text.clone()))
                .collect::<Vec<_>>();
            let (fetcher, _) = fetcher_for(&config, &doc_refs, &[], Ok(String::new()));
            let references = docs.iter().map(|(url, _)| wiki(url)).collect::<Vec<_>>();
            let context = fetcher.gather(&references).await;
            let rendered = context
                .entries
                .iter()
                .map(ExternalEntry::rendered_len)
                .sum::<usize>();
            assert!(rendered <= budget, "budget {budget} exceeded: {rendered}");
            assert_eq!(rendered, context.budget.used());
            assert_eq!(context.entries.len() + context.omitted.len(), references.len());
        }
    }
}
