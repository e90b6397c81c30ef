//! Context-injection policy.
//!
//! Decides whether a user query deserves a documentation lookup at all, and
//! if so renders the accepted passages into one bounded text block that is
//! appended to a system prompt.
//!
//! Small talk, session commands and very short queries never trigger a
//! search.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ContextConfig;
use crate::models::{InjectionResult, SearchResult};
use crate::search::{SearchOptions, SearchService};
use crate::text::truncate_chars;

const GREETINGS: &[&str] = &[
    "bonjour", "salut", "hello", "hi", "hey", "coucou", "merci", "thanks", "ok", "bonsoir", "yo",
];

const SESSION_COMMANDS: &[&str] = &["exit", "quit", "clear", "help"];

const ELLIPSIS: &str = "...";

pub struct ContextInjector {
    search: Arc<SearchService>,
    settings: ContextConfig,
}

fn format_passage(result: &SearchResult, display_chars: usize) -> String {
    let content = result.content.trim();
    let shown = truncate_chars(content, display_chars);
    let marker = if shown.len() < content.len() { ELLIPSIS } else { "" };
    format!(
        "[{}] ({}, {}% pertinent): {}{}",
        result.filename,
        result.topic,
        (result.combined_score * 100.0).round() as i64,
        shown,
        marker
    )
}

impl ContextInjector {
    pub fn new(search: Arc<SearchService>, settings: ContextConfig) -> Self {
        Self { search, settings }
    }

    /// Whether `query` should trigger a documentation lookup.
    pub fn should_inject(&self, query: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let trimmed = query.trim();
        if trimmed.chars().count() < self.settings.min_query_chars {
            return false;
        }

        let lowered = trimmed.to_lowercase();
        let normalized = lowered.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
        if GREETINGS.contains(&normalized) {
            return false;
        }

        let first_word = normalized
            .split(|c: char| !c.is_alphanumeric())
            .next()
            .unwrap_or_default();
        !SESSION_COMMANDS.contains(&first_word)
    }

    pub async fn get_context_for_query(&self, query: &str) -> InjectionResult {
        if !self.should_inject(query) {
            return InjectionResult::default();
        }

        let started = Instant::now();
        let options = SearchOptions {
            top_k: Some(self.settings.top_k),
            rerank: true,
            topic: None,
        };
        let response = self.search.search(query, &options).await;
        let search_time_ms = started.elapsed().as_millis() as u64;

        let accepted: Vec<&SearchResult> = response
            .results
            .iter()
            .filter(|r| r.combined_score >= self.settings.min_score)
            .collect();
        if accepted.is_empty() {
            tracing::debug!(found = response.total_found, "no passage above the context threshold");
            return InjectionResult {
                search_time_ms,
                ..Default::default()
            };
        }

        let relevance_score =
            accepted.iter().map(|r| r.combined_score).sum::<f64>() / accepted.len() as f64;

        let mut seen = HashSet::new();
        let sources: Vec<String> = accepted
            .iter()
            .filter(|r| seen.insert(r.source.as_str()))
            .map(|r| r.source.clone())
            .collect();

        let mut context = accepted
            .iter()
            .map(|r| format_passage(r, self.settings.passage_display_chars))
            .collect::<Vec<_>>()
            .join("\n\n");
        if context.chars().count() > self.settings.max_chars {
            let keep = self.settings.max_chars.saturating_sub(ELLIPSIS.len());
            context = format!("{}{}", truncate_chars(&context, keep), ELLIPSIS);
        }

        tracing::info!(
            passages = accepted.len(),
            relevance = relevance_score,
            chars = context.chars().count(),
            "context injected"
        );
        InjectionResult {
            context: Some(context),
            sources,
            relevance_score,
            search_time_ms,
            injected: true,
        }
    }

    /// Append relevant context to `system_prompt`, separated by a blank line.
    /// The prompt comes back unchanged when nothing qualifies.
    pub async fn inject_into_prompt(
        &self,
        system_prompt: &str,
        user_query: &str,
    ) -> (String, InjectionResult) {
        let result = self.get_context_for_query(user_query).await;
        let prompt = match &result.context {
            Some(context) if result.injected => format!("{}\n\n{}", system_prompt, context),
            _ => system_prompt.to_string(),
        };
        (prompt, result)
    }
}
