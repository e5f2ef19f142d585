//! Submission endpoint resolution.
//!
//! Quiz pages announce where answers go in several inconsistent ways. The
//! resolver walks an ordered list of [`EndpointStrategy`] values and takes the
//! first non-empty candidate. The default order ends with a strategy that
//! always produces something, so a parseable page URL always resolves.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::util::truncate_chars;

/// "Post your answer to https://..." style phrases in visible text. The gap
/// before the URL may not contain `/`, so a phrase never spans another link.
static ANSWER_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:submit|post|send)\b[^\n/]{0,60}?\banswers?\b[^\n/]{0,60}?\bto\s*:?\s*(https?://[^\s"'<>]+)"#,
    )
    .expect("valid regex")
});

/// Looser "submit ... to https://..." phrase, used when no answer phrase exists.
static SUBMIT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:submit|post|send)\b[^\n/]{0,120}?\bto\s*:?\s*(https?://[^\s"'<>]+)"#)
        .expect("valid regex")
});

/// Absolute URLs whose path ends in a submission segment.
static SUBMIT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https?://[^\s"'<>]+?/(?:submit|answer))(?:[/"'\s<>?#]|$)"#)
        .expect("valid regex")
});

/// Absolute URL in a model reply.
static MODEL_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>`]+"#).expect("valid regex"));

/// Root-relative path in a model reply, bare or wrapped in quotes/backticks.
static MODEL_RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s`"'(:=])(/[A-Za-z0-9_\-.~%][^\s"'<>`)]*)"#).expect("valid regex")
});

/// Markup prefix shown to the model when asking for the endpoint.
const MODEL_MARKUP_CHARS: usize = 6000;

const ENDPOINT_PROMPT: &str = "You locate form submission targets in HTML. \
Given page text and markup, reply with ONLY the URL that answers must be POSTed to. \
An absolute URL or a root-relative path (starting with '/') is fine. \
If there is no such target, reply with NONE.";

/// One way of finding the submission URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStrategy {
    /// "submit your answer to <URL>" in the visible text
    ExplicitPhrase,
    /// A URL ending in `/submit` or `/answer` in the markup
    MarkupSubmitPath,
    /// Ask the model to find the POST target
    AskModel,
    /// `<scheme>://<host>/submit` from the current page
    OriginFallback,
}

impl EndpointStrategy {
    pub const DEFAULT_ORDER: [EndpointStrategy; 4] = [
        EndpointStrategy::ExplicitPhrase,
        EndpointStrategy::MarkupSubmitPath,
        EndpointStrategy::AskModel,
        EndpointStrategy::OriginFallback,
    ];
}

/// Everything a strategy may look at.
pub struct EndpointContext<'a> {
    pub text: &'a str,
    pub html: &'a str,
    pub current_url: &'a str,
    pub llm: &'a dyn LlmClient,
    pub model: &'a str,
}

/// Ordered strategy list.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    strategies: Vec<EndpointStrategy>,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(EndpointStrategy::DEFAULT_ORDER.to_vec())
    }
}

impl EndpointResolver {
    pub fn new(strategies: Vec<EndpointStrategy>) -> Self {
        Self { strategies }
    }

    /// First non-empty candidate, with trailing punctuation trimmed.
    pub async fn resolve(&self, ctx: &EndpointContext<'_>) -> Option<String> {
        for strategy in &self.strategies {
            let candidate = match strategy {
                EndpointStrategy::ExplicitPhrase => explicit_phrase(ctx.text),
                EndpointStrategy::MarkupSubmitPath => markup_submit_path(ctx.html),
                EndpointStrategy::AskModel => ask_model(ctx).await,
                EndpointStrategy::OriginFallback => origin_fallback(ctx.current_url),
            };
            if let Some(url) = candidate.map(|c| clean_candidate(&c)).filter(|c| !c.is_empty()) {
                tracing::debug!("Submit URL via {:?}: {}", strategy, url);
                return Some(url);
            }
        }
        None
    }
}

fn clean_candidate(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '"' | '\''))
        .to_string()
}

/// Last "... your answer to <URL>" phrase, else the last "submit ... to <URL>".
///
/// Task text often points at data sources earlier ("send a GET request to
/// ..."); the submission target comes last.
pub fn explicit_phrase(text: &str) -> Option<String> {
    let last = |re: &Regex| {
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .last()
            .map(|m| m.as_str().to_string())
    };
    last(&ANSWER_PHRASE).or_else(|| last(&SUBMIT_PHRASE))
}

pub fn markup_submit_path(html: &str) -> Option<String> {
    SUBMIT_PATH
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `<scheme>://<host>[:port]/submit` for the page's origin.
pub fn origin_fallback(current_url: &str) -> Option<String> {
    let base = Url::parse(current_url).ok()?;
    if !matches!(base.scheme(), "http" | "https") {
        return None;
    }
    base.join("/submit").ok().map(String::from)
}

/// Pull a URL out of a model reply, resolving root-relative paths.
pub fn parse_model_reply(reply: &str, current_url: &str) -> Option<String> {
    let reply = reply.trim();
    if reply.is_empty() || reply.eq_ignore_ascii_case("none") {
        return None;
    }
    if let Some(m) = MODEL_ABSOLUTE.find(reply) {
        return Url::parse(&clean_candidate(m.as_str())).ok().map(String::from);
    }
    let path = MODEL_RELATIVE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| clean_candidate(m.as_str()))?;
    Url::parse(current_url).ok()?.join(&path).ok().map(String::from)
}

async fn ask_model(ctx: &EndpointContext<'_>) -> Option<String> {
    let messages = [
        ChatMessage::system(ENDPOINT_PROMPT),
        ChatMessage::user(format!(
            "Page URL: {}\n\nPage text:\n{}\n\nHTML:\n{}",
            ctx.current_url,
            truncate_chars(ctx.text, 2000),
            truncate_chars(ctx.html, MODEL_MARKUP_CHARS)
        )),
    ];
    let options = ChatOptions {
        temperature: Some(0.0),
        max_tokens: Some(200),
    };
    match ctx.llm.chat_completion(ctx.model, &messages, options).await {
        Ok(response) => response
            .content
            .as_deref()
            .and_then(|reply| parse_model_reply(reply, ctx.current_url)),
        Err(e) => {
            tracing::warn!("Endpoint lookup via model failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Reply {
        content: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Reply {
        fn new(content: Option<&'static str>) -> Self {
            Self {
                content,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for Reply {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> anyhow::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.content {
                Some(text) => Ok(ChatResponse {
                    content: Some(text.to_string()),
                    finish_reason: None,
                    usage: None,
                    model: None,
                }),
                None => anyhow::bail!("model unavailable"),
            }
        }

        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn ctx<'a>(text: &'a str, html: &'a str, url: &'a str, llm: &'a Reply) -> EndpointContext<'a> {
        EndpointContext {
            text,
            html,
            current_url: url,
            llm,
            model: "test-model",
        }
    }

    #[test]
    fn test_explicit_phrase_is_found_and_trimmed() {
        let text = "Download the file. Post your answer to https://x.test/submit.";
        let found = explicit_phrase(text).map(|c| clean_candidate(&c));
        assert_eq!(found.as_deref(), Some("https://x.test/submit"));
    }

    #[test]
    fn test_explicit_phrase_skips_earlier_data_links() {
        let text = "Send a GET request to https://x.test/api/data and sum the values. \
                    Post your answer to https://x.test/submit";
        assert_eq!(explicit_phrase(text).as_deref(), Some("https://x.test/submit"));

        let text = "Submit the form to https://x.test/first then submit again to https://x.test/second";
        assert_eq!(explicit_phrase(text).as_deref(), Some("https://x.test/second"));
        assert_eq!(explicit_phrase("Download https://x.test/data.csv"), None);
    }

    #[test]
    fn test_markup_submit_path_needs_segment_boundary() {
        let html = r#"<a href="https://x.test/submitted-list">x</a><form action="https://x.test/api/submit"></form>"#;
        assert_eq!(
            markup_submit_path(html).as_deref(),
            Some("https://x.test/api/submit")
        );
        assert_eq!(markup_submit_path("<p>no urls</p>"), None);
    }

    #[test]
    fn test_origin_fallback_uses_scheme_and_host() {
        assert_eq!(
            origin_fallback("https://x.test/project2").as_deref(),
            Some("https://x.test/submit")
        );
        assert_eq!(
            origin_fallback("http://localhost:8080/a/b?c=d").as_deref(),
            Some("http://localhost:8080/submit")
        );
        assert_eq!(origin_fallback("not a url"), None);
    }

    #[test]
    fn test_model_replies_accept_relative_paths() {
        assert_eq!(
            parse_model_reply("/api/answer", "https://x.test/q/1").as_deref(),
            Some("https://x.test/api/answer")
        );
        assert_eq!(
            parse_model_reply("The form posts to `https://y.test/submit`.", "https://x.test/").as_deref(),
            Some("https://y.test/submit")
        );
        assert_eq!(
            parse_model_reply("`/api/submit`", "https://x.test/q1").as_deref(),
            Some("https://x.test/api/submit")
        );
        assert_eq!(
            parse_model_reply("\"/api/submit\"", "https://x.test/q1").as_deref(),
            Some("https://x.test/api/submit")
        );
        assert_eq!(
            parse_model_reply("Answers go to: /submit.", "https://x.test/q1").as_deref(),
            Some("https://x.test/submit")
        );
        assert_eq!(parse_model_reply("NONE", "https://x.test/"), None);
        assert_eq!(parse_model_reply("I could not find it", "https://x.test/"), None);
    }

    #[tokio::test]
    async fn test_falls_back_to_origin_when_nothing_is_discoverable() {
        let llm = Reply::new(Some("NONE"));
        let resolver = EndpointResolver::default();
        let url = resolver
            .resolve(&ctx("What is 2+2?", "<p>What is 2+2?</p>", "https://x.test/project2", &llm))
            .await;
        assert_eq!(url.as_deref(), Some("https://x.test/submit"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_failure_is_not_fatal() {
        let llm = Reply::new(None);
        let url = EndpointResolver::default()
            .resolve(&ctx("q", "", "https://x.test/project2", &llm))
            .await;
        assert_eq!(url.as_deref(), Some("https://x.test/submit"));
    }

    #[tokio::test]
    async fn test_earlier_strategies_short_circuit() {
        let llm = Reply::new(Some("/elsewhere"));
        let url = EndpointResolver::default()
            .resolve(&ctx(
                "Submit your answer to https://x.test/submit, please",
                r#"<form action="https://other.test/submit">"#,
                "https://x.test/q1",
                &llm,
            ))
            .await;
        assert_eq!(url.as_deref(), Some("https://x.test/submit"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_strategy_order_is_configurable() {
        let llm = Reply::new(Some("/api/answer"));
        let resolver = EndpointResolver::new(vec![
            EndpointStrategy::AskModel,
            EndpointStrategy::ExplicitPhrase,
        ]);
        let url = resolver
            .resolve(&ctx(
                "Submit your answer to https://x.test/submit",
                "",
                "https://x.test/q1",
                &llm,
            ))
            .await;
        assert_eq!(url.as_deref(), Some("https://x.test/api/answer"));
    }

    #[tokio::test]
    async fn test_empty_strategy_list_resolves_nothing() {
        let llm = Reply::new(None);
        let url = EndpointResolver::new(vec![])
            .resolve(&ctx("q", "", "https://x.test/", &llm))
            .await;
        assert_eq!(url, None);
    }
}
