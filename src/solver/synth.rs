//! Answer synthesis: ask the model for Python that computes the answer.

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::util::truncate_chars;

const SYSTEM_PROMPT: &str = "\
You are a Python data analyst solving a quiz question taken from a web page.
Reply with ONLY valid Python 3 source code, no explanations.

Rules:
1. Import every library you use explicitly at the top of the script.
2. Links in the page may be relative; resolve them against the page URL with urllib.parse.urljoin.
3. If the question refers to a file, dataset, API or another page, download it with `requests` and process it.
4. If the question asks you to run a command, use `subprocess.run(..., capture_output=True, text=True)`.
5. Do not submit the answer anywhere and do not print secrets.
6. MOST IMPORTANT: assign the final answer to a variable named `result`.
   `result` must be a plain str, int, float or bool (convert numpy/pandas values first).";

/// Inputs for one synthesis call.
pub struct SynthesisRequest<'a> {
    pub question: &'a str,
    pub html: &'a str,
    pub current_url: &'a str,
    /// Markup prefix length to include
    pub markup_chars: usize,
}

/// Build the user message for the model.
pub fn build_prompt(req: &SynthesisRequest<'_>) -> String {
    format!(
        "Page URL: {url}\n\nQuestion (visible page text):\n{question}\n\n\
         Page HTML (may be truncated):\n{html}\n",
        url = req.current_url,
        question = req.question.trim(),
        html = truncate_chars(req.html, req.markup_chars),
    )
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
///
/// When the reply mixes prose and a fenced block, the first block wins.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_open = &trimmed[start + 3..];
    // Skip the language tag line.
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => after_open,
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

/// Ask `llm` for solving code. Returns an empty string on any failure.
pub async fn synthesize(llm: &dyn LlmClient, model: &str, req: &SynthesisRequest<'_>) -> String {
    let messages = [
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_prompt(req)),
    ];
    let options = ChatOptions {
        temperature: Some(0.0),
        max_tokens: None,
    };

    match llm.chat_completion(model, &messages, options).await {
        Ok(response) => {
            let code = response
                .content
                .as_deref()
                .map(strip_code_fences)
                .unwrap_or_default();
            if code.is_empty() {
                tracing::warn!("Model {} returned no code", model);
            }
            code
        }
        Err(e) => {
            tracing::warn!("Code synthesis with {} failed: {}", model, e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_strips_language_tagged_fence() {
        let reply = "```python\nimport math\nresult = math.pi\n```";
        assert_eq!(strip_code_fences(reply), "import math\nresult = math.pi");
    }

    #[test]
    fn test_strips_fence_surrounded_by_prose() {
        let reply = "Here you go:\n```\nresult = 1\n```\nHope it helps.";
        assert_eq!(strip_code_fences(reply), "result = 1");
    }

    #[test]
    fn test_unfenced_code_is_returned_trimmed() {
        assert_eq!(strip_code_fences("\nresult = True\n"), "result = True");
    }

    #[test]
    fn test_prompt_truncates_markup() {
        let html = "x".repeat(100);
        let prompt = build_prompt(&SynthesisRequest {
            question: "  Sum the column  ",
            html: &html,
            current_url: "https://x.test/q1",
            markup_chars: 10,
        });
        assert!(prompt.contains("Page URL: https://x.test/q1"));
        assert!(prompt.contains("Question (visible page text):\nSum the column\n"));
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
    }

    struct Recorder {
        reply: anyhow::Result<&'static str>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl LlmClient for Recorder {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> anyhow::Result<ChatResponse> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            match &self.reply {
                Ok(text) => Ok(ChatResponse {
                    content: Some(text.to_string()),
                    finish_reason: Some("stop".into()),
                    usage: None,
                    model: None,
                }),
                Err(e) => anyhow::bail!("{}", e),
            }
        }

        async fn list_models(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn request() -> SynthesisRequest<'static> {
        SynthesisRequest {
            question: "What is 6*7?",
            html: "<p>What is 6*7?</p>",
            current_url: "https://x.test/q1",
            markup_chars: 8000,
        }
    }

    #[tokio::test]
    async fn test_synthesize_sends_instructions_and_strips_fences() {
        let llm = Recorder {
            reply: Ok("```python\nresult = 6 * 7\n```"),
            seen: Mutex::new(vec![]),
        };
        let code = synthesize(&llm, "m", &request()).await;
        assert_eq!(code, "result = 6 * 7");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].content.contains("`result`"));
        assert!(seen[1].content.contains("What is 6*7?"));
    }

    #[tokio::test]
    async fn test_synthesize_failure_yields_empty_code() {
        let llm = Recorder {
            reply: Err(anyhow::anyhow!("quota exceeded")),
            seen: Mutex::new(vec![]),
        };
        assert_eq!(synthesize(&llm, "m", &request()).await, "");
    }
}
