//! Answer submission over HTTP.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalize::Answer;

/// Body POSTed to the submission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub email: String,
    pub secret: String,
    /// Page the answer belongs to
    pub url: String,
    pub answer: Answer,
}

/// Reply from the submission endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    #[serde(default)]
    pub correct: bool,
    /// Next quiz page, if the chain continues
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SubmitResponse {
    /// Continuation URL, ignoring blanks.
    pub fn next_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The POST itself failed (connect, timeout, ...)
    #[error("submission to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with something that is not the expected JSON
    #[error("submission to {url} returned HTTP {status} with an unreadable body: {body}")]
    Protocol {
        url: String,
        status: u16,
        body: String,
    },
}

impl SubmitError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, SubmitError::Protocol { .. })
    }
}

/// POST `submission` to `submit_url` and decode the reply.
///
/// Non-2xx replies are still decoded: quiz servers report wrong answers with
/// 4xx statuses and a normal JSON body.
pub async fn submit_answer(
    client: &reqwest::Client,
    submit_url: &str,
    submission: &Submission,
    timeout: std::time::Duration,
) -> Result<SubmitResponse, SubmitError> {
    let transport = |source| SubmitError::Transport {
        url: submit_url.to_string(),
        source,
    };

    let response = client
        .post(submit_url)
        .timeout(timeout)
        .json(submission)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status().as_u16();
    let body = response.text().await.map_err(transport)?;

    serde_json::from_str::<SubmitResponse>(&body).map_err(|_| SubmitError::Protocol {
        url: submit_url.to_string(),
        status,
        body: crate::util::truncate_chars(&body, 300).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn submission() -> Submission {
        Submission {
            email: "a@b.c".into(),
            secret: "s3cret".into(),
            url: "https://x.test/q1".into(),
            answer: Answer::Number(42.into()),
        }
    }

    #[test]
    fn test_next_url_ignores_blanks() {
        let resp: SubmitResponse = serde_json::from_value(json!({"correct": true, "url": " "})).unwrap();
        assert_eq!(resp.next_url(), None);
        let resp: SubmitResponse = serde_json::from_value(json!({"correct": false})).unwrap();
        assert_eq!(resp.next_url(), None);
        assert!(!resp.correct);
    }

    #[tokio::test]
    async fn test_posts_payload_and_decodes_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit").json_body(json!({
                    "email": "a@b.c",
                    "secret": "s3cret",
                    "url": "https://x.test/q1",
                    "answer": 42
                }));
                then.status(200)
                    .json_body(json!({"correct": true, "url": "https://x.test/q2"}));
            })
            .await;

        let client = reqwest::Client::new();
        let resp = submit_answer(&client, &server.url("/submit"), &submission(), Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(resp.correct);
        assert_eq!(resp.next_url(), Some("https://x.test/q2"));
    }

    #[tokio::test]
    async fn test_error_status_with_json_body_is_decoded() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/submit");
                then.status(400)
                    .json_body(json!({"correct": false, "reason": "Wrong sum"}));
            })
            .await;

        let resp = submit_answer(
            &reqwest::Client::new(),
            &server.url("/submit"),
            &submission(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(!resp.correct);
        assert_eq!(resp.reason.as_deref(), Some("Wrong sum"));
    }

    #[tokio::test]
    async fn test_non_json_reply_is_a_protocol_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/submit");
                then.status(502).body("<html>Bad Gateway</html>");
            })
            .await;

        let err = submit_answer(
            &reqwest::Client::new(),
            &server.url("/submit"),
            &submission(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let err = submit_answer(
            &reqwest::Client::new(),
            "http://127.0.0.1:9/submit",
            &submission(),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(!err.is_protocol());
    }
}
