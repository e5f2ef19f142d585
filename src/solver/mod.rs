//! The solve loop.
//!
//! ```text
//!   start URL
//!      │
//!      ▼
//!   fetch page ──(no text)──────────────► stop
//!      │
//!   resolve submit URL ──(none)─────────► stop
//!      │
//!   synthesize code ──(empty)───────────► stop
//!      │
//!   execute + normalize
//!      │
//!   POST answer ──(transport/protocol)──► stop
//!      │
//!   reply has `url`? ──no───────────────► stop
//!      │ yes (correct or not)
//!      └──► next step, until the step ceiling
//! ```
//!
//! Steps are strictly sequential and each is attempted exactly once.

pub mod endpoint;
pub mod executor;
pub mod fetch;
pub mod normalize;
pub mod submit;
pub mod synth;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{select_model, LlmClient};
use endpoint::{EndpointContext, EndpointResolver};
use executor::{CodeRunner, PythonSandbox};
use fetch::{BrowserFetcher, PageFetcher};
use normalize::{normalize, Answer, RawAnswer};
use submit::{submit_answer, Submission, SubmitResponse};
use synth::{synthesize, SynthesisRequest};

/// Everything learned about one quiz page. Rebuilt every step.
#[derive(Debug, Clone, Default)]
pub struct QuizStep {
    pub current_url: String,
    pub question_text: String,
    pub page_markup: String,
    pub submit_url: Option<String>,
    pub generated_code: Option<String>,
    pub raw_answer: Option<RawAnswer>,
    pub normalized_answer: Option<Answer>,
}

impl QuizStep {
    fn new(url: &str) -> Self {
        Self {
            current_url: url.to_string(),
            ..Default::default()
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Page had no visible text
    NoQuestion,
    /// No submission endpoint could be determined
    NoSubmitUrl,
    /// The model produced no code
    NoCode,
    /// The answer POST failed in transport
    SubmitFailed(String),
    /// The submission reply was not the expected JSON
    ProtocolError(String),
    /// The reply carried no continuation URL
    ChainEnded,
    /// The step ceiling was reached
    StepLimit,
    /// A step panicked
    Failed(String),
}

/// One attempted step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub number: usize,
    pub step: QuizStep,
    pub response: Option<SubmitResponse>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub start_url: String,
    pub model: String,
    pub steps: Vec<StepRecord>,
    pub stop: StopReason,
}

impl RunReport {
    /// Number of answers actually POSTed and acknowledged.
    pub fn submissions(&self) -> usize {
        self.steps.iter().filter(|s| s.response.is_some()).count()
    }

    pub fn correct_answers(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.response.as_ref().map_or(false, |r| r.correct))
            .count()
    }
}

enum StepOutcome {
    Continue(String),
    Stop(StopReason),
}

/// Drives fetch → resolve → synthesize → execute → submit across a chain of
/// quiz pages.
pub struct Solver {
    config: Arc<Config>,
    fetcher: Arc<dyn PageFetcher>,
    llm: Arc<dyn LlmClient>,
    runner: Arc<dyn CodeRunner>,
    resolver: EndpointResolver,
    http: reqwest::Client,
}

impl Solver {
    /// Solver with the browser fetcher and the Python sandbox.
    pub fn new(config: Arc<Config>, llm: Arc<dyn LlmClient>) -> Self {
        let fetcher = Arc::new(BrowserFetcher::new(config.browser.clone()));
        let runner = Arc::new(PythonSandbox::new(config.exec.clone()));
        Self::with_components(config, fetcher, llm, runner)
    }

    pub fn with_components(
        config: Arc<Config>,
        fetcher: Arc<dyn PageFetcher>,
        llm: Arc<dyn LlmClient>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            config,
            fetcher,
            llm,
            runner,
            resolver: EndpointResolver::default(),
            http: reqwest::Client::new(),
        }
    }

    /// Replace the endpoint strategy list.
    pub fn with_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Walk the quiz chain from `start_url` until it ends.
    ///
    /// Never fails: every way a run can end is a [`StopReason`].
    pub async fn run(&self, run_id: Uuid, start_url: &str) -> RunReport {
        let span = tracing::info_span!("run", %run_id, start_url = %start_url);
        self.run_chain(run_id, start_url).instrument(span).await
    }

    async fn run_chain(&self, run_id: Uuid, start_url: &str) -> RunReport {
        let model = select_model(
            self.llm.as_ref(),
            &self.config.llm.model_preference,
            &self.config.llm.default_model,
        )
        .await;
        tracing::info!("Starting solver with model {}", model);

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current_url = start_url.to_string();

        let stop = loop {
            if steps.len() >= self.config.max_steps {
                tracing::warn!("Step limit {} reached", self.config.max_steps);
                break StopReason::StepLimit;
            }
            let number = steps.len() + 1;
            tracing::info!("--- Step {}: {} ---", number, current_url);

            let started_at = Utc::now();
            let mut step = QuizStep::new(&current_url);
            let result = AssertUnwindSafe(self.step(&mut step, &model))
                .catch_unwind()
                .await;
            let (response, outcome) = match result {
                Ok(done) => done,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!("Step {} crashed: {}", number, message);
                    (None, StepOutcome::Stop(StopReason::Failed(message)))
                }
            };

            steps.push(StepRecord {
                number,
                step,
                response,
                started_at,
                finished_at: Utc::now(),
            });

            match outcome {
                StepOutcome::Continue(next) => current_url = next,
                StepOutcome::Stop(reason) => break reason,
            }
        };

        let report = RunReport {
            run_id,
            start_url: start_url.to_string(),
            model,
            steps,
            stop,
        };
        tracing::info!(
            "Run finished after {} steps ({} submitted, {} correct): {:?}",
            report.steps.len(),
            report.submissions(),
            report.correct_answers(),
            report.stop
        );
        report
    }

    async fn step(&self, step: &mut QuizStep, model: &str) -> (Option<SubmitResponse>, StepOutcome) {
        let page = self.fetcher.fetch(&step.current_url).await;
        if page.is_empty() {
            tracing::info!("No question text on {}, stopping", step.current_url);
            return (None, StepOutcome::Stop(StopReason::NoQuestion));
        }
        step.question_text = page.text;
        step.page_markup = page.html;

        let submit_url = {
            let ctx = EndpointContext {
                text: &step.question_text,
                html: &step.page_markup,
                current_url: &step.current_url,
                llm: self.llm.as_ref(),
                model,
            };
            self.resolver.resolve(&ctx).await
        };
        let Some(submit_url) = submit_url else {
            tracing::info!("No submit URL found, stopping");
            return (None, StepOutcome::Stop(StopReason::NoSubmitUrl));
        };
        tracing::info!("Submit URL: {}", submit_url);
        step.submit_url = Some(submit_url.clone());

        let code = synthesize(
            self.llm.as_ref(),
            model,
            &SynthesisRequest {
                question: &step.question_text,
                html: &step.page_markup,
                current_url: &step.current_url,
                markup_chars: self.config.markup_prompt_chars,
            },
        )
        .await;
        if code.trim().is_empty() {
            tracing::info!("No code generated, stopping");
            return (None, StepOutcome::Stop(StopReason::NoCode));
        }
        tracing::debug!("Generated code:\n{}", code);

        let raw = self.runner.run(&code).await;
        let answer = normalize(&raw);
        tracing::info!("Calculated answer: {}", answer);
        step.generated_code = Some(code);
        step.raw_answer = Some(raw);
        step.normalized_answer = Some(answer.clone());

        let submission = Submission {
            email: self.config.email.clone(),
            secret: self.config.secret.clone(),
            url: step.current_url.clone(),
            answer,
        };
        let response = match submit_answer(
            &self.http,
            &submit_url,
            &submission,
            self.config.submit_timeout,
        )
        .await
        {
            Ok(response) => response,
            Err(e) if e.is_protocol() => {
                tracing::error!("{}", e);
                return (None, StepOutcome::Stop(StopReason::ProtocolError(e.to_string())));
            }
            Err(e) => {
                tracing::warn!("{}", e);
                return (None, StepOutcome::Stop(StopReason::SubmitFailed(e.to_string())));
            }
        };

        tracing::info!(
            "Server response: correct={} reason={}",
            response.correct,
            response.reason.as_deref().unwrap_or("-")
        );

        let outcome = match response.next_url() {
            Some(next) => {
                let next = continuation_url(next, &submit_url);
                if !response.correct {
                    tracing::warn!("Answer marked incorrect, continuing to {}", next);
                }
                StepOutcome::Continue(next)
            }
            None => StepOutcome::Stop(StopReason::ChainEnded),
        };
        (Some(response), outcome)
    }
}

/// Resolve a possibly relative continuation against the submit URL.
fn continuation_url(next: &str, submit_url: &str) -> String {
    Url::parse(submit_url)
        .and_then(|base| base.join(next))
        .map(String::from)
        .unwrap_or_else(|_| next.to_string())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
