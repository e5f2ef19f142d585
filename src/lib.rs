//! # Quiz Solver
//!
//! Autonomous solver for chained web quizzes.
//!
//! This library provides:
//! - An HTTP API that accepts a starting quiz URL and solves in the background
//! - A solve loop that renders each page, asks a model for Python that computes
//!   the answer, runs it in a sandboxed subprocess and submits the result
//! - An OpenRouter client with transient-error retry and model selection
//!
//! ## Task Flow
//! 1. Receive `{email, secret, url}` via `POST /solve`
//! 2. Render the page in headless Chromium
//! 3. Resolve where answers go, generate and execute code
//! 4. POST the normalized answer; follow the returned URL if any
//!
//! ## Modules
//! - `solver`: the solve loop and its stages
//! - `llm`: OpenRouter client
//! - `api`: axum routes

pub mod api;
pub mod config;
pub mod llm;
pub mod solver;
pub mod util;

pub use config::Config;
pub use solver::{RunReport, Solver, StopReason};
