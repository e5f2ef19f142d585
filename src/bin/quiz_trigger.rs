//! quiz-trigger - kick off a solve run on a quiz-solver service.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use quiz_solver::api::SolveRequest;

#[derive(Parser, Debug)]
#[command(name = "quiz-trigger", version, about = "Start a solve run on a quiz-solver service")]
struct Args {
    /// Solve endpoint of the service
    #[arg(long, env = "QUIZ_API_URL", default_value = "http://127.0.0.1:8000/solve")]
    api_url: String,

    #[arg(long, env = "QUIZ_EMAIL")]
    email: String,

    #[arg(long, env = "QUIZ_SECRET", hide_env_values = true)]
    secret: String,

    /// First quiz page
    #[arg(long)]
    url: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

async fn trigger(args: &Args) -> anyhow::Result<bool> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;
    let request = SolveRequest {
        email: args.email.clone(),
        secret: args.secret.clone(),
        url: args.url.clone(),
    };

    println!("Sending request to {} for {}", args.api_url, args.url);
    let response = client.post(&args.api_url).json(&request).send().await?;
    let status = response.status();
    let body = response.text().await?;

    println!("Status: {}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", body),
    }
    Ok(status.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match trigger(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Request failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
