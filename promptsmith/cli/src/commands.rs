//! Subcommands and their output

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use promptsmith_core::{
    CompletionRequest, EnhancementPipeline, StreamingToken, Task, TaskPriority,
};

/// Marker printed after a completed stream
pub const STREAM_DONE: &str = "[DONE]";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full enhancement pipeline on a prompt
    Enhance {
        /// Prompt to enhance
        prompt: String,

        /// Project answers as a JSON object
        #[arg(short, long, value_name = "JSON")]
        answers: Option<String>,

        /// Quality score to aim for (0-100)
        #[arg(short, long)]
        target_quality: Option<f64>,
    },

    /// Average quality score across every configured provider
    Score {
        /// Prompt to score
        prompt: String,

        /// Project context as JSON
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Score a prompt and list suggested fixes
    Validate {
        /// Prompt to validate
        prompt: String,

        /// Project context as JSON
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Run a completion with failover
    Execute {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Stream a completion to stdout, ending with [DONE]
    Stream {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Suggest follow-up questions for the current answers
    FollowUps {
        /// Current prompt
        prompt: String,

        /// Project answers as a JSON object
        #[arg(short, long, value_name = "JSON")]
        answers: Option<String>,
    },

    /// List configured providers in attempt order
    Providers,

    /// Estimate what sending a prompt would cost
    EstimateCost {
        /// Prompt text
        prompt: String,

        /// Provider to price against (default: primary)
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Recommend a provider for a kind of work
    Recommend {
        /// Favor cheap providers
        #[arg(long)]
        cost_sensitive: bool,

        /// Favor fast providers
        #[arg(long)]
        urgent: bool,

        /// Required quality (0-100)
        #[arg(long, default_value_t = 50)]
        quality: u8,
    },

    /// Provider and cache status with cost-saving advice
    Status,
}

/// Options shared by `execute` and `stream`
#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// Prompt text
    prompt: String,

    /// Provider to try first
    #[arg(short, long)]
    provider: Option<String>,

    /// System message
    #[arg(short, long)]
    system: Option<String>,

    /// Response token cap
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0-1.0)
    #[arg(long)]
    temperature: Option<f32>,
}

impl RequestArgs {
    fn to_request(&self) -> CompletionRequest {
        let mut request = CompletionRequest::new(&self.prompt);
        if let Some(ref system) = self.system {
            request = request.with_system(system);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

impl Command {
    /// Target quality passed on the command line, if any
    pub fn target_quality(&self) -> Option<f64> {
        match self {
            Self::Enhance { target_quality, .. } => *target_quality,
            _ => None,
        }
    }
}

fn parse_json(raw: Option<&str>, what: &str) -> Result<Value> {
    match raw {
        Some(text) => serde_json::from_str(text).with_context(|| format!("--{what} is not valid JSON")),
        None => Ok(json!({})),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Execute one subcommand
pub async fn run(command: Command, pipeline: &EnhancementPipeline) -> Result<()> {
    let orchestrator = pipeline.orchestrator();

    match command {
        Command::Enhance {
            prompt,
            answers,
            target_quality,
        } => {
            let answers = parse_json(answers.as_deref(), "answers")?;
            let result = pipeline.enhance(&prompt, &answers, target_quality).await;
            print_json(&result)
        }
        Command::Score { prompt, context } => {
            let context = context
                .as_deref()
                .map(|c| parse_json(Some(c), "context"))
                .transpose()?;
            let score = orchestrator
                .score_prompt_quality(&prompt, context.as_ref())
                .await;
            print_json(&score)
        }
        Command::Validate { prompt, context } => {
            let context = context
                .as_deref()
                .map(|c| parse_json(Some(c), "context"))
                .transpose()?;
            let report = pipeline.validate_quality(&prompt, context.as_ref()).await;
            print_json(&report)
        }
        Command::Execute { request } => {
            let result = orchestrator
                .execute(&request.to_request(), request.provider.as_deref())
                .await?;
            print_json(&result)
        }
        Command::Stream { request } => stream(pipeline, &request).await,
        Command::FollowUps { prompt, answers } => {
            let answers = parse_json(answers.as_deref(), "answers")?;
            let questions = pipeline.follow_up_questions(&answers, &prompt).await;
            print_json(&questions)
        }
        Command::Providers => print_json(&orchestrator.available_providers()),
        Command::EstimateCost { prompt, provider } => {
            let cost = orchestrator.estimate_cost(&prompt, provider.as_deref());
            print_json(&json!({ "prompt_chars": prompt.chars().count(), "estimated_cost_usd": cost }))
        }
        Command::Recommend {
            cost_sensitive,
            urgent,
            quality,
        } => {
            let priority = if urgent {
                TaskPriority::High
            } else {
                TaskPriority::Normal
            };
            let task = Task::completion(CompletionRequest::default())
                .with_priority(priority)
                .cost_sensitive(cost_sensitive)
                .with_quality_required(quality);
            print_json(&json!({ "provider": orchestrator.recommend_provider(&task) }))
        }
        Command::Status => print_json(&orchestrator.status()),
    }
}

/// Print fragments as they arrive; Ctrl-C cancels the upstream read
async fn stream(pipeline: &EnhancementPipeline, args: &RequestArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut tokens = pipeline
        .orchestrator()
        .stream(&args.to_request(), args.provider.as_deref(), cancel.clone())
        .await?;
    info!(provider = %tokens.provider(), "Streaming");

    let mut out = tokio::io::stdout();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                warn!("Stream cancelled");
                out.write_all(b"\n").await?;
                break;
            }
            token = tokens.next() => match token {
                Some(StreamingToken::Token(text)) => {
                    out.write_all(text.as_bytes()).await?;
                    out.flush().await?;
                }
                Some(StreamingToken::Complete { .. }) => {
                    out.write_all(format!("\n{STREAM_DONE}\n").as_bytes()).await?;
                    break;
                }
                Some(StreamingToken::Error(message)) => {
                    out.write_all(b"\n").await?;
                    out.flush().await?;
                    bail!("stream from {} failed: {message}", tokens.provider());
                }
                None => {
                    out.write_all(format!("\n{STREAM_DONE}\n").as_bytes()).await?;
                    break;
                }
            }
        }
    }
    out.flush().await?;
    Ok(())
}
