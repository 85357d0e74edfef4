//! Command-line entrypoint for the clocktower test harness.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use grim_ai::{GeminiClient, GeminiConfig, OpenAiCompatClient, OpenAiCompatConfig};
use grim_api::ApiClient;
use grim_collect::{reconcile, Quorum};
use grim_harness::{
    default_scenarios, render_bench, render_comparison, render_events, render_report,
    run_provider_bench, run_session, save_bench, RunResult, SessionConfig,
};
use grim_transport::ReplayAnchor;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "grim",
    about = "Test harness for the clocktower session server and its AI narrator",
    version
)]
/// Public struct `Cli` used across harness commands.
struct Cli {
    #[arg(
        long,
        env = "GRIM_BASE_URL",
        default_value = "http://localhost:8081",
        help = "Base URL of the session server REST API"
    )]
    base_url: String,

    #[arg(
        long,
        env = "GRIM_WS_URL",
        help = "WebSocket URL of the session server; derived from --base-url when omitted"
    )]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive one live session: provision, subscribe, start, collect, reconcile.
    Run {
        #[arg(
            long,
            default_value = "default",
            help = "Provider label recorded in the result file"
        )]
        provider: String,

        #[arg(long, default_value_t = 7, help = "Number of server-driven bots to seat")]
        bots: u32,

        #[arg(long, default_value = "tb", help = "Ruleset edition for the room")]
        edition: String,

        #[arg(
            long,
            default_value_t = 4,
            help = "Chat-message quorum that triggers the grace window"
        )]
        quorum: u64,

        #[arg(
            long = "budget-secs",
            default_value_t = 60,
            help = "Hard wall-clock collection budget in seconds"
        )]
        budget_secs: u64,

        #[arg(
            long = "grace-secs",
            default_value_t = 5,
            help = "Extra collection window after the quorum fires, in seconds"
        )]
        grace_secs: u64,

        #[arg(
            long = "from-seq",
            help = "Subscribe from this sequence number instead of the start of the log"
        )]
        from_seq: Option<u64>,

        #[arg(long, help = "Output path; defaults to test_result_<provider>.json")]
        out: Option<PathBuf>,
    },
    /// Fetch and print the authoritative event log of an existing room.
    FetchEvents {
        #[arg(long, help = "Room identifier to fetch")]
        room_id: String,
    },
    /// Compare two saved run results side by side.
    Compare {
        #[arg(help = "First result file")]
        a: PathBuf,
        #[arg(help = "Second result file")]
        b: PathBuf,
    },
    /// Benchmark narrator providers against the fixed storyteller prompt set.
    Bench {
        #[arg(
            long = "gemini-model",
            env = "GRIM_GEMINI_MODEL",
            default_value = "gemini-3-flash-preview",
            help = "Gemini model identifier"
        )]
        gemini_model: String,

        #[arg(
            long = "deepseek-model",
            env = "GRIM_DEEPSEEK_MODEL",
            default_value = "deepseek-chat",
            help = "DeepSeek model identifier"
        )]
        deepseek_model: String,

        #[arg(long, help = "Write a JSON benchmark summary to this path")]
        out: Option<PathBuf>,
    },
    /// Check server and narrator backend health.
    Health,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Derives the WebSocket endpoint from the REST base URL when no explicit
/// override is given.
fn derive_ws_url(base_url: &str) -> String {
    let stripped = base_url.trim_end_matches('/');
    let swapped = if let Some(rest) = stripped.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = stripped.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        stripped.to_string()
    };
    format!("{swapped}/ws")
}

const API_TIMEOUT: Duration = Duration::from_secs(15);

async fn execute_run(
    base_url: &str,
    ws_url: &str,
    provider: &str,
    bots: u32,
    edition: &str,
    quorum: u64,
    budget_secs: u64,
    grace_secs: u64,
    from_seq: Option<u64>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut config = SessionConfig::new(base_url, ws_url, provider);
    config.bot_count = bots;
    config.edition = edition.to_string();
    config.replay_anchor = match from_seq {
        Some(seq) => ReplayAnchor::FromSeq(seq),
        None => ReplayAnchor::FromStart,
    };
    config.policy.quorum = (quorum > 0).then(|| Quorum {
        event_type: config.chat_event_type.clone(),
        count: quorum,
    });
    config.policy.hard_budget = Duration::from_secs(budget_secs);
    config.policy.grace = Duration::from_secs(grace_secs);

    let report = run_session(&config).await?;
    if !report.divergence.is_empty() {
        tracing::warn!(
            only_rest = report.divergence.only_rest.len(),
            only_live = report.divergence.only_live.len(),
            "live and historical logs disagree; see log output above"
        );
    }
    print!("{}", render_report(&report.result));

    let path = out.unwrap_or_else(|| PathBuf::from(format!("test_result_{provider}.json")));
    report.result.save(&path)?;
    println!("\nSaved to {}", path.display());
    Ok(())
}

async fn execute_fetch_events(base_url: &str, room_id: &str) -> Result<()> {
    let api = ApiClient::new(base_url, API_TIMEOUT)?;
    let session = api
        .quick_login("event_fetcher")
        .await
        .context("quick login failed")?;
    let rows = api
        .room_events(&session.token, room_id)
        .await
        .with_context(|| format!("failed to fetch events for room {room_id}"))?;
    let log = reconcile(Some(rows), &[]);
    print!("{}", render_events(&log));
    Ok(())
}

fn execute_compare(a: &PathBuf, b: &PathBuf) -> Result<()> {
    let left = RunResult::load(a)?;
    let right = RunResult::load(b)?;
    print!("{}", render_comparison(&left, &right));
    Ok(())
}

async fn execute_bench(
    gemini_model: &str,
    deepseek_model: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let scenarios = default_scenarios();
    let mut benches = Vec::new();

    match std::env::var("GRIM_GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let client = GeminiClient::new(GeminiConfig {
                api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                api_key: key,
                request_timeout_ms: 60_000,
                max_retries: 2,
                retry_jitter: true,
            })?;
            benches.push(run_provider_bench("gemini", gemini_model, &client, &scenarios).await);
        }
        _ => tracing::warn!("GRIM_GEMINI_API_KEY not set, skipping gemini"),
    }

    match std::env::var("GRIM_DEEPSEEK_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let client = OpenAiCompatClient::new(OpenAiCompatConfig {
                api_base: "https://api.deepseek.com/v1".to_string(),
                api_key: key,
                request_timeout_ms: 60_000,
                max_retries: 2,
                retry_jitter: true,
            })?;
            benches.push(run_provider_bench("deepseek", deepseek_model, &client, &scenarios).await);
        }
        _ => tracing::warn!("GRIM_DEEPSEEK_API_KEY not set, skipping deepseek"),
    }

    if benches.is_empty() {
        bail!("no provider API keys configured; set GRIM_GEMINI_API_KEY or GRIM_DEEPSEEK_API_KEY");
    }
    print!("{}", render_bench(&benches));
    if let Some(path) = out {
        save_bench(&path, &benches)?;
        println!("\nSaved to {}", path.display());
    }
    Ok(())
}

async fn execute_health(base_url: &str) -> Result<()> {
    let api = ApiClient::new(base_url, API_TIMEOUT)?;
    api.health().await.context("server health check failed")?;
    println!("server: ok");
    match api.llm_health().await {
        Ok(health) => println!("narrator: {} ({})", health.provider, health.model),
        Err(error) => println!("narrator: unavailable ({error})"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let ws_url = cli
        .ws_url
        .clone()
        .unwrap_or_else(|| derive_ws_url(&cli.base_url));

    match cli.command {
        Command::Run {
            provider,
            bots,
            edition,
            quorum,
            budget_secs,
            grace_secs,
            from_seq,
            out,
        } => {
            execute_run(
                &cli.base_url,
                &ws_url,
                &provider,
                bots,
                &edition,
                quorum,
                budget_secs,
                grace_secs,
                from_seq,
                out,
            )
            .await
        }
        Command::FetchEvents { room_id } => execute_fetch_events(&cli.base_url, &room_id).await,
        Command::Compare { a, b } => execute_compare(&a, &b),
        Command::Bench {
            gemini_model,
            deepseek_model,
            out,
        } => execute_bench(&gemini_model, &deepseek_model, out).await,
        Command::Health => execute_health(&cli.base_url).await,
    }
}
