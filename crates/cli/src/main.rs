use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auditor_core::config::Settings;
use auditor_core::error::AuditorError;
use auditor_core::llm::client::HttpCompletionClient;
use auditor_core::llm::prompt::PromptTemplates;
use auditor_core::llm::CompletionParams;
use auditor_core::pipeline::{self, AnalysisInput, UploadedFile};
use auditor_core::render::render_dashboard;

#[derive(Debug, Parser)]
#[command(name = "auditor_cli")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyse a transaction file against one or more rules documents.
    Analyze {
        /// Rules documents (PDF, DOCX or text), in the order they are sent.
        #[arg(long = "rules", required = true, num_args = 1..)]
        rules: Vec<PathBuf>,

        /// Transaction data (CSV or any text file).
        #[arg(long)]
        transactions: PathBuf,

        /// Write the dashboard view model as JSON to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Turn one document into a markdown rules summary.
    GenerateRules {
        file: PathBuf,

        /// Defaults to `analysis_<name>.md` in the current directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(&settings, args.command).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        if let Some(raw) = err
            .downcast_ref::<AuditorError>()
            .and_then(AuditorError::raw_output)
        {
            eprintln!("--- raw model output ---\n{raw}\n------------------------");
        }
    }
    res
}

async fn run(settings: &Settings, command: Command) -> anyhow::Result<()> {
    let client = HttpCompletionClient::from_settings(settings)?;
    let params = CompletionParams::from_settings(settings)?;
    let templates = PromptTemplates::new(&settings.prompt_dir);

    match command {
        Command::Analyze {
            rules,
            transactions,
            out,
        } => {
            let mut input = AnalysisInput {
                rules_documents: Vec::with_capacity(rules.len()),
                transactions: Some(read_upload(&transactions)?),
            };
            for path in &rules {
                input.rules_documents.push(read_upload(path)?);
            }

            let outcome = pipeline::analyze(
                &client,
                &params,
                &templates,
                &settings.risk_policy,
                input,
            )
            .await?;

            for skipped in &outcome.skipped {
                eprintln!("skipped {}: {}", skipped.file_name, skipped.cause);
            }
            let s = &outcome.stats;
            println!(
                "High Risk: {}  Medium Risk: {}  Low Risk: {}  Total Transactions: {}",
                s.high, s.medium, s.low, s.total
            );
            println!(
                "Flagged: {}  Failure Rate: {:.2}%  Median Risk Score: {:.2}",
                s.flagged, s.failure_rate, s.median_risk
            );
            for tx in outcome.document.flagged_transactions() {
                println!(
                    "  {}: Found {} violations",
                    tx.transaction_id,
                    tx.violated_rules.len()
                );
            }

            if let Some(out) = out {
                let dashboard = render_dashboard(
                    &outcome.document,
                    &outcome.stats,
                    &settings.risk_policy,
                    chrono::Utc::now(),
                );
                let json = serde_json::to_string_pretty(&dashboard)?;
                std::fs::write(&out, json)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                tracing::info!(path = %out.display(), "wrote dashboard");
            }
        }
        Command::GenerateRules { file, out } => {
            let upload = read_upload(&file)?;
            let outcome = pipeline::generate_rules(&client, &params, &templates, &upload).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }

            let out = out.unwrap_or_else(|| PathBuf::from(outcome.result.download_name()));
            std::fs::write(&out, &outcome.result.content)
                .with_context(|| format!("failed to write {}", out.display()))?;
            tracing::info!(path = %out.display(), usage = ?outcome.result.usage, "wrote generated rules");
            println!("{}", out.display());
        }
    }
    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<UploadedFile> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    Ok(UploadedFile::new(name, bytes))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
