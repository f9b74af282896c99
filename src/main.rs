mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{BuildArgs, Cli, Commands};

// Re-export from lib for internal use
use codeindex::{config, error, indexer, llm, search};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codeindex=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            repo,
            out,
            summarizer,
            min_loc,
            summary_scope,
            enrich,
            callsite_cap,
            progress,
        } => {
            let args = BuildArgs {
                summarizer,
                min_loc,
                summary_scope,
                enrich,
                callsite_cap,
            };
            cli::build(&repo, &out, args, progress).await?;
        }
        Commands::Search {
            query,
            index,
            top,
            budget,
            mode,
            llm_model,
        } => {
            cli::search(&index, &query, top, budget, &mode, llm_model).await?;
        }
        Commands::Trace { index, json } => {
            cli::trace(&index, json)?;
        }
    }

    Ok(())
}
