use anyhow::{Context, bail};

use email_agent::config::Config;
use email_agent::modes::{self, Mode};
use email_agent::{logging, web};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init(&config.logging);

    // A first CLI argument names the mode; the rest are mode arguments.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, mode_args): (Mode, &[String]) = match args.split_first() {
        Some((first, rest)) => (first.parse()?, rest),
        None => (config.mode.parse()?, &[]),
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), %mode, "Email agent starting");

    match mode {
        Mode::Ingest => {
            let report = modes::run_ingest(&config).await.context("Ingest run failed")?;
            tracing::info!(?report, "Ingest complete");
        }
        Mode::Draft => {
            let report = modes::run_draft(&config).await.context("Draft run failed")?;
            tracing::info!(?report, "Draft run complete");
        }
        Mode::Diagnostics => {
            modes::run_diagnostics(&config).await.context("Diagnostics failed")?;
        }
        Mode::Web => {
            web::serve(config.web.port)
                .await
                .with_context(|| format!("Web server on port {} failed", config.web.port))?;
        }
        Mode::Rule => {
            let (Some(key), Some(content)) = (mode_args.first(), mode_args.get(1)) else {
                bail!("usage: email-agent rule <key> <content>");
            };
            modes::run_rule(&config, key, content).await.context("Saving rule failed")?;
        }
    }

    Ok(())
}
