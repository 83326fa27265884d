use anyhow::Result;
use clap::Parser;
use email_assistant::cli::{self, Cli, Commands};
use email_assistant::config::Config;
use email_assistant::error::AssistantError;
use email_assistant::pipeline::RunOutcome;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Vec<u8>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Vec::new(),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: email-assistant --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("email_assistant=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("email_assistant=info,warn"))
    };

    // Logs print above progress spinners
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(AssistantError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - inbound/outbound.address: the mailbox and the sending account");
            println!("  - oauth.client_id/client_secret: Google OAuth2 client (or IMAP_PASS/SMTP_PASS)");
            println!("  - operator.identity: who offers are addressed to");
            println!("  - operator.override_to: redirect all mail while testing");

            Ok(())
        }

        Commands::Auth { force } => {
            let config = load_config(&cli.config).await?;
            let Some(tokens) = cli::build_token_provider(&config).await? else {
                println!("No account uses OAuth2; nothing to authorize.");
                return Ok(());
            };

            let accounts = cli::authorize_accounts(&config, &tokens, force).await?;
            for account in &accounts {
                println!("  ✓ Authorized {}", account);
            }
            println!("Tokens cached in: {:?}", config.oauth.token_dir);

            Ok(())
        }

        Commands::Run { dry_run, report } => {
            let config = load_config(&cli.config).await?;
            if dry_run {
                println!("Running in DRY RUN mode - messages stay unseen and nothing is sent");
            }

            let report = cli::run_pipeline(
                &config,
                dry_run,
                report.as_deref(),
                (*multi_progress).clone(),
            )
            .await?;

            match report.outcome {
                RunOutcome::NoUnseenMessages => println!("No unseen messages."),
                RunOutcome::NothingCollected => println!("No offers found in unseen messages."),
                RunOutcome::AllFailed => {
                    println!("No offers collected; {} messages failed:", report.failed.len());
                    for item in &report.failed {
                        println!("  uid {} '{}': {}", item.uid, item.subject, item.reason);
                    }
                    let first = report
                        .failed
                        .first()
                        .map(|item| item.reason.clone())
                        .unwrap_or_default();
                    return Err(AssistantError::LanguageModel(format!(
                        "no offer could be processed, {} messages failed (first: {})",
                        report.failed.len(),
                        first
                    ))
                    .into());
                }
                RunOutcome::DryRun | RunOutcome::Delivered => {
                    println!("\n========================================");
                    println!("Run Summary");
                    println!("========================================");
                    println!("Run ID: {}", report.run_id);
                    println!(
                        "Duration: {} seconds",
                        (report.completed_at - report.started_at).num_seconds()
                    );
                    println!("Messages fetched: {}", report.fetched);
                    println!("Thread replies skipped: {}", report.thread_replies);
                    println!("Without an offer: {}", report.no_offer);
                    println!("Failed: {}", report.failed.len());
                    println!("Replies sent: {}", report.replies_sent);
                    println!("Digest sent: {}", report.digest_sent);
                    println!("========================================");
                }
            }

            Ok(())
        }
    }
}

/// Load, overlay the environment, and validate
async fn load_config(path: &std::path::Path) -> Result<Config> {
    let mut config = Config::load(path).await?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(err) = error.downcast_ref::<AssistantError>() {
        match err {
            AssistantError::AuthError(_) | AssistantError::TokenExchange { .. } => {
                eprintln!("\nHint: The stored token may have been revoked.");
                eprintln!("      Try running: email-assistant auth --force");
            }
            AssistantError::NetworkError(_) => {
                eprintln!("\nHint: Check the server names and ports in your configuration.");
            }
            AssistantError::LanguageModel(_) => {
                eprintln!("\nHint: Make sure OPENAI_API_KEY is set and the models exist.");
            }
            AssistantError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: email-assistant init-config --force");
            }
            _ => {}
        }
    }
}
