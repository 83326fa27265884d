//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ClientSecret, HttpTokenEndpoint, OAuthTokenProvider, TerminalPrompt};
use crate::classifier::{ModelChoice, OpenAiModel, PromptClassifier};
use crate::config::{AccountAuth, Config};
use crate::error::Result;
use crate::mail_sink::{SenderIdentity, SmtpRelay};
use crate::mail_source::ImapMailSource;
use crate::models::{MessageOutcome, SkipReason};
use crate::pipeline::{Pipeline, PipelineEvent, RunReport};
use crate::token_store::FileTokenStore;

#[derive(Parser, Debug)]
#[command(name = "email-assistant")]
#[command(version = "0.1.0")]
#[command(about = "Drafts replies to AI project offers and mails you a digest", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "email-assistant.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process unseen mail, send replies and the digest
    Run {
        /// Leave messages unseen and send nothing
        #[arg(long)]
        dry_run: bool,

        /// Write a markdown report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Authorize OAuth2 accounts ahead of a run
    Auth {
        /// Discard cached tokens and authorize again
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "email-assistant.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

/// Token provider backed by the token directory, `None` when no account uses OAuth2
pub async fn build_token_provider(config: &Config) -> Result<Option<Arc<OAuthTokenProvider>>> {
    if !config.uses_oauth() {
        return Ok(None);
    }

    let secret = ClientSecret::from_config(&config.oauth).await?;
    Ok(Some(Arc::new(OAuthTokenProvider::new(
        secret,
        Arc::new(FileTokenStore::new(&config.oauth.token_dir)),
        Arc::new(HttpTokenEndpoint::new()),
        Arc::new(TerminalPrompt),
    ))))
}

/// Addresses of the accounts that authenticate with OAuth2
fn oauth_accounts(config: &Config) -> Result<BTreeSet<String>> {
    let mut accounts = BTreeSet::new();
    for account in [
        config.inbound.resolve("inbound")?,
        config.outbound.resolve("outbound")?,
    ] {
        if account.auth == AccountAuth::OAuth2 {
            accounts.insert(account.address);
        }
    }
    Ok(accounts)
}

/// Make sure every OAuth2 account holds a usable token
///
/// Runs before any spinner is drawn because authorization may prompt on the terminal.
pub async fn authorize_accounts(
    config: &Config,
    tokens: &OAuthTokenProvider,
    force: bool,
) -> Result<Vec<String>> {
    let accounts = oauth_accounts(config)?;
    for account in &accounts {
        if force {
            tokens.forget(account).await?;
        }
        let token = tokens.get_access_token(account).await?;
        tracing::debug!("Token for {} ready ({} chars)", account, token.len());
    }
    Ok(accounts.into_iter().collect())
}

/// Wire the production collaborators and execute one run
pub async fn run_pipeline(
    config: &Config,
    dry_run: bool,
    report_path: Option<&Path>,
    multi: MultiProgress,
) -> Result<RunReport> {
    let tokens = build_token_provider(config).await?;
    if let Some(tokens) = &tokens {
        authorize_accounts(config, tokens, false).await?;
    }

    let reporter = ProgressReporter::with_multi_progress(multi);

    let inbound = config.inbound.resolve("inbound")?;
    let outbound = config.outbound.resolve("outbound")?;
    let keep_unseen = config.inbound.keep_unseen || dry_run;

    let source = ImapMailSource::new(
        inbound,
        config.inbound.folder.clone(),
        keep_unseen,
        config.assistant.max_prompt_chars,
        tokens.clone(),
    );
    let identity = SenderIdentity {
        address: outbound.address.clone(),
        full_name: config.operator.full_name.clone(),
        override_to: config.operator.override_to.clone(),
    };
    if let Some(override_to) = &identity.override_to {
        let _ = reporter
            .multi_progress()
            .println(format!("All mail will be redirected to {}", override_to));
    }
    let relay = SmtpRelay::new(outbound, identity, tokens);
    let classifier = PromptClassifier::new(
        Arc::new(OpenAiModel::from_config(&config.assistant)),
        ModelChoice::from(&config.assistant),
    );

    let spinner = reporter.add_spinner("Fetching unseen messages...");
    let observer = {
        let spinner = spinner.clone();
        let multi = reporter.multi_progress().clone();
        let total = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        Arc::new(move |event: &PipelineEvent<'_>| match event {
            PipelineEvent::Fetched(count) => {
                total.store(*count, Ordering::Relaxed);
                spinner.set_message(format!("Processing {} messages...", count));
            }
            PipelineEvent::Processed { message, outcome } => {
                let done = done.fetch_add(1, Ordering::Relaxed) + 1;
                spinner.set_message(format!(
                    "Processed {}/{} messages",
                    done,
                    total.load(Ordering::Relaxed)
                ));
                let status = match outcome {
                    MessageOutcome::Collected => "offer".to_string(),
                    MessageOutcome::Skipped(SkipReason::ThreadReply) => "thread reply".to_string(),
                    MessageOutcome::Skipped(SkipReason::NoOffer) => "no offer".to_string(),
                    MessageOutcome::Failed(reason) => format!("failed: {}", reason),
                };
                let _ = multi.println(format!(
                    "  [{}] {} | {}",
                    status,
                    truncate_string(&message.sender, 40),
                    truncate_string(&message.subject, 60)
                ));
                if let (Some(reply), Some(resume)) = (&message.response, &message.resume) {
                    let _ = multi.println(format!("    Reply:\n{}", reply));
                    let _ = multi.println(format!("    Resume:\n{}", resume));
                }
            }
            PipelineEvent::DigestComposed(digest) => {
                spinner.set_message("Sending...");
                let _ = multi.println(format!("\nDigest:\n{}\n", digest));
            }
            PipelineEvent::ReplySent(message) => {
                tracing::debug!("Reply sent for uid={}", message.uid);
            }
            PipelineEvent::DigestSent => {
                spinner.set_message("Digest sent");
            }
        })
    };

    let pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(classifier),
        Arc::new(relay),
        config.operator.identity.clone(),
    )
    .dry_run(dry_run)
    .with_observer(observer);

    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e);
        }
    };
    reporter.finish_spinner(
        &spinner,
        &format!(
            "{} fetched, {} collected, {} replies sent",
            report.fetched,
            report.collected.len(),
            report.replies_sent
        ),
    );

    if let Some(path) = report_path {
        report.save(path).await?;
        tracing::info!("Report saved to {:?}", path);
    }
    Ok(report)
}
