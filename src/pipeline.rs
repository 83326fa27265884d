//! One assistant run: fetch, filter, draft, summarize, digest, send
//!
//! Messages are handled strictly in fetch order, one language-model call at a
//! time. A message whose drafting or summary fails is recorded as failed and
//! the run continues; fetching, digest composition and every send are fatal.
//! A run that collects nothing while some messages failed ends as
//! [`RunOutcome::AllFailed`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::error::Result;
use crate::mail_sink::MailRelay;
use crate::mail_source::MailSource;
use crate::models::{DigestEntry, Message, MessageOutcome, SkipReason};

/// Separator between listing blocks handed to the digest composer
pub const LISTING_SEPARATOR: &str = "---\n";

/// Notifications for the console while a run progresses
pub enum PipelineEvent<'a> {
    Fetched(usize),
    Processed {
        message: &'a Message,
        outcome: &'a MessageOutcome,
    },
    DigestComposed(&'a str),
    ReplySent(&'a Message),
    DigestSent,
}

pub type PipelineObserver = Arc<dyn Fn(&PipelineEvent<'_>) + Send + Sync>;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    NoUnseenMessages,
    NothingCollected,
    /// Nothing collected and at least one message failed
    AllFailed,
    /// Digest composed but nothing sent
    DryRun,
    Delivered,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectedItem {
    pub sender: String,
    pub subject: String,
    pub resume: String,
    pub reply: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub uid: u32,
    pub subject: String,
    pub reason: String,
}

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub thread_replies: usize,
    pub no_offer: usize,
    pub collected: Vec<CollectedItem>,
    pub failed: Vec<FailedItem>,
    pub replies_sent: usize,
    pub digest: Option<String>,
    pub digest_sent: bool,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            completed_at: now,
            dry_run,
            outcome: RunOutcome::NoUnseenMessages,
            fetched: 0,
            thread_replies: 0,
            no_offer: 0,
            collected: Vec::new(),
            failed: Vec::new(),
            replies_sent: 0,
            digest: None,
            digest_sent: false,
        }
    }

    fn finish(mut self, outcome: RunOutcome) -> Self {
        self.outcome = outcome;
        self.completed_at = Utc::now();
        self
    }

    fn record(&mut self, message: &Message, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Collected => self.collected.push(CollectedItem {
                sender: message.sender.clone(),
                subject: message.subject.clone(),
                resume: message.resume.clone().unwrap_or_default(),
                reply: message.response.clone().unwrap_or_default(),
            }),
            MessageOutcome::Skipped(SkipReason::ThreadReply) => self.thread_replies += 1,
            MessageOutcome::Skipped(SkipReason::NoOffer) => self.no_offer += 1,
            MessageOutcome::Failed(reason) => self.failed.push(FailedItem {
                uid: message.uid,
                subject: message.subject.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        if self.dry_run {
            md.push_str("# Email Assistant Report (DRY RUN)\n\n");
            md.push_str("> **DRY RUN MODE** - messages were left unseen and nothing was sent.\n\n");
        } else {
            md.push_str("# Email Assistant Report\n\n");
        }
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!("- **Outcome:** {:?}\n", self.outcome));
        md.push_str(&format!("- **Unseen messages fetched:** {}\n", self.fetched));
        md.push_str(&format!("- **Thread replies skipped:** {}\n", self.thread_replies));
        md.push_str(&format!("- **Without an offer:** {}\n", self.no_offer));
        md.push_str(&format!("- **Collected:** {}\n", self.collected.len()));
        md.push_str(&format!("- **Failed:** {}\n", self.failed.len()));
        md.push_str(&format!("- **Replies sent:** {}\n", self.replies_sent));
        md.push_str(&format!(
            "- **Digest sent:** {}\n\n",
            if self.digest_sent { "yes" } else { "no" }
        ));

        if !self.collected.is_empty() {
            md.push_str("## Collected Offers\n\n");
            md.push_str("| Sender | Subject | Resume |\n");
            md.push_str("|--------|---------|--------|\n");
            for item in &self.collected {
                md.push_str(&format!(
                    "| {} | {} | {} |\n",
                    escape_cell(&item.sender),
                    escape_cell(&item.subject),
                    escape_cell(&item.resume)
                ));
            }
            md.push('\n');
        }

        if !self.failed.is_empty() {
            md.push_str("## Failed Messages\n\n");
            for item in &self.failed {
                md.push_str(&format!(
                    "- uid {} **{}**: {}\n",
                    item.uid, item.subject, item.reason
                ));
            }
            md.push('\n');
        }

        if let Some(digest) = &self.digest {
            md.push_str("## Digest\n\n```\n");
            md.push_str(digest);
            md.push_str("\n```\n");
        }

        md
    }

    /// Save report to file
    pub async fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_markdown()).await
    }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Listing of "sender + resume" blocks for every collected message
pub fn build_listing(collected: &[Message]) -> String {
    collected
        .iter()
        .filter(|message| !message.is_thread_reply())
        .filter_map(DigestEntry::from_message)
        .map(|entry| entry.to_listing_block())
        .collect::<Vec<_>>()
        .join(LISTING_SEPARATOR)
}

pub struct Pipeline {
    source: Arc<dyn MailSource>,
    classifier: Arc<dyn Classifier>,
    relay: Arc<dyn MailRelay>,
    identity: String,
    dry_run: bool,
    observer: Option<PipelineObserver>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MailSource>,
        classifier: Arc<dyn Classifier>,
        relay: Arc<dyn MailRelay>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            source,
            classifier,
            relay,
            identity: identity.into(),
            dry_run: false,
            observer: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_observer(mut self, observer: PipelineObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: PipelineEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::new(self.dry_run);

        let messages = self.source.fetch_unseen().await?;
        report.fetched = messages.len();
        self.notify(PipelineEvent::Fetched(messages.len()));

        if messages.is_empty() {
            tracing::info!("No unseen messages, nothing to do");
            return Ok(report.finish(RunOutcome::NoUnseenMessages));
        }

        let mut collected = Vec::new();
        for mut message in messages {
            let outcome = match self.process_message(&mut message).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        "Message uid={} '{}' failed: {}",
                        message.uid,
                        message.subject,
                        e
                    );
                    MessageOutcome::Failed(e.to_string())
                }
            };

            report.record(&message, &outcome);
            self.notify(PipelineEvent::Processed {
                message: &message,
                outcome: &outcome,
            });
            if outcome == MessageOutcome::Collected {
                collected.push(message);
            }
        }

        tracing::info!(
            "Collected {} of {} messages ({} thread replies, {} without offer, {} failed)",
            collected.len(),
            report.fetched,
            report.thread_replies,
            report.no_offer,
            report.failed.len()
        );

        if collected.is_empty() {
            if !report.failed.is_empty() {
                tracing::error!(
                    "No message was collected and {} failed",
                    report.failed.len()
                );
                return Ok(report.finish(RunOutcome::AllFailed));
            }
            return Ok(report.finish(RunOutcome::NothingCollected));
        }

        let listing = build_listing(&collected);
        let digest = self.classifier.compose_digest(&listing).await?;
        self.notify(PipelineEvent::DigestComposed(&digest));
        report.digest = Some(digest.clone());

        if self.dry_run {
            tracing::info!("Dry run: skipping {} replies and the digest", collected.len());
            return Ok(report.finish(RunOutcome::DryRun));
        }

        let sink = self.relay.connect().await?;
        for message in &collected {
            let Some(body) = message.response.as_deref() else {
                continue;
            };
            if let Err(e) = sink.send_reply(message, body).await {
                tracing::error!(
                    "Reply to uid={} failed after {} sent: {}",
                    message.uid,
                    report.replies_sent,
                    e
                );
                return Err(e);
            }
            report.replies_sent += 1;
            self.notify(PipelineEvent::ReplySent(message));
        }

        sink.send_digest(&digest).await?;
        report.digest_sent = true;
        self.notify(PipelineEvent::DigestSent);

        Ok(report.finish(RunOutcome::Delivered))
    }

    /// Draft and summarize one message
    async fn process_message(&self, message: &mut Message) -> Result<MessageOutcome> {
        if message.is_thread_reply() {
            tracing::debug!("uid={} continues a thread, skipping", message.uid);
            return Ok(MessageOutcome::Skipped(SkipReason::ThreadReply));
        }

        let Some(response) = self
            .classifier
            .draft_response(&message.text, &self.identity)
            .await?
        else {
            tracing::debug!("uid={} holds no offer", message.uid);
            return Ok(MessageOutcome::Skipped(SkipReason::NoOffer));
        };
        message.response = Some(response);

        let resume = self.classifier.summarize(&message.text).await?;
        message.resume = Some(resume);

        Ok(MessageOutcome::Collected)
    }
}
