//! Email Assistant
//!
//! Reads unseen mail, drafts polite replies to personal offers of AI work,
//! and mails the operator a digest of everything it answered.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 (XOAUTH2) with per-account token caching, or passwords
//! - **Inbound**: unseen messages from an IMAP folder, normalized to plain text
//! - **Classification**: language-model prompts for drafting, summaries and the digest
//! - **Outbound**: threaded replies and the digest over SMTP
//!
//! # Example Usage
//!
//! ```no_run
//! use email_assistant::config::Config;
//! use email_assistant::cli::run_pipeline;
//! use indicatif::MultiProgress;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("email-assistant.toml".as_ref()).await?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let report = run_pipeline(&config, true, None, MultiProgress::new()).await?;
//!     println!("{} offers collected", report.collected.len());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 client secret, token endpoint and token provider
//! - [`classifier`] - Prompt templates over a language model
//! - [`cli`] - Command-line interface and production wiring
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`mail_sink`] - Reply and digest composition, SMTP relay
//! - [`mail_source`] - IMAP fetching and message normalization
//! - [`models`] - Core data structures
//! - [`pipeline`] - Per-run orchestration and report
//! - [`token_store`] - Credential persistence

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod mail_sink;
pub mod mail_source;
pub mod models;
pub mod pipeline;
pub mod token_store;

pub use error::{AssistantError, Result};

pub use models::{Attachment, Credential, DigestEntry, Message, MessageOutcome, Recipients, SkipReason};

pub use config::{AccountAuth, Config, MailAccount};

pub use auth::{AuthorizationPrompt, ClientSecret, OAuthTokenProvider, TokenEndpoint};
pub use classifier::{Classifier, LanguageModel, PromptClassifier};
pub use mail_sink::{MailRelay, MailSink, SenderIdentity};
pub use mail_source::MailSource;
pub use pipeline::{Pipeline, RunOutcome, RunReport};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};

pub use cli::{Cli, Commands, ProgressReporter};
