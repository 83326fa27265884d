//! Inbound mail: unseen messages from an IMAP folder
//!
//! Fetching is consume-on-read: unless the account keeps messages unseen,
//! every message returned by [`MailSource::fetch_unseen`] has already been
//! flagged `\Seen` on the server. Messages that fail to parse are not
//! returned and stay unseen.

use async_trait::async_trait;
use chrono::DateTime;
use html2text::render::text_renderer::TrivialDecorator;
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::auth::OAuthTokenProvider;
use crate::config::{AccountAuth, MailAccount};
use crate::error::{AssistantError, Result};
use crate::models::{Attachment, Message, Recipients};

/// Source of unseen inbox messages
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Unseen messages at connection time, in UID order
    async fn fetch_unseen(&self) -> Result<Vec<Message>>;
}

/// SASL XOAUTH2 initial client response (before base64)
pub fn xoauth2_response(user: &str, access_token: &str) -> String {
    format!("user={}\x01auth=Bearer {}\x01\x01", user, access_token)
}

struct XOAuth2Authenticator {
    response: String,
}

impl imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        self.response.clone()
    }
}

enum ImapLogin {
    Password(String),
    Bearer(String),
}

/// IMAP-over-TLS mailbox
pub struct ImapMailSource {
    account: MailAccount,
    folder: String,
    keep_unseen: bool,
    max_prompt_chars: usize,
    tokens: Option<Arc<OAuthTokenProvider>>,
}

impl ImapMailSource {
    pub fn new(
        account: MailAccount,
        folder: String,
        keep_unseen: bool,
        max_prompt_chars: usize,
        tokens: Option<Arc<OAuthTokenProvider>>,
    ) -> Self {
        Self {
            account,
            folder,
            keep_unseen,
            max_prompt_chars,
            tokens,
        }
    }

    async fn login(&self) -> Result<ImapLogin> {
        match &self.account.auth {
            AccountAuth::Password(password) => Ok(ImapLogin::Password(password.clone())),
            AccountAuth::OAuth2 => {
                let tokens = self.tokens.as_ref().ok_or_else(|| {
                    AssistantError::AuthError(format!(
                        "No token provider configured for OAuth2 account {}",
                        self.account.address
                    ))
                })?;
                let token = tokens.get_access_token(&self.account.address).await?;
                Ok(ImapLogin::Bearer(token))
            }
        }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch_unseen(&self) -> Result<Vec<Message>> {
        let login = self.login().await?;
        let account = self.account.clone();
        let folder = self.folder.clone();
        let keep_unseen = self.keep_unseen;
        let max_prompt_chars = self.max_prompt_chars;

        tracing::info!(
            "Connecting to {}:{} as {}",
            account.server,
            account.port,
            account.address
        );
        let messages = tokio::task::spawn_blocking(move || {
            fetch_unseen_blocking(&account, login, &folder, keep_unseen, max_prompt_chars)
        })
        .await
        .map_err(|e| AssistantError::MailboxError(format!("IMAP worker failed: {}", e)))??;

        tracing::info!("Fetched {} unseen messages from {}", messages.len(), self.folder);
        Ok(messages)
    }
}

/// Parse fetched bodies, dropping the ones that cannot be parsed
///
/// Only UIDs of the returned messages are flagged `\Seen` afterwards, so an
/// unparsable message stays unseen on the server.
pub fn parse_fetched(raw_messages: Vec<(u32, Vec<u8>)>, max_prompt_chars: usize) -> Vec<Message> {
    let mut messages = Vec::with_capacity(raw_messages.len());
    for (uid, raw) in raw_messages {
        match parse_message(uid, &raw, max_prompt_chars) {
            Ok(message) => messages.push(message),
            Err(e) => tracing::warn!("Leaving unparsable message uid={} unseen: {}", uid, e),
        }
    }
    messages
}

fn uid_set(uids: impl Iterator<Item = u32>) -> String {
    uids.map(|uid| uid.to_string()).collect::<Vec<_>>().join(",")
}

fn fetch_unseen_blocking(
    account: &MailAccount,
    login: ImapLogin,
    folder: &str,
    keep_unseen: bool,
    max_prompt_chars: usize,
) -> Result<Vec<Message>> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| AssistantError::NetworkError(format!("TLS setup failed: {}", e)))?;
    let client = imap::connect((account.server.as_str(), account.port), &account.server, &tls)?;

    let mut session = match login {
        ImapLogin::Password(password) => client
            .login(&account.address, &password)
            .map_err(|(e, _)| AssistantError::AuthError(format!("IMAP login failed: {}", e)))?,
        ImapLogin::Bearer(token) => {
            let authenticator = XOAuth2Authenticator {
                response: xoauth2_response(&account.address, &token),
            };
            client
                .authenticate("XOAUTH2", &authenticator)
                .map_err(|(e, _)| AssistantError::AuthError(format!("IMAP XOAUTH2 failed: {}", e)))?
        }
    };

    session.select(folder)?;
    let mut uids: Vec<u32> = session.uid_search("UNSEEN")?.into_iter().collect();
    uids.sort_unstable();
    tracing::debug!("{} unseen messages in {}", uids.len(), folder);

    let mut raw_messages = Vec::with_capacity(uids.len());
    if !uids.is_empty() {
        let fetches = session.uid_fetch(uid_set(uids.iter().copied()), "(UID BODY.PEEK[])")?;
        for fetch in fetches.iter() {
            match (fetch.uid, fetch.body()) {
                (Some(uid), Some(body)) => raw_messages.push((uid, body.to_vec())),
                _ => tracing::warn!("Fetch response without UID or body (seq {})", fetch.message),
            }
        }
        raw_messages.sort_by_key(|(uid, _)| *uid);
    }

    let messages = parse_fetched(raw_messages, max_prompt_chars);
    if !keep_unseen && !messages.is_empty() {
        session.uid_store(uid_set(messages.iter().map(|m| m.uid)), "+FLAGS (\\Seen)")?;
        tracing::debug!("Marked {} messages as seen", messages.len());
    }

    if let Err(e) = session.logout() {
        tracing::debug!("IMAP logout error (non-fatal): {}", e);
    }
    Ok(messages)
}

static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>\s]+>").unwrap());

/// Normalize a raw RFC 5322 message
pub fn parse_message(uid: u32, raw: &[u8], max_prompt_chars: usize) -> Result<Message> {
    let parsed = mailparse::parse_mail(raw)?;
    let headers = &parsed.headers;

    let sender = address_list(&parsed, "From")
        .into_iter()
        .next()
        .or_else(|| headers.get_first_value("From"))
        .unwrap_or_default();

    let recipients = Recipients {
        to: address_list(&parsed, "To"),
        cc: address_list(&parsed, "Cc"),
        bcc: address_list(&parsed, "Bcc"),
        reply_to: address_list(&parsed, "Reply-To"),
    };

    let date = headers
        .get_first_value("Date")
        .and_then(|value| mailparse::dateparse(&value).ok())
        .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0));

    let message_id = headers
        .get_first_value("Message-ID")
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    let references = headers
        .get_first_value("References")
        .map(|value| split_message_ids(&value))
        .unwrap_or_default();

    let mut plain = Vec::new();
    let mut html = Vec::new();
    let mut attachments = Vec::new();
    collect_parts(&parsed, &mut plain, &mut html, &mut attachments);

    let html = if html.is_empty() {
        None
    } else {
        Some(html.join("\n"))
    };
    let full_text = if plain.iter().any(|part| !part.trim().is_empty()) {
        plain.join("\n")
    } else {
        html.as_deref().map(html_to_text).unwrap_or_default()
    };
    let text = truncate_words(&full_text, max_prompt_chars);

    Ok(Message {
        uid,
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        sender,
        recipients,
        date,
        message_id,
        references,
        text,
        full_text,
        html,
        attachments,
        response: None,
        resume: None,
    })
}

fn address_list(parsed: &ParsedMail, header: &str) -> Vec<String> {
    let Some(header) = parsed.headers.get_first_header(header) else {
        return Vec::new();
    };
    match mailparse::addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.to_string()],
                MailAddr::Group(group) => group.addrs.iter().map(|info| info.to_string()).collect(),
            })
            .collect(),
        Err(_) => {
            let value = header.get_value();
            if value.trim().is_empty() {
                Vec::new()
            } else {
                vec![value.trim().to_string()]
            }
        }
    }
}

/// Message ids of a `References`/`In-Reply-To` value
pub fn split_message_ids(value: &str) -> Vec<String> {
    let ids: Vec<String> = MESSAGE_ID
        .find_iter(value)
        .map(|m| m.as_str().to_string())
        .collect();
    if ids.is_empty() {
        value.split_whitespace().map(str::to_string).collect()
    } else {
        ids
    }
}

fn collect_parts(
    part: &ParsedMail,
    plain: &mut Vec<String>,
    html: &mut Vec<String>,
    attachments: &mut Vec<Attachment>,
) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, plain, html, attachments);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.to_lowercase();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let is_body = disposition.disposition != DispositionType::Attachment
        && filename.is_none()
        && (mimetype == "text/plain" || mimetype == "text/html");

    if is_body {
        match part.get_body() {
            Ok(body) if mimetype == "text/html" => html.push(body),
            Ok(body) => plain.push(body),
            Err(e) => tracing::warn!("Failed to decode {} part: {}", mimetype, e),
        }
        return;
    }

    let payload = part.get_body_raw().unwrap_or_default();
    let content_disposition = match &disposition.disposition {
        DispositionType::Inline => "inline".to_string(),
        DispositionType::Attachment => "attachment".to_string(),
        DispositionType::FormData => "form-data".to_string(),
        DispositionType::Extension(other) => other.clone(),
    };
    attachments.push(Attachment {
        filename: filename.unwrap_or_default(),
        size: payload.len(),
        payload,
        content_id: part.headers.get_first_value("Content-ID"),
        content_type: mimetype,
        content_disposition,
    });
}

/// Wide enough that paragraphs are not re-wrapped for the prompt
const HTML_RENDER_WIDTH: usize = 1_000;

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x{a0}]+").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n(\s*\n)+").unwrap());

/// Plain-text rendition of an HTML body
///
/// Entities are decoded and `<head>`, `<style>` and `<script>` content is
/// dropped by the HTML parser. Malformed markup that trips the renderer yields
/// an empty string rather than aborting the fetch.
pub fn html_to_text(html: &str) -> String {
    let rendered = std::panic::catch_unwind(|| {
        html2text::from_read_with_decorator(
            html.as_bytes(),
            HTML_RENDER_WIDTH,
            TrivialDecorator::new(),
        )
    })
    .unwrap_or_default();

    let text = SPACES.replace_all(&rendered, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let text = lines.join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Cut `text` to at most `max_chars` characters without splitting words
///
/// Text that already fits is returned unchanged; otherwise the result is the
/// longest run of leading words joined by single spaces.
pub fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut result = String::new();
    let mut len = 0;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let needed = if result.is_empty() { word_len } else { word_len + 1 };
        if len + needed > max_chars {
            break;
        }
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
        len += needed;
    }
    result
}
