//! Outbound mail: threaded replies and the digest over SMTP

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;

use crate::auth::OAuthTokenProvider;
use crate::config::{AccountAuth, MailAccount};
use crate::error::{AssistantError, Result};
use crate::models::Message;

pub const DIGEST_SUBJECT: &str = "[AI-Digest] Latest offerings and invitations";

/// Who outgoing mail is sent as, and where it may be redirected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub address: String,
    pub full_name: Option<String>,
    /// Replaces every recipient when set
    pub override_to: Option<String>,
}

/// A fully addressed outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from_name: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub body: String,
}

/// Reply to `message` threaded under it
pub fn compose_reply(identity: &SenderIdentity, message: &Message, body: &str) -> OutgoingMail {
    let (to, cc) = match &identity.override_to {
        Some(override_to) => (vec![override_to.clone()], Vec::new()),
        None => (
            vec![message.reply_address().to_string()],
            message.recipients.cc.clone(),
        ),
    };

    let in_reply_to = Some(message.message_id.clone()).filter(|id| !id.is_empty());
    let mut references = message.references.clone();
    if let Some(id) = &in_reply_to {
        references.push(id.clone());
    }

    OutgoingMail {
        from_name: identity.full_name.clone(),
        from: identity.address.clone(),
        to,
        cc,
        subject: format!("Re: {}", message.subject),
        in_reply_to,
        references: Some(references.join(" ")).filter(|r| !r.is_empty()),
        body: body.to_string(),
    }
}

/// Digest addressed to the account owner
pub fn compose_digest(identity: &SenderIdentity, digest: &str) -> OutgoingMail {
    OutgoingMail {
        from_name: identity.full_name.clone(),
        from: identity.address.clone(),
        to: vec![identity
            .override_to
            .clone()
            .unwrap_or_else(|| identity.address.clone())],
        cc: Vec::new(),
        subject: DIGEST_SUBJECT.to_string(),
        in_reply_to: None,
        references: None,
        body: digest.to_string(),
    }
}

impl OutgoingMail {
    /// Build the MIME message (UTF-8 plain text)
    pub fn to_mime(&self) -> Result<lettre::Message> {
        let from = Mailbox::new(self.from_name.clone(), self.from.parse()?);
        let mut builder = lettre::Message::builder()
            .from(from)
            .subject(self.subject.as_str());

        for to in &self.to {
            builder = builder.to(to.parse::<Mailbox>()?);
        }
        for cc in &self.cc {
            match cc.parse::<Mailbox>() {
                Ok(mailbox) => builder = builder.cc(mailbox),
                Err(e) => tracing::warn!("Dropping unparsable Cc '{}': {}", cc, e),
            }
        }
        if let Some(id) = &self.in_reply_to {
            builder = builder.in_reply_to(id.clone());
        }
        if let Some(references) = &self.references {
            builder = builder.references(references.clone());
        }

        Ok(builder
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())?)
    }
}

/// Opens outbound connections
#[async_trait]
pub trait MailRelay: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailSink>>;
}

/// An open outbound connection
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send_reply(&self, message: &Message, body: &str) -> Result<()>;

    async fn send_digest(&self, digest: &str) -> Result<()>;
}

/// SMTP over implicit TLS
pub struct SmtpRelay {
    account: MailAccount,
    identity: SenderIdentity,
    tokens: Option<Arc<OAuthTokenProvider>>,
}

impl SmtpRelay {
    pub fn new(
        account: MailAccount,
        identity: SenderIdentity,
        tokens: Option<Arc<OAuthTokenProvider>>,
    ) -> Self {
        Self {
            account,
            identity,
            tokens,
        }
    }

    async fn credentials(&self) -> Result<(Credentials, Vec<Mechanism>)> {
        match &self.account.auth {
            AccountAuth::Password(password) => Ok((
                Credentials::new(self.account.address.clone(), password.clone()),
                vec![Mechanism::Plain, Mechanism::Login],
            )),
            AccountAuth::OAuth2 => {
                let tokens = self.tokens.as_ref().ok_or_else(|| {
                    AssistantError::AuthError(format!(
                        "No token provider configured for OAuth2 account {}",
                        self.account.address
                    ))
                })?;
                let token = tokens.get_access_token(&self.account.address).await?;
                // AUTH XOAUTH2 base64(user=<addr>^Aauth=Bearer <token>^A^A)
                Ok((
                    Credentials::new(self.account.address.clone(), token),
                    vec![Mechanism::Xoauth2],
                ))
            }
        }
    }
}

#[async_trait]
impl MailRelay for SmtpRelay {
    async fn connect(&self) -> Result<Box<dyn MailSink>> {
        let (credentials, mechanisms) = self.credentials().await?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.account.server)?
            .port(self.account.port)
            .credentials(credentials)
            .authentication(mechanisms)
            .pool_config(PoolConfig::new().max_size(1))
            .build();

        if !transport.test_connection().await? {
            return Err(AssistantError::RelayError(format!(
                "{}:{} did not accept the connection",
                self.account.server, self.account.port
            )));
        }
        tracing::info!(
            "Connected to relay {}:{} as {}",
            self.account.server,
            self.account.port,
            self.account.address
        );

        Ok(Box::new(SmtpConnection {
            transport,
            identity: self.identity.clone(),
        }))
    }
}

struct SmtpConnection {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    identity: SenderIdentity,
}

impl SmtpConnection {
    async fn send(&self, mail: OutgoingMail) -> Result<()> {
        let mime = mail.to_mime()?;
        self.transport.send(mime).await?;
        tracing::info!("Sent '{}' to {}", mail.subject, mail.to.join(", "));
        Ok(())
    }
}

#[async_trait]
impl MailSink for SmtpConnection {
    async fn send_reply(&self, message: &Message, body: &str) -> Result<()> {
        self.send(compose_reply(&self.identity, message, body)).await
    }

    async fn send_digest(&self, digest: &str) -> Result<()> {
        self.send(compose_digest(&self.identity, digest)).await
    }
}
