//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{Duration, Utc};
use email_assistant::auth::{AuthorizationPrompt, ClientSecret, TokenEndpoint, TokenResponse};
use email_assistant::classifier::Classifier;
use email_assistant::error::Result;
use email_assistant::mail_sink::{MailRelay, MailSink};
use email_assistant::mail_source::MailSource;
use email_assistant::models::{Credential, Message, Recipients};
use mockall::mock;

pub const ACCOUNT: &str = "me@gmail.com";

/// Create an unseen message starting a new conversation
pub fn create_offer_message(uid: u32, sender: &str, subject: &str) -> Message {
    let text = format!("Hello, would you join our {}?", subject);
    Message {
        uid,
        subject: subject.to_string(),
        sender: sender.to_string(),
        recipients: Recipients {
            to: vec![ACCOUNT.to_string()],
            ..Default::default()
        },
        date: Some(Utc::now()),
        message_id: format!("<msg-{}@example.com>", uid),
        full_text: text.clone(),
        text,
        ..Default::default()
    }
}

/// Create a message that continues an existing thread
pub fn create_thread_reply(uid: u32, sender: &str) -> Message {
    let mut message = create_offer_message(uid, sender, "Re: earlier conversation");
    message.references = vec!["<root@example.com>".to_string()];
    message
}

pub fn create_credential(expires_in_secs: i64) -> Credential {
    Credential {
        account_id: ACCOUNT.to_string(),
        access_token: "ya29.cached".to_string(),
        refresh_token: "1//refresh-original".to_string(),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
    }
}

pub fn create_client_secret() -> ClientSecret {
    ClientSecret {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_uri: "https://oauth2.dance/".to_string(),
        auth_uri: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        scope: "https://mail.google.com/".to_string(),
    }
}

pub fn token_response(access_token: &str, refresh_token: Option<&str>) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        expires_in: 3599,
        refresh_token: refresh_token.map(str::to_string),
        token_type: Some("Bearer".to_string()),
    }
}

mock! {
    pub MailSource {}

    #[async_trait::async_trait]
    impl MailSource for MailSource {
        async fn fetch_unseen(&self) -> Result<Vec<Message>>;
    }
}

mock! {
    pub Classifier {}

    #[async_trait::async_trait]
    impl Classifier for Classifier {
        async fn draft_response(&self, email_text: &str, identity: &str) -> Result<Option<String>>;
        async fn summarize(&self, email_text: &str) -> Result<String>;
        async fn compose_digest(&self, listing: &str) -> Result<String>;
    }
}

mock! {
    pub MailRelay {}

    #[async_trait::async_trait]
    impl MailRelay for MailRelay {
        async fn connect(&self) -> Result<Box<dyn MailSink>>;
    }
}

mock! {
    pub MailSink {}

    #[async_trait::async_trait]
    impl MailSink for MailSink {
        async fn send_reply(&self, message: &Message, body: &str) -> Result<()>;
        async fn send_digest(&self, digest: &str) -> Result<()>;
    }
}

mock! {
    pub TokenEndpoint {}

    #[async_trait::async_trait]
    impl TokenEndpoint for TokenEndpoint {
        async fn exchange_code(&self, secret: &ClientSecret, code: &str) -> Result<TokenResponse>;
        async fn refresh(&self, secret: &ClientSecret, refresh_token: &str) -> Result<TokenResponse>;
    }
}

mock! {
    pub AuthorizationPrompt {}

    #[async_trait::async_trait]
    impl AuthorizationPrompt for AuthorizationPrompt {
        async fn request_code(&self, account_id: &str, consent_url: &str) -> Result<String>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_offer_message() {
        let msg = create_offer_message(7, "Bill Gates <bill@gates.com>", "AI project");
        assert_eq!(msg.uid, 7);
        assert_eq!(msg.message_id, "<msg-7@example.com>");
        assert!(!msg.is_thread_reply());
        assert_eq!(msg.text, msg.full_text);
    }

    #[test]
    fn test_create_thread_reply() {
        assert!(create_thread_reply(1, "a@b.c").is_thread_reply());
    }
}
