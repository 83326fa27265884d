use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// OAuth2 credential for one mail account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the access token can still be used at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Replace the access token and expiry, keeping the refresh token unless a new one was issued
    pub fn refreshed(
        &self,
        access_token: String,
        expires_in_secs: i64,
        refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: self.account_id.clone(),
            access_token,
            refresh_token: refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            expires_at: now + Duration::seconds(expires_in_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub content_id: Option<String>,
    pub content_type: String,
    pub content_disposition: String,
    pub size: usize,
}

/// Canonical form of one fetched mailbox message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub uid: u32,
    pub subject: String,
    /// Raw `From` header, e.g. `Jane Doe <jane@example.com>`
    pub sender: String,
    pub recipients: Recipients,
    pub date: Option<DateTime<Utc>>,
    pub message_id: String,
    /// Message ids from the `References` header, in header order
    pub references: Vec<String>,
    /// Text handed to the language model (word-safe truncated)
    pub text: String,
    /// Untruncated plain text
    pub full_text: String,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub response: Option<String>,
    pub resume: Option<String>,
}

impl Message {
    /// A message continuing an existing conversation
    pub fn is_thread_reply(&self) -> bool {
        !self.references.is_empty()
    }

    /// Address replies go to: first Reply-To entry, otherwise the sender
    pub fn reply_address(&self) -> &str {
        self.recipients
            .reply_to
            .first()
            .map(String::as_str)
            .unwrap_or(&self.sender)
    }
}

/// One line of the digest listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub sender_display_name: Option<String>,
    pub sender_address: String,
    pub resume: String,
}

impl DigestEntry {
    pub fn from_message(message: &Message) -> Option<Self> {
        let resume = message.resume.clone()?;
        let (sender_display_name, sender_address) = split_mailbox(&message.sender);
        Some(Self {
            sender_display_name,
            sender_address,
            resume,
        })
    }

    /// Block handed to the digest composer
    pub fn to_listing_block(&self) -> String {
        let from = match &self.sender_display_name {
            Some(name) => format!("{} <{}>", name, self.sender_address),
            None => self.sender_address.clone(),
        };
        format!("From: {}\nBody:\n{}\n", from, self.resume)
    }
}

/// Split `Name <addr>` into its display name and address
pub fn split_mailbox(raw: &str) -> (Option<String>, String) {
    match mailparse::addrparse(raw) {
        Ok(list) => match list.extract_single_info() {
            Some(info) => (
                info.display_name.filter(|name| !name.trim().is_empty()),
                info.addr,
            ),
            None => (None, raw.trim().to_string()),
        },
        Err(_) => (None, raw.trim().to_string()),
    }
}

/// Why a message was left out of the digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ThreadReply,
    NoOffer,
}

/// Final state of one message after the pipeline processed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Collected,
    Skipped(SkipReason),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            account_id: "me@gmail.com".to_string(),
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_credential_validity() {
        let now = Utc::now();
        assert!(credential(now + Duration::seconds(60)).is_valid_at(now));
        assert!(!credential(now - Duration::seconds(1)).is_valid_at(now));
        assert!(!credential(now).is_valid_at(now));
    }

    #[test]
    fn test_refreshed_preserves_refresh_token() {
        let now = Utc::now();
        let old = credential(now - Duration::seconds(10));

        let new = old.refreshed("access-2".to_string(), 3599, None, now);
        assert_eq!(new.access_token, "access-2");
        assert_eq!(new.refresh_token, "refresh-1");
        assert_eq!(new.expires_at, now + Duration::seconds(3599));

        let rotated = old.refreshed("access-3".to_string(), 3599, Some("refresh-2".to_string()), now);
        assert_eq!(rotated.refresh_token, "refresh-2");

        let blank = old.refreshed("access-4".to_string(), 3599, Some(String::new()), now);
        assert_eq!(blank.refresh_token, "refresh-1");
    }

    #[test]
    fn test_reply_address_prefers_reply_to() {
        let mut message = Message {
            sender: "Jane <jane@example.com>".to_string(),
            ..Default::default()
        };
        assert_eq!(message.reply_address(), "Jane <jane@example.com>");

        message.recipients.reply_to = vec!["desk@example.com".to_string()];
        assert_eq!(message.reply_address(), "desk@example.com");
    }

    #[test]
    fn test_split_mailbox() {
        let (name, addr) = split_mailbox("Bill Gates <bill@gates.com>");
        assert_eq!(name.as_deref(), Some("Bill Gates"));
        assert_eq!(addr, "bill@gates.com");

        let (name, addr) = split_mailbox("msg@kremlin.ru");
        assert_eq!(name, None);
        assert_eq!(addr, "msg@kremlin.ru");
    }

    #[test]
    fn test_digest_entry_listing_block() {
        let message = Message {
            sender: "Bill Gates <bill@gates.com>".to_string(),
            resume: Some("Offering a project related to AI".to_string()),
            ..Default::default()
        };
        let entry = DigestEntry::from_message(&message).unwrap();
        assert_eq!(
            entry.to_listing_block(),
            "From: Bill Gates <bill@gates.com>\nBody:\nOffering a project related to AI\n"
        );
    }

    #[test]
    fn test_digest_entry_requires_resume() {
        let message = Message {
            sender: "bill@gates.com".to_string(),
            ..Default::default()
        };
        assert!(DigestEntry::from_message(&message).is_none());
    }
}
