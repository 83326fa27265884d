//! Language-model capabilities: reply drafting, summaries and the digest

use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};

/// Marker the drafting prompt answers with when there is no offer to reply to
pub const NO_OFFER: &str = "NONE";

const RESPONSE_TEMPLATE: &str = "You are helpful personal assistant.
Read the provided message and if it's addressed personally to {me} and
offer a participation in some project related to creation of AI application or
other AI-based project, create a polite answer from me, stating that I will
concider the offer and respond to it as soon as possible.
If the message doesn't contain any such offerings, response with just a \"NONE\".

The message:
{email_message}
";

const RESUME_TEMPLATE: &str = "You are helpful personal assistant.
Read the provided email message and make it compact and concise. Use only body of the message.
The main criteria you should follow - the result should be no longer than initial message.
Omit greetings and introductions. Keep all important details, especially the subject, contacts, dates and values.

The message:
{email_message}
";

const DIGEST_TEMPLATE: &str = "You are helpful personal assistant.
Read the provided list of emails and make it compact and concise.
Use the provided example for the digest.
Digest should be a list where each line formated as \"- <Sender's Full name> (<Sender's email>): <Message resume>\".

Example of the digest:
- Bill Gates (bill@gates.com): Offering a project related to AI
- Mikhail Gorbachev (msg@kremlin.ru): Asking about ways to use AI to make money

The list of emails:
{email_list}
";

pub fn response_prompt(email_text: &str, identity: &str) -> String {
    RESPONSE_TEMPLATE
        .replace("{me}", identity)
        .replace("{email_message}", email_text)
}

pub fn resume_prompt(email_text: &str) -> String {
    RESUME_TEMPLATE.replace("{email_message}", email_text)
}

pub fn digest_prompt(listing: &str) -> String {
    DIGEST_TEMPLATE.replace("{email_list}", listing)
}

/// Text-in/text-out completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, model: &str, temperature: f32, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat completion endpoint
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
}

impl OpenAiModel {
    /// Without an explicit key the client falls back to `OPENAI_API_KEY`
    pub fn from_config(config: &AssistantConfig) -> Self {
        let mut openai = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai = openai.with_api_key(key);
        }
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, model: &str, temperature: f32, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .temperature(temperature)
            .messages(vec![ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into()])
            .build()?;

        tracing::debug!("Requesting completion from {} ({} chars)", model, prompt.len());
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                AssistantError::LanguageModel(format!("{} returned no completion", model))
            })
    }
}

/// The three capabilities the pipeline needs
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Draft a reply, `None` when the message holds no offer
    async fn draft_response(&self, email_text: &str, identity: &str) -> Result<Option<String>>;

    async fn summarize(&self, email_text: &str) -> Result<String>;

    async fn compose_digest(&self, listing: &str) -> Result<String>;
}

/// Which model serves each capability
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChoice {
    pub response_model: String,
    pub resume_model: String,
    pub digest_model: String,
    pub temperature: f32,
}

impl From<&AssistantConfig> for ModelChoice {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            response_model: config.response_model.clone(),
            resume_model: config.resume_model.clone(),
            digest_model: config.digest_model.clone(),
            temperature: config.temperature,
        }
    }
}

/// Classifier built from fixed prompt templates over a [`LanguageModel`]
pub struct PromptClassifier {
    model: Arc<dyn LanguageModel>,
    choice: ModelChoice,
}

impl PromptClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, choice: ModelChoice) -> Self {
        Self { model, choice }
    }
}

#[async_trait]
impl Classifier for PromptClassifier {
    async fn draft_response(&self, email_text: &str, identity: &str) -> Result<Option<String>> {
        let answer = self
            .model
            .complete(
                &self.choice.response_model,
                self.choice.temperature,
                &response_prompt(email_text, identity),
            )
            .await?;

        let answer = answer.trim();
        if answer == NO_OFFER || answer.is_empty() {
            return Ok(None);
        }
        Ok(Some(answer.to_string()))
    }

    async fn summarize(&self, email_text: &str) -> Result<String> {
        let resume = self
            .model
            .complete(
                &self.choice.resume_model,
                self.choice.temperature,
                &resume_prompt(email_text),
            )
            .await?;
        Ok(resume.trim().to_string())
    }

    async fn compose_digest(&self, listing: &str) -> Result<String> {
        let digest = self
            .model
            .complete(
                &self.choice.digest_model,
                self.choice.temperature,
                &digest_prompt(listing),
            )
            .await?;

        let digest = digest.trim();
        if digest.is_empty() {
            return Err(AssistantError::LanguageModel(
                "digest composition returned empty text".to_string(),
            ));
        }
        Ok(digest.to_string())
    }
}
