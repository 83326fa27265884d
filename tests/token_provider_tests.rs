//! Access-token lifecycle: cached, refreshed, authorized

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{
    create_client_secret, create_credential, token_response, MockAuthorizationPrompt,
    MockTokenEndpoint, ACCOUNT,
};
use email_assistant::auth::OAuthTokenProvider;
use email_assistant::error::AssistantError;
use email_assistant::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
use tempfile::TempDir;

fn prompt_never_called() -> MockAuthorizationPrompt {
    let mut prompt = MockAuthorizationPrompt::new();
    prompt.expect_request_code().never();
    prompt
}

fn provider(
    store: Arc<dyn TokenStore>,
    endpoint: MockTokenEndpoint,
    prompt: MockAuthorizationPrompt,
) -> OAuthTokenProvider {
    OAuthTokenProvider::new(
        create_client_secret(),
        store,
        Arc::new(endpoint),
        Arc::new(prompt),
    )
}

#[tokio::test]
async fn test_valid_token_needs_no_network() {
    let store = Arc::new(MemoryTokenStore::with_credential(create_credential(600)));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint.expect_refresh().never();
    endpoint.expect_exchange_code().never();

    let tokens = provider(store, endpoint, prompt_never_called());
    assert_eq!(tokens.get_access_token(ACCOUNT).await.unwrap(), "ya29.cached");
}

#[tokio::test]
async fn test_expired_token_refreshed_exactly_once() {
    let store = Arc::new(MemoryTokenStore::with_credential(create_credential(-60)));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint
        .expect_refresh()
        .withf(|secret, refresh_token| {
            secret.client_id == "client-id" && refresh_token == "1//refresh-original"
        })
        .times(1)
        .returning(|_, _| Ok(token_response("ya29.fresh", None)));
    endpoint.expect_exchange_code().never();

    let tokens = provider(store.clone(), endpoint, prompt_never_called());
    assert_eq!(tokens.get_access_token(ACCOUNT).await.unwrap(), "ya29.fresh");

    let saved = store.load(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(saved.access_token, "ya29.fresh");
    assert_eq!(saved.refresh_token, "1//refresh-original");
    assert!(saved.is_valid_at(Utc::now()));

    // Second call is served from the refreshed credential
    assert_eq!(tokens.get_access_token(ACCOUNT).await.unwrap(), "ya29.fresh");
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let store = Arc::new(MemoryTokenStore::with_credential(create_credential(-60)));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint
        .expect_refresh()
        .times(1)
        .returning(|_, _| Ok(token_response("ya29.fresh", Some("1//rotated"))));

    let tokens = provider(store.clone(), endpoint, prompt_never_called());
    tokens.get_access_token(ACCOUNT).await.unwrap();

    let saved = store.load(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(saved.refresh_token, "1//rotated");
}

#[tokio::test]
async fn test_revoked_refresh_token_is_fatal() {
    let store = Arc::new(MemoryTokenStore::with_credential(create_credential(-60)));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint.expect_refresh().times(1).returning(|_, _| {
        Err(AssistantError::TokenExchange {
            status: 400,
            message: r#"{"error": "invalid_grant"}"#.to_string(),
        })
    });

    let tokens = provider(store.clone(), endpoint, prompt_never_called());
    let result = tokens.get_access_token(ACCOUNT).await;
    assert!(matches!(result, Err(AssistantError::TokenExchange { status: 400, .. })));

    // Stored credential untouched
    let saved = store.load(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(saved.access_token, "ya29.cached");
}

#[tokio::test]
async fn test_missing_credential_runs_authorization() {
    let store = Arc::new(MemoryTokenStore::new());

    let mut prompt = MockAuthorizationPrompt::new();
    prompt
        .expect_request_code()
        .withf(|account, url| {
            account == ACCOUNT
                && url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?")
                && url.contains("access_type=offline")
        })
        .times(1)
        .returning(|_, _| Ok("4/code".to_string()));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint
        .expect_exchange_code()
        .withf(|_, code| code == "4/code")
        .times(1)
        .returning(|_, _| Ok(token_response("ya29.first", Some("1//first"))));
    endpoint.expect_refresh().never();

    let tokens = provider(store.clone(), endpoint, prompt);
    assert_eq!(tokens.get_access_token(ACCOUNT).await.unwrap(), "ya29.first");

    let saved = store.load(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(saved.refresh_token, "1//first");
}

#[tokio::test]
async fn test_authorization_without_refresh_token_fails() {
    let store = Arc::new(MemoryTokenStore::new());

    let mut prompt = MockAuthorizationPrompt::new();
    prompt
        .expect_request_code()
        .returning(|_, _| Ok("4/code".to_string()));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint
        .expect_exchange_code()
        .returning(|_, _| Ok(token_response("ya29.first", None)));

    let tokens = provider(store.clone(), endpoint, prompt);
    let result = tokens.get_access_token(ACCOUNT).await;

    assert!(matches!(result, Err(AssistantError::AuthError(_))));
    assert!(store.load(ACCOUNT).await.unwrap().is_none());
}

#[tokio::test]
async fn test_forget_forces_reauthorization() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path()));
    store.save(ACCOUNT, &create_credential(600)).await.unwrap();

    let mut prompt = MockAuthorizationPrompt::new();
    prompt
        .expect_request_code()
        .times(1)
        .returning(|_, _| Ok("4/again".to_string()));

    let mut endpoint = MockTokenEndpoint::new();
    endpoint
        .expect_exchange_code()
        .times(1)
        .returning(|_, _| Ok(token_response("ya29.again", Some("1//again"))));

    let tokens = provider(store.clone(), endpoint, prompt);
    tokens.forget(ACCOUNT).await.unwrap();
    assert!(!store.path_for(ACCOUNT).exists());

    assert_eq!(tokens.get_access_token(ACCOUNT).await.unwrap(), "ya29.again");
    assert!(store.path_for(ACCOUNT).exists());
}
