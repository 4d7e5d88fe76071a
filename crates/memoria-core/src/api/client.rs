//! Authenticated client for the album API.
//!
//! Every request is signed with the stored access token. When the API
//! rejects the token, the client refreshes it once using the stored refresh
//! token and replays the request; if the refresh fails the session is
//! cleared and the caller gets `ApiError::SessionExpired`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, SessionState, SessionTracker, StorageError, TokenPair};
use crate::config::ClientConfig;

use super::envelope::{ApiResponse, Envelope};
use super::request::{build_form, Method, MultipartPart, RequestBody, RequestOptions};
use super::ApiError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Why a token refresh did not produce a usable token
#[derive(Error, Debug)]
enum RefreshFailure {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected: {0}")]
    Rejected(ApiError),

    #[error("refresh response carried no access token")]
    EmptyResult,
}

/// Result of a single dispatch
enum Outcome<T> {
    Done(ApiResponse<T>),
    AuthFailure,
}

/// Token snapshot a request was signed with
struct Signature {
    token: String,
    generation: u64,
}

struct Inner {
    http: Client,
    config: ClientConfig,
    store: CredentialStore,
    /// Held while a refresh is in flight; concurrent auth failures queue here
    refresh_lock: Mutex<()>,
    /// Bumped whenever the stored tokens change (refresh, login, logout)
    generation: AtomicU64,
    session: SessionTracker,
}

/// API client with transparent bearer auth and token refresh.
/// Clone is cheap - all clones share the connection pool, the refresh guard
/// and the session state.
#[derive(Clone)]
pub struct AuthenticatedClient {
    inner: Arc<Inner>,
}

impl AuthenticatedClient {
    /// Create a client over an explicit credential store
    pub fn new(config: ClientConfig, store: CredentialStore) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                store,
                refresh_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                session: SessionTracker::default(),
            }),
        })
    }

    /// Create a client whose secrets live in the OS keychain under
    /// `config.keyring_service`
    pub fn with_keyring(config: ClientConfig) -> Result<Self> {
        let store = CredentialStore::keyring(&config.keyring_service);
        Self::new(config, store)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.current()
    }

    /// Watch session transitions, e.g. to route to login on `LoggedOut`
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    // ===== Session Lifecycle =====

    /// Derive the session state from the stored access token
    pub async fn restore(&self) -> std::result::Result<SessionState, StorageError> {
        let state = if self.inner.store.has_session().await? {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        self.inner.session.transition(state);
        Ok(state)
    }

    /// Persist the tokens returned by a successful login
    pub async fn login(
        &self,
        tokens: &TokenPair,
        login_id: &str,
    ) -> std::result::Result<(), StorageError> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.store_tokens(tokens).await?;
        self.inner.store.set_login_id(login_id).await?;
        self.bump_generation();
        self.inner.session.transition(SessionState::Authenticated);
        info!("Logged in");
        Ok(())
    }

    /// Clear all secrets
    pub async fn logout(&self) -> std::result::Result<(), StorageError> {
        let _guard = self.inner.refresh_lock.lock().await;
        let cleared = self.inner.store.clear_all().await;
        self.bump_generation();
        self.inner.session.transition(SessionState::LoggedOut);
        info!("Logged out");
        cleared
    }

    // ===== Requests =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.send(Method::Get, path, RequestBody::Empty, RequestOptions::default())
            .await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<ApiResponse<T>> {
        self.send(Method::Post, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<ApiResponse<T>> {
        self.send(Method::Patch, path, body.into(), RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.send(Method::Delete, path, RequestBody::Empty, RequestOptions::default())
            .await
    }

    /// POST a multipart form (photo uploads)
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<MultipartPart>,
    ) -> Result<ApiResponse<T>> {
        self.send(
            Method::Post,
            path,
            RequestBody::Multipart(parts),
            RequestOptions::default(),
        )
        .await
    }

    /// Send a request, refreshing the access token at most once if the API
    /// rejects it.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        let url = self.inner.config.endpoint(path);
        let signature = self.sign().await?;

        debug!(%method, url = %url, "Sending request");
        if let Outcome::Done(response) = self
            .dispatch(method, &url, &body, &options, &signature.token)
            .await?
        {
            return Ok(response);
        }

        debug!(%method, url = %url, "Access token rejected");
        let token = self.refresh_after(signature.generation).await?;

        debug!(%method, url = %url, "Retrying with refreshed token");
        match self.dispatch(method, &url, &body, &options, &token).await? {
            Outcome::Done(response) => Ok(response),
            Outcome::AuthFailure => {
                warn!(%method, url = %url, "Refreshed token rejected");
                Err(ApiError::Unauthorized)
            }
        }
    }

    async fn sign(&self) -> Result<Signature> {
        // Read the generation first so a refresh that lands in between is
        // noticed as already done
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let token = self.inner.store.access_token().await?;
        Ok(Signature { token, generation })
    }

    fn bump_generation(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn default_headers(&self, body: &RequestBody, token: &str) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if !matches!(body, RequestBody::Multipart(_)) {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
        }
        if !token.is_empty() {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidHeader("authorization".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &RequestBody,
        options: &RequestOptions,
        token: &str,
    ) -> Result<Outcome<T>> {
        let mut headers = self.default_headers(body, token)?;
        let mut request = self.inner.http.request(method.into(), url);
        let mut boundary = None;

        match body {
            RequestBody::Empty => {}
            RequestBody::Json(value) => request = request.json(value),
            RequestBody::Multipart(parts) => {
                let form = build_form(parts)?;
                let content_type = format!(
                    "{}; boundary={}",
                    self.inner.config.multipart_content_type,
                    form.boundary()
                );
                headers.insert(header::CONTENT_TYPE, Self::header_value(&content_type)?);
                boundary = Some(form.boundary().to_string());
                request = request.multipart(form);
            }
        }

        options.merge_into(&mut headers)?;
        if let Some(boundary) = boundary {
            Self::keep_boundary(&mut headers, &boundary)?;
        }
        // Replaces anything the body helpers set
        request = request.headers(headers);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Ok(Outcome::AuthFailure);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Some deployments report a rejected token as a 4xx with an API code
            if let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
                if self.is_auth_failure(&envelope) {
                    return Ok(Outcome::AuthFailure);
                }
            }
            debug!(url = url, status = %status, "Request failed");
            return Err(ApiError::from_status(status, &body));
        }

        let text = response.text().await?;
        let envelope = Self::parse_envelope(url, &text)?;

        if self.is_auth_failure(&envelope) {
            return Ok(Outcome::AuthFailure);
        }

        let result = envelope
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ApiError::InvalidResponse(format!("Unexpected result from {}: {}", url, e))
            })?;

        Ok(Outcome::Done(ApiResponse {
            status,
            envelope: Envelope {
                is_success: envelope.is_success,
                code: envelope.code,
                message: envelope.message,
                result,
            },
        }))
    }

    fn is_auth_failure(&self, envelope: &Envelope<serde_json::Value>) -> bool {
        !envelope.is_success
            && envelope
                .code
                .is_some_and(|code| self.inner.config.is_auth_error_code(code))
    }

    fn header_value(value: &str) -> Result<header::HeaderValue> {
        header::HeaderValue::from_str(value).map_err(|_| ApiError::InvalidHeader(value.to_string()))
    }

    /// A caller-supplied multipart `Content-Type` still needs the generated
    /// boundary or the server cannot split the parts
    fn keep_boundary(headers: &mut header::HeaderMap, boundary: &str) -> Result<()> {
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(());
        };
        if content_type.starts_with("multipart/") && !content_type.contains("boundary=") {
            let with_boundary = format!("{}; boundary={}", content_type, boundary);
            headers.insert(header::CONTENT_TYPE, Self::header_value(&with_boundary)?);
        }
        Ok(())
    }

    fn parse_envelope(url: &str, text: &str) -> Result<Envelope<serde_json::Value>> {
        // 204 and friends
        if text.trim().is_empty() {
            return Ok(Envelope {
                is_success: true,
                code: None,
                message: None,
                result: None,
            });
        }
        serde_json::from_str(text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
        })
    }

    // ===== Token Refresh =====

    /// Obtain a fresh access token after a request signed at
    /// `seen_generation` was rejected. Only one refresh runs at a time;
    /// requests that queued behind it reuse its outcome.
    async fn refresh_after(&self, seen_generation: u64) -> Result<String> {
        let _guard = self.inner.refresh_lock.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != seen_generation {
            let token = self.inner.store.access_token().await?;
            if token.is_empty() {
                return Err(ApiError::SessionExpired);
            }
            debug!("Token already refreshed by another request");
            return Ok(token);
        }

        self.inner.session.transition(SessionState::Refreshing);

        let refresh_token = match self.inner.store.refresh_token().await {
            Ok(token) => token,
            Err(e) => {
                self.inner.session.transition(SessionState::Authenticated);
                return Err(e.into());
            }
        };

        match self.request_new_tokens(&refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = self.store_tokens(&tokens).await {
                    self.inner.session.transition(SessionState::Authenticated);
                    return Err(e.into());
                }
                self.bump_generation();
                self.inner.session.transition(SessionState::Authenticated);
                info!(rotated = tokens.refresh_token.is_some(), "Access token refreshed");
                Ok(tokens.access_token)
            }
            Err(failure) => {
                warn!(reason = %failure, "Token refresh failed, clearing session");
                if let Err(e) = self.inner.store.clear_all().await {
                    warn!(error = %e, "Failed to clear secrets after refresh failure");
                }
                self.bump_generation();
                self.inner.session.transition(SessionState::LoggedOut);
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_new_tokens(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenPair, RefreshFailure> {
        if refresh_token.is_empty() {
            return Err(RefreshFailure::MissingRefreshToken);
        }

        let url = self.inner.config.refresh_url();
        debug!(url = %url, "Refreshing access token");

        let response = self
            .inner
            .http
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| RefreshFailure::Rejected(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshFailure::Rejected(ApiError::from_status(status, &body)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| RefreshFailure::Rejected(e.into()))?;
        let envelope: Envelope<TokenPair> = serde_json::from_str(&text).map_err(|e| {
            RefreshFailure::Rejected(ApiError::InvalidResponse(format!(
                "Failed to parse refresh response: {}",
                e
            )))
        })?;

        match envelope.result {
            Some(tokens) if envelope.is_success && !tokens.access_token.is_empty() => Ok(tokens),
            _ => Err(RefreshFailure::EmptyResult),
        }
    }

    async fn store_tokens(&self, tokens: &TokenPair) -> std::result::Result<(), StorageError> {
        self.inner.store.set_access_token(&tokens.access_token).await?;
        if let Some(ref refresh_token) = tokens.refresh_token {
            self.inner.store.set_refresh_token(refresh_token).await?;
        }
        Ok(())
    }
}
