//! Core library for memoria.
//!
//! Secure storage for the app's access token, refresh token and login id,
//! and an API client that signs requests with those tokens and recovers
//! from an expired access token with a single refresh-and-retry.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{
    ApiError, ApiResponse, AuthenticatedClient, Envelope, Method, MultipartPart, RequestBody,
    RequestOptions,
};
pub use auth::{CredentialStore, SecretName, SessionState, StorageError, TokenPair};
pub use config::ClientConfig;
