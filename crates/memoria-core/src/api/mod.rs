//! REST API client module for the album service.
//!
//! This module provides the `AuthenticatedClient` for communicating with
//! the album API (groups, puzzles, uploads).
//!
//! The API uses bearer token authentication. Responses are wrapped in an
//! `{ isSuccess, code, message, result }` envelope.

pub mod client;
pub mod envelope;
pub mod error;
pub mod request;

pub use client::AuthenticatedClient;
pub use envelope::{ApiResponse, Envelope};
pub use error::ApiError;
pub use request::{Method, MultipartPart, RequestBody, RequestOptions};
