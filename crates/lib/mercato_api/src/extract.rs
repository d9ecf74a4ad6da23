//! Request extractors whose rejections render as [`AppError`].
//!
//! Axum's stock `Json`, `Query` and `Path` extractors answer malformed input
//! with plain-text 4xx bodies. These wrappers route the same rejections
//! through [`AppError::Validation`] so every error shares the JSON shape.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// JSON request body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query string.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Path parameters.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);
