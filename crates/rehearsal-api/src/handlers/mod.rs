//! API handlers

pub mod auth;
pub mod health;
pub mod users;

use crate::error::AppError;
use axum::extract::FromRequest;

/// JSON body extractor whose rejections use the API error shape
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
