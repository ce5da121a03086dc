use std::collections::BTreeMap;

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::notify::{DispatchError, TransportError};
use crate::render::RenderError;
use crate::repo::RepoError;
use crate::storage::StorageError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Validation failed")] Validation(BTreeMap<String, Vec<String>>),
    #[error("{0}")] BadRequest(String),
    #[error("Report not found")] NotFound,
    #[error("Object not found")] ObjectNotFound,
    #[error("conflict")] Conflict,
    #[error("{0}")] Internal(&'static str),
}

/// Field name as the client sent it (camelCase) mapped to its messages.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self {
        let details = e
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|err| err.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| err.code.to_string()))
                    .collect();
                (camel_case(&field), messages)
            })
            .collect();
        ApiError::Validation(details)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Internal(msg) => {
                tracing::error!(error = %msg, "report store failure");
                ApiError::Internal("Report store failure")
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound | StorageError::InvalidPath(_) => ApiError::ObjectNotFound,
            StorageError::Other(msg) => {
                tracing::error!(error = %msg, "object storage failure");
                ApiError::Internal("Object storage failure")
            }
        }
    }
}

impl From<RenderError> for ApiError {
    fn from(e: RenderError) -> Self {
        tracing::error!(error = %e, "report rendering failed");
        ApiError::Internal("Failed to generate report")
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::InvalidRecipient(_) => ApiError::BadRequest("Valid email address is required".into()),
            DispatchError::Render(r) => r.into(),
            DispatchError::Transport(TransportError::Transient(_) | TransportError::Permanent(_)) => {
                ApiError::Internal("Failed to send report via email")
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound | ApiError::ObjectNotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self {
            ApiError::Validation(d) => Some(d.clone()),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string(), details })
    }
}
