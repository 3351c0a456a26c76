use serde::{Deserialize, Serialize};
use thiserror::Error;

const INVALID_PAGE_MARKER: &str = "invalid page";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            400 | 409 | 422 => ErrorCode::Validation,
            429 => ErrorCode::RateLimited,
            _ => ErrorCode::Internal,
        }
    }
}

/// JSON error body as returned by the backend (`{"detail": ...}` and/or `{"error": ...}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Text the backend meant for users: `error` first, then `detail`. Blank fields are skipped.
    pub fn user_text(&self) -> Option<&str> {
        [self.error.as_deref(), self.detail.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
    }

    fn texts(&self) -> impl Iterator<Item = &str> {
        [self.detail.as_deref(), self.error.as_deref()]
            .into_iter()
            .flatten()
    }
}

/// Failure reported by a page fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{code:?} ({status}): {message}")]
    Http {
        status: u16,
        code: ErrorCode,
        message: String,
        body: ErrorBody,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request to {url} timed out")]
    Timeout { url: String },
}

impl FetchError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: ErrorCode::from_status(status),
            message: message.into(),
            body: ErrorBody::default(),
        }
    }

    /// Attaches the decoded response body. Non-HTTP errors are returned unchanged.
    pub fn with_body(mut self, body: ErrorBody) -> Self {
        if let Self::Http { body: slot, .. } = &mut self {
            *slot = body;
        }
        self
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        let body = ErrorBody {
            detail: Some(detail.into()),
            ..self.body().cloned().unwrap_or_default()
        };
        self.with_body(body)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Http { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            Self::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        self.body().and_then(|body| body.detail.as_deref())
    }

    pub fn message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// True when the backend rejected the request because the page index is out of range.
    pub fn is_invalid_page(&self) -> bool {
        if self.status() == Some(404) {
            return true;
        }
        if contains_invalid_page(&self.message()) {
            return true;
        }
        self.body()
            .is_some_and(|body| body.texts().any(contains_invalid_page))
    }

    /// Text suitable for a user-facing notification: the body's `error`, then its `detail`,
    /// then the error's own message, then `fallback`.
    pub fn user_message(&self, fallback: Option<&str>) -> String {
        if let Some(text) = self.body().and_then(ErrorBody::user_text) {
            return text.to_string();
        }
        let message = self.message();
        if !message.trim().is_empty() {
            return message;
        }
        fallback.unwrap_or("operation failed").to_string()
    }
}

fn contains_invalid_page(text: &str) -> bool {
    text.to_ascii_lowercase().contains(INVALID_PAGE_MARKER)
}
