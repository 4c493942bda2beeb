use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body the backend attaches to non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub detail: String,
}

impl ApiErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("backend rejected request ({status}): {detail}")]
pub struct ApiRejection {
    pub status: u16,
    pub detail: String,
}

impl ApiRejection {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<ApiRejection> for ApiErrorBody {
    fn from(value: ApiRejection) -> Self {
        Self {
            detail: value.detail,
        }
    }
}
