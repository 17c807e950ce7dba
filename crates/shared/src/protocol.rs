use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::RecordId,
    error::{ApiError, ErrorCode},
};

/// Uniform `{success, data, error}` wrapper returned by every backend route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.message),
            code: Some(error.code),
        }
    }

    /// Unwraps the payload. `success: false` and a missing payload both become errors.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(self.rejection());
        }
        self.data.ok_or_else(|| {
            ApiError::new(ErrorCode::Internal, "response envelope carried no data")
        })
    }

    /// For routes whose payload is irrelevant (e.g. DELETE).
    pub fn into_ack(self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(self.rejection())
        }
    }

    fn rejection(self) -> ApiError {
        ApiError::new(
            self.code.unwrap_or(ErrorCode::Internal),
            self.error
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| "request was rejected".to_string()),
        )
    }
}

impl Envelope<()> {
    pub fn ack() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            code: None,
        }
    }
}

/// Server-side narrowing of a collection listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Kind-agnostic wire form of a record, as stored and served by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

impl RecordDocument {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The document as one flat JSON object, the shape typed entities deserialize from.
    pub fn to_flat_object(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
