use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::RunnerError;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: i64,
    pub message: String,
    pub data: Json,
}

impl From<&RunnerError> for ErrorRecord {
    fn from(err: &RunnerError) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
            data: err.data(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Json),
    Error(ErrorRecord),
}

/// JSON-RPC style envelope around one invocation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Json>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn as_result(value: Json, id: Option<Json>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(value),
        }
    }

    pub fn as_failure(error: &RunnerError, id: Option<Json>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn result(&self) -> Option<&Json> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        match &self.outcome {
            Outcome::Error(record) => Some(record),
            Outcome::Result(_) => None,
        }
    }

    /// Exactly one of `result` and `error` is present.
    pub fn to_record(&self) -> Json {
        let mut record = serde_json::Map::new();
        record.insert("jsonrpc".to_string(), Json::from(self.jsonrpc.as_str()));
        if let Some(id) = &self.id {
            record.insert("id".to_string(), id.clone());
        }
        match &self.outcome {
            Outcome::Result(value) => {
                record.insert("result".to_string(), value.clone());
            }
            Outcome::Error(error) => {
                record.insert(
                    "error".to_string(),
                    serde_json::json!({
                        "code": error.code,
                        "message": error.message,
                        "data": error.data,
                    }),
                );
            }
        }
        Json::Object(record)
    }

    pub fn to_json(&self) -> String {
        self.to_record().to_string()
    }

    pub fn to_json_pretty(&self) -> String {
        let record = self.to_record();
        serde_json::to_string_pretty(&record).unwrap_or_else(|_| record.to_string())
    }
}
