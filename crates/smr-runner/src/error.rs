use serde_json::{json, Map, Value as Json};
use smr_code::CodeError;
use smr_stackvm::{BuildError, TraceFrame};
use thiserror::Error;

pub const PARSE_ERROR: i64 = -32700;
pub const FUNCTION_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const RUNTIME_ERROR: i64 = -32000;

/// Every way a request can fail. Each kind maps to a stable code, a fixed
/// message and a data payload in the response envelope.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("descriptor format error: {0}")]
    DescriptorFormat(String),

    #[error("descriptor not found: {locator}")]
    DescriptorNotFound { locator: String },

    #[error("reconstruction failed: {0}")]
    Reconstruction(String),

    #[error("invalid arguments for {function}")]
    InvalidArguments { function: String, attempted: Json },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{function} raised {summary}")]
    RuntimeFault {
        function: String,
        summary: String,
        args: Vec<Json>,
        kwargs: Map<String, Json>,
        inspection: Map<String, Json>,
        traceback: Vec<TraceFrame>,
    },
}

impl From<CodeError> for RunnerError {
    fn from(err: CodeError) -> Self {
        match err {
            CodeError::NotFound { locator } => RunnerError::DescriptorNotFound { locator },
            other => RunnerError::DescriptorFormat(other.to_string()),
        }
    }
}

impl From<BuildError> for RunnerError {
    fn from(err: BuildError) -> Self {
        RunnerError::Reconstruction(err.to_string())
    }
}

impl RunnerError {
    pub fn code(&self) -> i64 {
        match self {
            RunnerError::DescriptorFormat(_) | RunnerError::Reconstruction(_) => PARSE_ERROR,
            RunnerError::DescriptorNotFound { .. } => FUNCTION_NOT_FOUND,
            RunnerError::InvalidArguments { .. } => INVALID_PARAMS,
            RunnerError::Internal(_) => INTERNAL_ERROR,
            RunnerError::RuntimeFault { .. } => RUNTIME_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RunnerError::DescriptorFormat(_) | RunnerError::Reconstruction(_) => "Parse error.",
            RunnerError::DescriptorNotFound { .. } => "Function not found error.",
            RunnerError::InvalidArguments { .. } => "Invalid params error.",
            RunnerError::Internal(_) => "Internal error.",
            RunnerError::RuntimeFault { .. } => "Runtime error.",
        }
    }

    /// Diagnostic payload sent to the caller. Format, reconstruction and
    /// internal failures carry none.
    pub fn data(&self) -> Json {
        match self {
            RunnerError::DescriptorFormat(_)
            | RunnerError::Reconstruction(_)
            | RunnerError::Internal(_) => Json::Null,
            RunnerError::DescriptorNotFound { locator } => json!({ "locator": locator }),
            RunnerError::InvalidArguments {
                function,
                attempted,
            } => json!({ "function": function, "attemptedArgs": attempted }),
            RunnerError::RuntimeFault {
                function,
                args,
                kwargs,
                inspection,
                traceback,
                ..
            } => json!({
                "function": function,
                "args": args,
                "kwargs": kwargs,
                "faultInspection": inspection,
                "traceback": traceback
                    .iter()
                    .map(|frame| json!({
                        "filename": frame.filename,
                        "name": frame.name,
                        "line": frame.line,
                    }))
                    .collect::<Vec<_>>(),
            }),
        }
    }

    /// `{code, message, data}` as carried in a failure envelope.
    pub fn to_record(&self) -> Json {
        json!({
            "code": self.code(),
            "message": self.message(),
            "data": self.data(),
        })
    }
}
