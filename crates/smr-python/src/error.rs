use smr_code::CodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("python parse error: {0}")]
    Parse(String),
    #[error("no top-level function named '{0}'")]
    FunctionNotFound(String),
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },
    #[error("unsupported construct at line {line}: {message}")]
    Unsupported { line: u32, message: String },
    #[error(transparent)]
    Assembly(#[from] CodeError),
}

impl CompileError {
    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn unsupported(line: u32, message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            line,
            message: message.into(),
        }
    }

    /// Source line the error points at, when it has one.
    pub fn line(&self) -> Option<u32> {
        match self {
            CompileError::Syntax { line, .. } | CompileError::Unsupported { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}
