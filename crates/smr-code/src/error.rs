use thiserror::Error;

use crate::schema::FieldError;

#[derive(Debug, Clone, Error)]
pub enum CodeError {
    #[error("descriptor format error: {message}")]
    Format {
        message: String,
        fields: Vec<FieldError>,
    },
    #[error("descriptor not found: {locator}")]
    NotFound { locator: String },
    #[error("bytecode error at offset {offset}: {message}")]
    Bytecode { offset: usize, message: String },
    #[error("assembly failed: {message}")]
    Assembly { message: String },
}

impl CodeError {
    pub fn format(message: impl Into<String>) -> Self {
        CodeError::Format {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn bytecode(offset: usize, message: impl Into<String>) -> Self {
        CodeError::Bytecode {
            offset,
            message: message.into(),
        }
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        CodeError::Assembly {
            message: message.into(),
        }
    }
}
