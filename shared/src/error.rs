use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed action input, filter tree or scope reference.
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("unknown relationship `{relationship}` on model `{model}`")]
    UnknownRelationship { model: String, relationship: String },
    #[error("unknown scope `{scope}` on model `{model}`")]
    UnknownScope { model: String, scope: String },
    #[error("unknown view `{view}` on model `{model}`")]
    UnknownView { model: String, view: String },
    #[error("no task registered for resource `{0}`")]
    UnknownTask(String),
    #[error("state `{state}` transitions to undefined state `{target}`")]
    UndefinedState { state: String, target: String },
    #[error("state `{state}` has no transition and is not terminal")]
    MissingTransition { state: String },
    #[error("invalid state graph: {0}")]
    InvalidGraph(String),
    #[error("{model} not found")]
    NotFound { model: String },
    #[error("operator error: {0}")]
    Operator(anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation { .. })
    }

    /// Field named by a validation error, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            AppError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Operator(err)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
