use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingArgument,
    WrongArgumentType,
    UnknownCommandName,
    SelfInterception,
    InvalidInterceptType,
    UnknownEvent,
    UnknownFactory,
    NotAController,
    NotACommand,
    DuplicateName,
    MissingRequired,
    InvalidType,
    NotImplemented,
    RequestNotSet,
    MissingInvocation,
    RecursionLimit,
    ExecutionFailed,
    InvalidSiteMap,
    SiteMapNotSet,
    UnknownNode,
    InvalidSelector,
    UnknownService,
    UnknownParam,
}

/// Broad class of a [`FrameworkError`], used by callers that only care about
/// which layer rejected the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Dispatch,
    Structural,
}

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("{operation}: {message}")]
    Configuration {
        code: ErrorCode,
        operation: String,
        message: String,
    },
    #[error("parameter '{param}': {message}")]
    Validation {
        code: ErrorCode,
        param: String,
        message: String,
    },
    #[error("command '{command}' in controller '{controller}': {message}")]
    Dispatch {
        code: ErrorCode,
        command: String,
        controller: String,
        message: String,
        #[source]
        source: Option<BoxedError>,
    },
    #[error("site map: {message}")]
    Structural { code: ErrorCode, message: String },
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;

impl FrameworkError {
    pub fn configuration(
        code: ErrorCode,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            code,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn missing_argument(operation: impl Into<String>, argument: &str) -> Self {
        Self::configuration(
            ErrorCode::MissingArgument,
            operation,
            format!("{argument} is not set"),
        )
    }

    pub fn wrong_argument_type(operation: impl Into<String>, argument: &str, expected: &str) -> Self {
        Self::configuration(
            ErrorCode::WrongArgumentType,
            operation,
            format!("{argument} is not {expected}"),
        )
    }

    pub fn unknown_command(operation: impl Into<String>, command: &str) -> Self {
        Self::configuration(
            ErrorCode::UnknownCommandName,
            operation,
            format!("'{command}' does not reference a command in the controller"),
        )
    }

    pub fn validation(code: ErrorCode, param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn dispatch(
        code: ErrorCode,
        command: impl Into<String>,
        controller: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Dispatch {
            code,
            command: command.into(),
            controller: controller.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn structural(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Structural {
            code,
            message: message.into(),
        }
    }

    pub fn with_source(mut self, err: impl Into<BoxedError>) -> Self {
        if let Self::Dispatch { source, .. } = &mut self {
            *source = Some(err.into());
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { code, .. }
            | Self::Validation { code, .. }
            | Self::Dispatch { code, .. }
            | Self::Structural { code, .. } => *code,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Structural { .. } => ErrorKind::Structural,
        }
    }
}

/// Serializable snapshot of a [`FrameworkError`], suitable for logging sinks
/// and for reporting back through the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
}

impl From<&FrameworkError> for ErrorReport {
    fn from(value: &FrameworkError) -> Self {
        Self {
            kind: value.kind(),
            code: value.code(),
            message: value.to_string(),
        }
    }
}
