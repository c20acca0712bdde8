//! App error type for the conversion pipeline. Every variant maps to a stable [`ErrorKind`]
//! that the HTTP layer turns into a status code.

use crate::dsp::TransformStage;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(
        "Video is too long ({duration_secs:.0}s). Maximum allowed duration is {max_secs} seconds."
    )]
    DurationExceeded { duration_secs: f64, max_secs: u64 },

    #[error("Failed to fetch audio: {0}")]
    Extraction(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio processing failed at {stage}: {reason}")]
    Processing {
        stage: TransformStage,
        reason: String,
    },

    #[error("{tool} not found (tried: {})", attempted.join(", "))]
    ToolNotFound {
        tool: String,
        attempted: Vec<String>,
    },

    #[error("Failed to encode audio: {0}")]
    Encode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Aborted")]
    Aborted,
}

impl AppError {
    pub fn processing(stage: TransformStage, reason: impl Into<String>) -> Self {
        Self::Processing {
            stage,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            AppError::DurationExceeded { .. } => ErrorKind::DurationExceeded,
            AppError::Extraction(_) => ErrorKind::Extraction,
            AppError::Decode(_) => ErrorKind::Decode,
            AppError::Processing { .. } => ErrorKind::Processing,
            AppError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            AppError::Encode(_) => ErrorKind::Encode,
            AppError::Aborted => ErrorKind::Aborted,
            AppError::Config(_) | AppError::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Stable error kind reported to callers. Serialized in `snake_case`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    DurationExceeded,
    Extraction,
    Decode,
    Processing,
    ToolNotFound,
    Encode,
    Aborted,
    Internal,
}

impl ErrorKind {
    /// Validation and policy rejections are the caller's fault; everything else is ours.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidUrl | ErrorKind::DurationExceeded => 400,
            _ => 500,
        }
    }

    pub fn is_client_error(self) -> bool {
        self.http_status() < 500
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::DurationExceeded => "duration_exceeded",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Decode => "decode",
            ErrorKind::Processing => "processing",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::Encode => "encode",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outward-facing conversion failure: a stable kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConversionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConversionError {}

impl From<AppError> for ConversionError {
    fn from(err: AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
