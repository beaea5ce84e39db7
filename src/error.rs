use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the reel-stabilizer library
#[derive(Error, Debug)]
pub enum StabilizerError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Alignment error: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Frame processing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Job queue error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Reference pattern errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template file not found: {path}")]
    Missing { path: PathBuf },

    #[error("Template integrity check failed (missing: [{}], invalid: [{}])", .missing.join(", "), .invalid.join(", "))]
    Corrupt {
        missing: Vec<String>,
        invalid: Vec<String>,
    },

    #[error("Failed to decode template image: {path}")]
    DecodeFailed { path: PathBuf },

    #[error("No template registered for {kind}")]
    NotRegistered { kind: String },

    #[error("Invalid template region: {details}")]
    InvalidRegion { details: String },
}

/// Pattern search errors
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Template ({template_width}x{template_height}) bigger than search area ({region_width}x{region_height})")]
    TemplateTooLarge {
        template_width: u32,
        template_height: u32,
        region_width: u32,
        region_height: u32,
    },

    #[error("Active template has no image data: {kind}")]
    TemplateNotLoaded { kind: String },
}

/// Per-frame and per-run processing errors
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to decode frame {index}: {path}")]
    DecodeFailed { index: usize, path: PathBuf },

    #[error("Frame {index} has odd output size {width}x{height}")]
    OddDimension { index: usize, width: u32, height: u32 },

    #[error("Failed to write frame {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("No frames match pattern '{pattern}' in {dir}")]
    NoFramesFound { dir: PathBuf, pattern: String },

    #[error("Directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },

    #[error("Frame range is empty")]
    RangeEmpty,

    #[error("Frame controller is not running")]
    NotStarted,
}

/// External encoder errors
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder binary not available: {binary}")]
    Missing { binary: String },

    #[error("Encoder exited with failure status (code {code:?})")]
    ProcessFailure { code: Option<i32> },

    #[error("Failed to spawn encoder: {reason}")]
    SpawnFailed { reason: String },

    #[error("No frames to encode")]
    RangeEmpty,

    #[error("{} of {expected} frames missing in target folder (first: {})", .missing.len(), .missing.first().map(|p| p.display().to_string()).unwrap_or_default())]
    FramesMissing { expected: usize, missing: Vec<PathBuf> },

    #[error("Unknown resolution label: {label}")]
    UnknownResolution { label: String },
}

/// Job queue errors
#[derive(Error, Debug)]
pub enum JobError {
    #[error("A job named '{label}' already exists")]
    Duplicate { label: String },

    #[error("No job at position {index}")]
    NotFound { index: usize },

    #[error("Failed to parse job list: {path}")]
    ParseFailed { path: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using StabilizerError
pub type Result<T> = std::result::Result<T, StabilizerError>;

impl StabilizerError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if the pipeline absorbs this error and keeps going
    ///
    /// Per-frame failures are skipped, and per-job failures let the queue
    /// continue with the next job. Everything else stops the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Frame(FrameError::DecodeFailed { .. }) => true,
            Self::Frame(FrameError::OddDimension { .. }) => true,
            Self::Encoder(EncoderError::ProcessFailure { .. }) => true,
            Self::Encoder(EncoderError::RangeEmpty) => true,
            Self::Encoder(EncoderError::FramesMissing { .. }) => true,
            Self::Encoder(EncoderError::Missing { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Template(TemplateError::Corrupt { missing, invalid }) => {
                let mut message = String::from("Error when loading template files.");
                if !missing.is_empty() {
                    message.push_str(&format!(" Missing files: {}.", missing.join(", ")));
                }
                if !invalid.is_empty() {
                    message.push_str(&format!(" Invalid files: {}.", invalid.join(", ")));
                }
                message
            }
            Self::Alignment(AlignmentError::TemplateTooLarge { .. }) => {
                "Template is bigger than search area. Please select a smaller template.".to_string()
            }
            Self::Encoder(EncoderError::RangeEmpty) => {
                "Video cannot be generated: no frames in target folder match the specified range.".to_string()
            }
            Self::Encoder(EncoderError::FramesMissing { .. }) => {
                "Video cannot be generated: not all frames in the specified range exist in the target folder. Regenerate the frames and try again.".to_string()
            }
            Self::Encoder(EncoderError::Missing { binary }) => {
                format!("'{}' was not found. Video generation is disabled.", binary)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
