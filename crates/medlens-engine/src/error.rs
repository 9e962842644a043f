use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported upload format (expected jpg, png, bmp or gif)")]
    UnsupportedFormat,

    #[error("failed to decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image {width}x{height} would exceed {max_pixels} pixels once scaled to display width")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("model selection failed: {0}")]
    ModelSelection(String),

    #[error("{service} request failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl PipelineError {
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the failure came from the upload itself rather than from a
    /// service or the host.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat | Self::ImageDecode { .. } | Self::ImageTooLarge { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
