mod callers;
pub mod config;
mod error;
mod gemini;
mod generator;
mod http;
mod job;
mod pipeline;
pub mod preprocess;
mod scratch;
mod search;

#[cfg(test)]
mod test_support;

pub use callers::{AnalysisCaller, ResearchCaller};
pub use config::{CredentialStatus, MedlensConfig};
pub use error::{PipelineError, Result};
pub use gemini::GeminiClient;
pub use generator::TextGenerator;
pub use job::{analyze_upload, analyze_upload_with, AnalysisOutcome, Upload, UploadJob};
pub use pipeline::Pipeline;
pub use preprocess::{preprocess_image, sniff_upload_format, PreprocessedImage, UploadFormat};
pub use scratch::ScratchFiles;
pub use search::{SearchHit, WebSearch, SEARCH_TOOL_NAME};
