use std::fs;
use std::path::Path;

use medlens_contracts::events::EventWriter;
use medlens_contracts::models::{ModelSelector, CAPABILITY_VISION};
use medlens_contracts::prompts::{analysis_role, research_instructions, Locale};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::MedlensConfig;
use crate::error::{PipelineError, Result};
use crate::gemini::GeminiClient;
use crate::generator::TextGenerator;
use crate::pipeline::Pipeline;
use crate::preprocess::{preprocess_image, sniff_upload_format};
use crate::scratch::ScratchFiles;
use crate::search::WebSearch;

#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadJob<'a> {
    pub request_id: &'a str,
    pub requested_model: Option<&'a str>,
    pub events: Option<&'a EventWriter>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: String,
    pub model: String,
    pub fallback_reason: Option<String>,
    pub search_enabled: bool,
}

pub fn analyze_upload(
    config: &MedlensConfig,
    upload: &Upload,
    job: &UploadJob<'_>,
) -> Result<AnalysisOutcome> {
    config.credentials()?;
    let requested = job
        .requested_model
        .or(Some(config.general.default_model.as_str()));
    let selection = ModelSelector::default()
        .select(requested, CAPABILITY_VISION)
        .map_err(PipelineError::ModelSelection)?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        info!(request_id = job.request_id, model = %selection.model.name, reason, "model fallback");
    }

    let model = selection.model.name.as_str();
    let locale = config.general.locale;
    let analysis = GeminiClient::from_config(&config.gemini, model)
        .with_system_instruction(analysis_role(locale));
    let mut research = GeminiClient::from_config(&config.gemini, model)
        .with_system_instruction(research_instructions(locale));
    if let Some(search) = WebSearch::from_config(&config.search, config.gemini.request_timeout()) {
        research = research.with_search(search, config.search.max_tool_rounds);
    }
    let search_enabled = research.has_search();

    let report = analyze_upload_with(
        upload,
        job,
        locale,
        config.general.scratch_dir.as_deref(),
        config.general.max_output_pixels,
        &analysis,
        &research,
    )?;

    Ok(AnalysisOutcome {
        report,
        model: selection.model.name.clone(),
        fallback_reason: selection.fallback_reason.clone(),
        search_enabled,
    })
}

/// Sniffs, stores and preprocesses the upload in per-request scratch files,
/// runs the pipeline, then removes the scratch files whatever the outcome.
pub fn analyze_upload_with(
    upload: &Upload,
    job: &UploadJob<'_>,
    locale: Locale,
    scratch_dir: Option<&Path>,
    max_output_pixels: u64,
    analysis: &dyn TextGenerator,
    research: &dyn TextGenerator,
) -> Result<String> {
    let format = sniff_upload_format(&upload.bytes)?;
    let digest = hex::encode(Sha256::digest(&upload.bytes));
    info!(
        request_id = job.request_id,
        format = format.extension(),
        bytes = upload.bytes.len(),
        "upload received"
    );
    if let Some(events) = job.events {
        let payload = json!({
            "format": format.extension(),
            "bytes": upload.bytes.len(),
            "image_sha256": digest,
            "file_name": upload.file_name,
        });
        if let Err(err) = events.emit(
            "upload_received",
            job.request_id,
            payload.as_object().cloned().unwrap_or_default(),
        ) {
            warn!(%err, "failed to write upload event");
        }
    }

    let pipeline =
        Pipeline::new(analysis, research, locale).with_events(job.events, job.request_id);
    let mut scratch = ScratchFiles::new(scratch_dir);
    let result = run_in_scratch(
        &mut scratch,
        upload,
        format.extension(),
        max_output_pixels,
        &pipeline,
    );
    let failures = scratch.cleanup();
    if failures > 0 {
        warn!(request_id = job.request_id, failures, "scratch cleanup incomplete");
    }
    result
}

fn run_in_scratch(
    scratch: &mut ScratchFiles,
    upload: &Upload,
    extension: &str,
    max_output_pixels: u64,
    pipeline: &Pipeline<'_>,
) -> Result<String> {
    let upload_path = scratch.allocate("medlens-upload-", &format!(".{extension}"))?;
    fs::write(&upload_path, &upload.bytes).map_err(|err| {
        PipelineError::io(format!("failed to write {}", upload_path.display()), err)
    })?;
    let preprocessed_path = scratch.allocate("medlens-preprocessed-", ".png")?;
    let image = preprocess_image(&upload_path, &preprocessed_path, max_output_pixels)?;

    pipeline.run(Some(&image))
}
