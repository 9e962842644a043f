use std::time::Instant;

use medlens_contracts::events::{EventPayload, EventWriter};
use medlens_contracts::prompts::Locale;
use medlens_contracts::report::{compose_report, NO_IMAGE_MESSAGE};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::callers::{AnalysisCaller, ResearchCaller};
use crate::error::{PipelineError, Result};
use crate::generator::TextGenerator;
use crate::preprocess::PreprocessedImage;

pub struct Pipeline<'a> {
    analysis: AnalysisCaller<'a>,
    research: ResearchCaller<'a>,
    events: Option<(&'a EventWriter, String)>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        analysis: &'a dyn TextGenerator,
        research: &'a dyn TextGenerator,
        locale: Locale,
    ) -> Self {
        Self {
            analysis: AnalysisCaller::new(analysis, locale),
            research: ResearchCaller::new(research, locale),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventWriter>, request_id: &str) -> Self {
        self.events = events.map(|writer| (writer, request_id.to_string()));
        self
    }

    pub fn run(&self, image: Option<&PreprocessedImage>) -> Result<String> {
        let Some(image) = image else {
            warn!("pipeline started without an image");
            return Ok(NO_IMAGE_MESSAGE.to_string());
        };

        self.emit(
            "analysis_started",
            json!({
                "generator": self.analysis.generator_name(),
                "width": image.width,
                "height": image.height,
            }),
        );
        let started = Instant::now();
        let analysis = self
            .analysis
            .call(image)
            .inspect_err(|err| self.emit_failure("analysis", err))?;
        let analysis_ms = started.elapsed().as_millis() as u64;
        info!(
            chars = analysis.chars().count(),
            elapsed_ms = analysis_ms,
            "analysis finished"
        );
        self.emit(
            "analysis_finished",
            json!({ "chars": analysis.chars().count(), "elapsed_ms": analysis_ms }),
        );

        self.emit(
            "research_started",
            json!({ "generator": self.research.generator_name() }),
        );
        let started = Instant::now();
        let research = self
            .research
            .call(&analysis)
            .inspect_err(|err| self.emit_failure("research", err))?;
        let research_ms = started.elapsed().as_millis() as u64;
        info!(
            chars = research.chars().count(),
            elapsed_ms = research_ms,
            "research finished"
        );
        self.emit(
            "research_finished",
            json!({ "chars": research.chars().count(), "elapsed_ms": research_ms }),
        );

        Ok(compose_report(&analysis, &research))
    }

    fn emit_failure(&self, stage: &str, err: &PipelineError) {
        warn!(stage, %err, "pipeline stage failed");
        self.emit(
            "pipeline_failed",
            json!({ "stage": stage, "error": err.to_string() }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some((writer, request_id)) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = writer.emit(event_type, request_id, payload) {
            warn!(event_type, %err, "failed to write pipeline event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    struct StubGenerator {
        name: &'static str,
        reply: std::result::Result<&'static str, &'static str>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<(String, Option<PathBuf>)>>,
    }

    impl StubGenerator {
        fn replying(name: &'static str, reply: &'static str) -> Self {
            Self {
                name,
                reply: Ok(reply),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(name: &'static str, message: &'static str) -> Self {
            Self {
                reply: Err(message),
                ..Self::replying(name, "")
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn prompts(&self) -> Vec<(String, Option<PathBuf>)> {
            self.prompts.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl TextGenerator for StubGenerator {
        fn name(&self) -> &str {
            self.name
        }

        fn generate(&self, prompt: &str, image: Option<&Path>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut rows) = self.prompts.lock() {
                rows.push((prompt.to_string(), image.map(Path::to_path_buf)));
            }
            self.reply
                .map(str::to_string)
                .map_err(|message| PipelineError::external("Stub", message))
        }
    }

    fn image() -> PreprocessedImage {
        PreprocessedImage {
            path: PathBuf::from("/tmp/medlens-preprocessed-test.png"),
            width: 600,
            height: 450,
        }
    }

    #[test]
    fn missing_image_returns_message_without_calling_models() -> anyhow::Result<()> {
        let analysis = StubGenerator::replying("analysis", "unused");
        let research = StubGenerator::replying("research", "unused");
        let pipeline = Pipeline::new(&analysis, &research, Locale::PtBr);

        assert_eq!(pipeline.run(None)?, NO_IMAGE_MESSAGE);
        assert_eq!(analysis.calls(), 0);
        assert_eq!(research.calls(), 0);
        Ok(())
    }

    #[test]
    fn composes_report_from_both_stages() -> anyhow::Result<()> {
        let analysis = StubGenerator::replying("analysis", "X-ray");
        let research = StubGenerator::replying("research", "```cite1```");
        let pipeline = Pipeline::new(&analysis, &research, Locale::PtBr);

        let report = pipeline.run(Some(&image()))?;
        assert_eq!(
            report,
            "### Analysis:\nX-ray\n\n---\n\n### Research:\ncite1"
        );
        assert_eq!(analysis.calls(), 1);
        assert_eq!(research.calls(), 1);
        Ok(())
    }

    #[test]
    fn section_headings_from_the_model_are_kept() -> anyhow::Result<()> {
        let analysis = StubGenerator::replying("analysis", "### 1. Tipo...\nX-ray");
        let research = StubGenerator::replying("research", "```cite1```");
        let pipeline = Pipeline::new(&analysis, &research, Locale::PtBr);

        assert_eq!(
            pipeline.run(Some(&image()))?,
            "### Analysis:\n### 1. Tipo...\nX-ray\n\n---\n\n### Research:\ncite1"
        );
        Ok(())
    }

    #[test]
    fn research_prompt_is_built_from_raw_analysis() -> anyhow::Result<()> {
        let analysis = StubGenerator::replying("analysis", "  ```Fratura```  ");
        let research = StubGenerator::replying("research", "ok");
        Pipeline::new(&analysis, &research, Locale::En).run(Some(&image()))?;

        let analysis_prompts = analysis.prompts();
        assert_eq!(analysis_prompts.len(), 1);
        assert_eq!(analysis_prompts[0].1, Some(image().path));
        assert!(analysis_prompts[0].0.contains("### 4. Plain-language explanation"));

        let research_prompts = research.prompts();
        assert_eq!(
            research_prompts[0],
            (
                "Based on the following analysis, perform a medical search:\nAnalysis result: \"  ```Fratura```  \"\n"
                    .to_string(),
                None
            )
        );
        Ok(())
    }

    #[test]
    fn analysis_failure_aborts_before_research() {
        let analysis = StubGenerator::failing("analysis", "rate limited");
        let research = StubGenerator::replying("research", "unused");
        let pipeline = Pipeline::new(&analysis, &research, Locale::PtBr);

        let err = pipeline.run(Some(&image())).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalService { .. }));
        assert_eq!(research.calls(), 0);
    }

    #[test]
    fn research_failure_discards_the_analysis() {
        let analysis = StubGenerator::replying("analysis", "X-ray");
        let research = StubGenerator::failing("research", "timeout");
        let pipeline = Pipeline::new(&analysis, &research, Locale::PtBr);

        let err = pipeline.run(Some(&image())).unwrap_err();
        assert_eq!(err.to_string(), "Stub request failed: timeout");
        assert_eq!(analysis.calls(), 1);
    }

    #[test]
    fn events_record_stage_order_and_failures() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&events_path, "session-1");

        let analysis = StubGenerator::replying("analysis", "X-ray");
        let research = StubGenerator::failing("research", "timeout");
        let pipeline =
            Pipeline::new(&analysis, &research, Locale::PtBr).with_events(Some(&writer), "req-1");
        assert!(pipeline.run(Some(&image())).is_err());

        let raw = std::fs::read_to_string(&events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec![
                "analysis_started",
                "analysis_finished",
                "research_started",
                "pipeline_failed"
            ]
        );
        assert!(rows.iter().all(|row| row["request_id"] == json!("req-1")));
        assert_eq!(rows[3]["stage"], json!("research"));
        assert!(!raw.contains("X-ray"));
        Ok(())
    }
}
