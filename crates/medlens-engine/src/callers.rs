use medlens_contracts::prompts::{analysis_prompt, research_prompt, Locale};
use tracing::info_span;

use crate::error::Result;
use crate::generator::TextGenerator;
use crate::preprocess::PreprocessedImage;

pub struct AnalysisCaller<'a> {
    generator: &'a dyn TextGenerator,
    locale: Locale,
}

impl<'a> AnalysisCaller<'a> {
    pub fn new(generator: &'a dyn TextGenerator, locale: Locale) -> Self {
        Self { generator, locale }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn call(&self, image: &PreprocessedImage) -> Result<String> {
        let _span = info_span!("analysis", generator = self.generator.name()).entered();
        self.generator
            .generate(analysis_prompt(self.locale), Some(image.path.as_path()))
    }
}

pub struct ResearchCaller<'a> {
    generator: &'a dyn TextGenerator,
    locale: Locale,
}

impl<'a> ResearchCaller<'a> {
    pub fn new(generator: &'a dyn TextGenerator, locale: Locale) -> Self {
        Self { generator, locale }
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn call(&self, analysis: &str) -> Result<String> {
        let _span = info_span!("research", generator = self.generator.name()).entered();
        self.generator
            .generate(&research_prompt(self.locale, analysis), None)
    }
}
