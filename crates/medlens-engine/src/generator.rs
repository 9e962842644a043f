use std::path::Path;

use crate::error::Result;

pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &str, image: Option<&Path>) -> Result<String>;
}
