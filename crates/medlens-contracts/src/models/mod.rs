mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_TEXT, CAPABILITY_VISION, DEFAULT_MODEL};
pub use selectors::{ModelSelection, ModelSelector};
