/// Returned instead of a report when the pipeline is started without an image.
pub const NO_IMAGE_MESSAGE: &str = "Error: no image provided.";

const CODE_FENCE: &str = "```";
const THINK_CLOSE: &str = "</think>";

/// Cleans a raw model answer for display.
///
/// Trims, deletes every code-fence marker, then drops everything up to the
/// last closing think-tag if one is present. Never fails.
pub fn format_response(raw: &str) -> String {
    let cleaned = raw.trim().replace(CODE_FENCE, "");
    match cleaned.rsplit_once(THINK_CLOSE) {
        Some((_, answer)) => answer.trim().to_string(),
        None => cleaned,
    }
}

pub fn compose_report(analysis: &str, research: &str) -> String {
    format!(
        "### Analysis:\n{}\n\n---\n\n### Research:\n{}",
        format_response(analysis),
        format_response(research)
    )
}
