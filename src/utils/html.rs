/// Sanitizes user-written text (comments, prediction descriptions) with
/// ammonia's whitelist: safe inline tags survive, scripts and event handlers
/// do not.
///
/// Returns `None` when nothing readable is left.
pub fn sanitize_text(input: &str) -> Option<String> {
    let cleaned = ammonia::clean(input.trim());
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
