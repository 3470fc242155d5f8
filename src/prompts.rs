//! Prompts for LLM-based record extraction.
//!
//! Every prompt lives here so the inference client only deals with retries
//! and timeouts, and tests can inspect prompts without a live model.
//!
//! Callers can override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the constant here is used
//! only when no override is provided.

/// Default system prompt for extracting matches from document text.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a precise data extraction engine. You read text extracted from a PDF betting sheet or fixture list and return the matches it contains as JSON.

Follow these rules precisely:

1. OUTPUT FORMAT
   - Output ONLY a single JSON object, no commentary
   - Do NOT wrap the JSON in ```json fences
   - The object has one key, "matches", holding an array

2. MATCH FIELDS
   - "id": a stable identifier if the document prints one, otherwise omit it
   - "homeTeam", "awayTeam": the two opposing sides, exactly as written (required)
   - "date" (YYYY-MM-DD), "time" (HH:MM), "country", "league": when present
   - "round": the round or matchday number as an integer, 0 if unknown

3. ODDS
   - "odds": array of {"id", "home", "draw", "away"} with decimal prices
   - "markets": array of {"id", "name", "odds": [decimal prices]} for any other
     market (over/under, both teams to score, handicaps, ...)

4. WHAT TO IGNORE
   - Page headers, footers, advertising and legal text
   - Rows where either side is missing

If the text contains no matches, return {"matches": []}."#;

/// Marker appended when the document text is cut to fit the chunk size.
pub const TRUNCATION_MARKER: &str = "...";

/// Build the user prompt for a document, truncating to `chunk_size` characters.
///
/// Truncation is lossy but deterministic: the first `chunk_size` characters
/// are kept and [`TRUNCATION_MARKER`] is appended. Returns the prompt and
/// whether truncation happened.
pub fn build_user_prompt(text: &str, chunk_size: usize) -> (String, bool) {
    let (body, truncated) = match text.char_indices().nth(chunk_size) {
        Some((cut, _)) => (format!("{}{}", &text[..cut], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    };
    (
        format!("Extract every match from the following document text:\n\n{body}"),
        truncated,
    )
}
