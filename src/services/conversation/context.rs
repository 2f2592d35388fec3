use crate::database::RetrievedFragment;

/// Rendered verbatim into the prompt when retrieval produced nothing, so the
/// model is never given a silently blank grounding section.
pub const NO_CONTEXT_SENTINEL: &str = "No context available.";

/// Turn retrieved fragments into a single grounding block. Fragments keep
/// their given order; each is prefixed with its source for traceability.
pub fn assemble_context(fragments: &[RetrievedFragment]) -> String {
    if fragments.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }

    fragments
        .iter()
        .map(|f| {
            format!(
                "[document {} / chunk {}]\n{}",
                f.document_id, f.chunk_index, f.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
