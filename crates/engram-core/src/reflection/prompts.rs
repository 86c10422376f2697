//! Default prompt templates for the reflection pipeline.
//!
//! Both templates are overridable through configuration. Placeholders are
//! substituted at call time: `{dialogue}` with the formatted window,
//! `{events}` with the numbered candidate list.

/// Extraction: dialogue window in, JSON array of candidate events out.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "\
You extract long-term memories from a conversation between a user and an assistant.

Read the dialogue and list the durable facts worth remembering about the user:
stable facts, preferences, goals, opinions, and relationships. Ignore chit-chat,
one-off requests, and anything the assistant said about itself.

Reply with a JSON array only, no prose. Each element:
{\"content\": \"<one self-contained sentence>\", \"event_type\": \"<fact|preference|goal|opinion|relationship|other>\"}

Reply with [] if nothing is worth remembering.

Dialogue:
{dialogue}";

/// Scoring: numbered events in, JSON array of importance floats out.
pub const DEFAULT_EVALUATION_PROMPT: &str = "\
Rate how important each memory below is for future conversations with this
user, from 0.0 (trivial) to 1.0 (essential). Consider durability, specificity,
and how often it would change what the assistant says.

Reply with a JSON array of numbers only, one per memory, in order.

Memories:
{events}";

/// Substitute one `{placeholder}` occurrence set in a template.
pub fn render(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(&format!("{{{placeholder}}}"), value)
}
