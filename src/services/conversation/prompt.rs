use super::memory::ConversationMemory;
use crate::models::chat::ChatMessage;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are an AI assistant that gives accurate and relevant answers.";

const CONTEXT_INSTRUCTIONS: &str = "\
Use the following document as additional context to answer the question.
IMPORTANT INSTRUCTIONS:
1. Focus on accuracy.
2. When giving examples, use the document as references if relevant.
3. Do not mention that you used a \"document\" or \"conversation history\" in your answer.
HERE IS THE DOCUMENT:";

/// Composes the structured prompt for one turn: system instruction (persona
/// or generic), grounding context, memory as alternating turns, then the new
/// query as the final user turn.
#[derive(Clone)]
pub struct PromptBuilder {
    generic_instruction: String,
}

impl PromptBuilder {
    pub fn new(generic_instruction: String) -> Self {
        let generic_instruction = if generic_instruction.trim().is_empty() {
            DEFAULT_SYSTEM_INSTRUCTION.to_string()
        } else {
            generic_instruction
        };
        Self {
            generic_instruction,
        }
    }

    /// `persona` is the caller-resolved persona text; None (persona disabled,
    /// or requested but not configured for this user) falls back to the
    /// generic instruction rather than failing the turn.
    pub fn build(
        &self,
        persona: Option<&str>,
        context: &str,
        memory: &ConversationMemory,
        query: &str,
    ) -> Vec<ChatMessage> {
        let instruction = match persona {
            Some(text) => format!("You are an AI assistant with the following persona:\n\n{}", text),
            None => self.generic_instruction.clone(),
        };

        let system = format!("{}\n\n{}\n\n{}", instruction, CONTEXT_INSTRUCTIONS, context);

        let mut messages = Vec::with_capacity(2 + memory.turns().len() * 2);
        messages.push(ChatMessage::system(system));

        for turn in memory.turns() {
            messages.push(ChatMessage::user(turn.input.clone()));
            messages.push(ChatMessage::assistant(turn.output.clone()));
        }

        messages.push(ChatMessage::user(query));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::context::NO_CONTEXT_SENTINEL;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(DEFAULT_SYSTEM_INSTRUCTION.to_string())
    }

    fn memory_with(pairs: &[(&str, &str)]) -> ConversationMemory {
        let mut memory = ConversationMemory::default();
        for (input, output) in pairs {
            memory.push_turn(input.to_string(), output.to_string());
        }
        memory
    }

    #[test]
    fn generic_instruction_when_no_persona() {
        let messages = builder().build(None, "ctx", &ConversationMemory::default(), "q");
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains(DEFAULT_SYSTEM_INSTRUCTION));
        assert!(!messages[0].content.contains("persona"));
    }

    #[test]
    fn persona_text_replaces_generic_instruction() {
        let messages = builder().build(
            Some("A pirate captain."),
            "ctx",
            &ConversationMemory::default(),
            "q",
        );
        assert!(messages[0].content.contains("A pirate captain."));
        assert!(!messages[0].content.contains(DEFAULT_SYSTEM_INSTRUCTION));
    }

    #[test]
    fn context_block_carries_sentinel_verbatim() {
        let messages = builder().build(
            None,
            NO_CONTEXT_SENTINEL,
            &ConversationMemory::default(),
            "q",
        );
        assert!(messages[0].content.contains(NO_CONTEXT_SENTINEL));
    }

    #[test]
    fn memory_renders_as_alternating_turns_before_query() {
        let memory = memory_with(&[("hi", "hello"), ("more?", "sure")]);
        let messages = builder().build(None, "ctx", &memory, "final question");

        assert_eq!(messages.len(), 6);
        assert_eq!((messages[1].role.as_str(), messages[1].content.as_str()), ("user", "hi"));
        assert_eq!(
            (messages[2].role.as_str(), messages[2].content.as_str()),
            ("assistant", "hello")
        );
        assert_eq!((messages[3].role.as_str(), messages[3].content.as_str()), ("user", "more?"));
        assert_eq!(
            (messages[4].role.as_str(), messages[4].content.as_str()),
            ("assistant", "sure")
        );
        assert_eq!(
            (messages[5].role.as_str(), messages[5].content.as_str()),
            ("user", "final question")
        );
    }

    #[test]
    fn system_instruction_hides_grounding_machinery() {
        let messages = builder().build(None, "ctx", &ConversationMemory::default(), "q");
        assert!(messages[0]
            .content
            .contains("Do not mention that you used a \"document\""));
    }
}
