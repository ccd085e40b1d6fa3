use crate::core::language::LanguageProfile;

/// Number of trailing turns included when building a prompt.
pub const CONTEXT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One committed message. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Ordered, append-only history of the current session.
///
/// Only fully submitted or fully completed turns live here. An in-flight
/// assistant reply is buffered by the display surface and committed through
/// [`Transcript::append_assistant`] once its stream finishes.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn. Whitespace-only input is a no-op and returns
    /// `false`, in which case the caller must not issue a request.
    pub fn append_user(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.turns.push(Turn {
            speaker: Speaker::User,
            text: trimmed.to_string(),
        });
        true
    }

    /// Append an assistant turn with the fully assembled reply.
    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            speaker: Speaker::Assistant,
            text: text.into(),
        });
    }

    /// The last `n` turns (or fewer), one line per turn, chronological,
    /// prefixed with the active profile's speaker labels.
    pub fn recent_context(&self, n: usize, profile: &LanguageProfile) -> String {
        let start = self.turns.len().saturating_sub(n);
        self.turns[start..]
            .iter()
            .map(|turn| format!("{}{}", profile.prefix_for(turn.speaker), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::language::default_profile;

    #[test]
    fn append_user_records_trimmed_text() {
        let mut transcript = Transcript::new();
        assert!(transcript.append_user("  hello there  "));
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].text, "hello there");
        assert_eq!(transcript.turns()[0].speaker, Speaker::User);
    }

    #[test]
    fn whitespace_only_input_is_a_no_op() {
        let mut transcript = Transcript::new();
        assert!(!transcript.append_user("   \t  \n"));
        assert!(transcript.is_empty());
    }

    #[test]
    fn recent_context_returns_all_turns_when_short() {
        let profile = default_profile();
        let mut transcript = Transcript::new();
        transcript.append_user("first");
        transcript.append_assistant("second");

        let context = transcript.recent_context(CONTEXT_WINDOW, profile);
        assert_eq!(context, "User: first\nPlausch: second");
    }

    #[test]
    fn recent_context_keeps_only_the_trailing_window() {
        let profile = default_profile();
        let mut transcript = Transcript::new();
        for i in 0..7 {
            transcript.append_user(&format!("message {i}"));
        }

        let context = transcript.recent_context(CONTEXT_WINDOW, profile);
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines.len(), CONTEXT_WINDOW);
        assert_eq!(lines[0], "User: message 2");
        assert_eq!(lines[4], "User: message 6");
    }

    #[test]
    fn recent_context_is_idempotent() {
        let profile = default_profile();
        let mut transcript = Transcript::new();
        transcript.append_user("hi");
        transcript.append_assistant("hello");

        let first = transcript.recent_context(CONTEXT_WINDOW, profile);
        let second = transcript.recent_context(CONTEXT_WINDOW, profile);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_transcript_yields_empty_context() {
        let profile = default_profile();
        let transcript = Transcript::new();
        assert_eq!(transcript.recent_context(CONTEXT_WINDOW, profile), "");
    }
}
