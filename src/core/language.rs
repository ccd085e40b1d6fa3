//! Built-in language profiles
//!
//! A language profile bundles the locale-specific strings used to build
//! prompts and label the interface. Everything outside this module treats the
//! profile id as an opaque key.

use crate::core::transcript::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Name the assistant answers to, also used as the turn-continuation cue.
    pub assistant_name: &'static str,
    /// Persona instruction prepended to every prompt.
    pub system_instruction: &'static str,
    /// Sentence introducing the transcript window inside the prompt.
    pub context_preamble: &'static str,
    /// Prefix for user turns inside the prompt context.
    pub user_prefix: &'static str,
    /// Short name shown before the user's messages in the scrollback.
    pub user_label: &'static str,
    pub input_placeholder: &'static str,
    pub input_hint: &'static str,
    pub busy_notice: &'static str,
    pub error_label: &'static str,
}

pub const PROFILES: &[LanguageProfile] = &[
    LanguageProfile {
        id: "en",
        display_name: "English",
        assistant_name: "Plausch",
        system_instruction: "You are Plausch, a friendly conversation companion. \
            Answer warmly and keep your replies short.",
        context_preamble: "Here is our conversation so far:",
        user_prefix: "User: ",
        user_label: "You",
        input_placeholder: "What would you like to talk about?",
        input_hint: "Enter to send, Ctrl+L: Deutsch, Ctrl+C to quit",
        busy_notice: "Waiting for the reply to finish...",
        error_label: "Error",
    },
    LanguageProfile {
        id: "de",
        display_name: "Deutsch",
        assistant_name: "Plausch",
        system_instruction: "Du bist Plausch, ein freundlicher Gespr\u{e4}chspartner. \
            Antworte herzlich und halte deine Antworten kurz.",
        context_preamble: "Hier ist unser bisheriges Gespr\u{e4}ch:",
        user_prefix: "Benutzer: ",
        user_label: "Du",
        input_placeholder: "Wor\u{fc}ber m\u{f6}chtest du reden?",
        input_hint: "Enter zum Senden, Strg+L: English, Strg+C zum Beenden",
        busy_notice: "Warte auf das Ende der Antwort...",
        error_label: "Fehler",
    },
];

impl LanguageProfile {
    pub fn assistant_prefix(&self) -> String {
        format!("{}: ", self.assistant_name)
    }

    pub fn prefix_for(&self, speaker: Speaker) -> String {
        match speaker {
            Speaker::User => self.user_prefix.to_string(),
            Speaker::Assistant => self.assistant_prefix(),
        }
    }
}

/// Find a profile by id (case-insensitive).
pub fn find_profile(id: &str) -> Option<&'static LanguageProfile> {
    PROFILES.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

pub fn default_profile() -> &'static LanguageProfile {
    &PROFILES[0]
}

/// The profile after `current`, wrapping around. Drives the language toggle.
pub fn next_profile(current: &LanguageProfile) -> &'static LanguageProfile {
    let index = PROFILES
        .iter()
        .position(|p| p.id == current.id)
        .unwrap_or(0);
    &PROFILES[(index + 1) % PROFILES.len()]
}

/// Assemble the outbound prompt: persona instruction, the recent transcript
/// window, and the cue for the assistant to continue the conversation.
pub fn build_prompt(profile: &LanguageProfile, context: &str) -> String {
    format!(
        "{} {}\n{}\n{}:",
        profile.system_instruction, profile.context_preamble, context, profile.assistant_name
    )
}
