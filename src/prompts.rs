//! Prompt templates for feedback triage.
//!
//! Templates are immutable values handed to the harness at construction time.
//! The message is embedded verbatim: no escaping, no trimming.

// =============================================================================
// Prompt templates
// =============================================================================

/// Rendered prompt ready to be written to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInstance {
    pub template_slug: String,
    pub text: String,
}

/// A prompt template with a single `{message}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub body: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, message: &str) -> PromptInstance {
        PromptInstance {
            template_slug: self.slug.to_string(),
            text: self.body.replace("{message}", message),
        }
    }

    /// Stable content hash of slug and body, stamped into traces and reports.
    pub fn hash(&self) -> String {
        blake3::hash(format!("{}\n{}", self.slug, self.body).as_bytes())
            .to_hex()
            .to_string()
    }
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const TRIAGE_V1: PromptTemplate = PromptTemplate {
    slug: "triage_v1",
    body: r#"You are an IT assistant monitoring citizen feedback about a government digital service.
Given a message in any language, decide if it describes a technical problem (e.g., system down, error, slow, payment failed).
Answer ONLY "YES" or "NO".

Examples:
- "The system says I didn’t pay!" → YES
- "When will my passport arrive?" → NO
- "Beni otsake mi-password le see le, minyee mike mihe awo
mi passport akaunt le mli lolo. Mike laptop kroko po bor mdeŋ shi nor
ko nor ko tsakeee." → YES
- "Portal yeyea menyo nam o" → NO
- "Nhyehye no mma me kwan se menwie m’akatua wor ak-
wammisa krataa no ho. Mede intanet nkitahodi a eye den na ereye eyi
afi Nkran" → YES

Now classify:
- "{message}" →"#,
};

/// Same few-shot set, phrased for very small models that echo instructions back.
pub const TRIAGE_COMPACT_V1: PromptTemplate = PromptTemplate {
    slug: "triage_compact_v1",
    body: r#"Does the message report a technical problem with a government website or app (outage, error, slowness, failed payment, login trouble)? Reply with one word: YES or NO.

"The system says I didn’t pay!" → YES
"When will my passport arrive?" → NO
"Portal yeyea menyo nam o" → NO

"{message}" →"#,
};

pub const PROMPTS: &[PromptTemplate] = &[TRIAGE_V1, TRIAGE_COMPACT_V1];
pub const DEFAULT_PROMPT: PromptTemplate = TRIAGE_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_embeds_message_verbatim() {
        let msg = "Payment <failed> & \"retry\" didn't help";
        let p = DEFAULT_PROMPT.render(msg);
        assert!(p.text.contains(msg));
        assert!(p.text.ends_with(&format!("- \"{msg}\" →")));
        assert_eq!(p.template_slug, "triage_v1");
    }

    #[test]
    fn default_prompt_is_multilingual_few_shot() {
        assert!(DEFAULT_PROMPT.body.contains("Answer ONLY \"YES\" or \"NO\""));
        assert!(DEFAULT_PROMPT.body.contains("Portal yeyea menyo nam o"));
        assert!(DEFAULT_PROMPT.body.contains("mdeŋ"));
    }

    #[test]
    fn prompt_lookup() {
        assert!(prompt_by_slug("triage_v1").is_some());
        assert!(prompt_by_slug("triage_compact_v1").is_some());
        assert!(prompt_by_slug("nonexistent").is_none());
    }

    #[test]
    fn hashes_differ_between_templates() {
        assert_ne!(TRIAGE_V1.hash(), TRIAGE_COMPACT_V1.hash());
        assert_eq!(TRIAGE_V1.hash(), TRIAGE_V1.hash());
    }
}
