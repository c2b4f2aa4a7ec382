//! Sanitization of generated text before synthesis.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Paralinguistic cues the synthesis backend understands. Anything else
/// in brackets is dropped.
const ALLOWED_CUES: &[&str] = &[
    "laugh",
    "chuckle",
    "sigh",
    "gasp",
    "cough",
    "clear throat",
    "sniff",
    "groan",
    "shush",
];

fn cue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]").expect("static regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("static regex"))
}

/// Strip markdown emphasis, filter bracketed cue tags, collapse
/// whitespace. Idempotent.
///
/// With `allow_paralinguistic`, whitelisted cues are kept in normalized
/// form (lowercase, single-spaced); all other bracket groups vanish.
/// Without it, every bracket group vanishes.
pub fn sanitize_spoken_text(text: &str, allow_paralinguistic: bool) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut out = text
        .replace('`', "")
        .replace("**", "")
        .replace('*', "")
        .replace("__", "")
        .replace('_', "");

    out = if allow_paralinguistic {
        cue_regex()
            .replace_all(&out, |caps: &Captures| {
                let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let normalized = tag.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
                if ALLOWED_CUES.contains(&normalized.as_str()) {
                    format!("[{normalized}]")
                } else {
                    String::new()
                }
            })
            .into_owned()
    } else {
        cue_regex().replace_all(&out, "").into_owned()
    };

    whitespace_regex()
        .replace_all(&out, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markdown_emphasis() {
        assert_eq!(
            sanitize_spoken_text("**Hello** _there_ `friend`", true),
            "Hello there friend"
        );
    }

    #[test]
    fn test_keeps_whitelisted_cues_normalized() {
        assert_eq!(
            sanitize_spoken_text("[Laugh] that was [CLEAR   THROAT] funny", true),
            "[laugh] that was [clear throat] funny"
        );
    }

    #[test]
    fn test_drops_unknown_cues() {
        assert_eq!(
            sanitize_spoken_text("[whispers] hello [laugh]", true),
            "hello [laugh]"
        );
    }

    #[test]
    fn test_strip_mode_removes_all_brackets() {
        let out = sanitize_spoken_text("[laugh] hi [sigh] there [x]", false);
        assert_eq!(out, "hi there");
        assert!(!out.contains('['));
        assert!(!out.contains(']'));
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(sanitize_spoken_text("  a   b\n\n c ", true), "a b c");
    }

    #[test]
    fn test_idempotent() {
        for allow in [true, false] {
            for input in [
                "**Hello** [Laugh]  [weird tag] world",
                "plain text",
                "[sigh]   spaced   out  ",
                "",
            ] {
                let once = sanitize_spoken_text(input, allow);
                let twice = sanitize_spoken_text(&once, allow);
                assert_eq!(once, twice, "input {input:?} allow={allow}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitize_spoken_text("", true), "");
    }
}
