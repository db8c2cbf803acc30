//! Assistant-trigger detection: the token `@mathia`, case-insensitive and
//! word-bounded, anywhere in a message body.

use mathia_core::config::ASSISTANT_TRIGGER;

/// True when the message invokes the assistant.
pub fn is_assistant_trigger(text: &str) -> bool {
    find_trigger(text).is_some()
}

/// Remove the first trigger token and collapse the surrounding whitespace,
/// yielding the utterance handed to the intent parser.
pub fn strip_trigger(text: &str) -> String {
    match find_trigger(text) {
        Some((start, end)) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(text[..start].trim_end());
            if !out.is_empty() && end < text.len() {
                out.push(' ');
            }
            out.push_str(text[end..].trim_start());
            out.trim().to_string()
        }
        None => text.trim().to_string(),
    }
}

/// Byte range of the first word-bounded trigger occurrence.
fn find_trigger(text: &str) -> Option<(usize, usize)> {
    let lower = text.to_lowercase();
    let needle = ASSISTANT_TRIGGER;
    let mut from = 0;
    while let Some(rel) = lower[from..].find(needle) {
        let start = from + rel;
        let end = start + needle.len();
        let before_ok = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '@');
        let after_ok = end == text.len()
            || !text[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if before_ok && after_ok {
            return Some((start, end));
        }
        from = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_and_mixed_case() {
        assert!(is_assistant_trigger("@mathia show my balance"));
        assert!(is_assistant_trigger("hey @Mathia, what's up"));
        assert!(is_assistant_trigger("@MATHIA remind me"));
    }

    #[test]
    fn requires_word_boundary() {
        assert!(!is_assistant_trigger("email me at x@mathiamail.com"));
        assert!(!is_assistant_trigger("@mathias is a different user"));
        assert!(is_assistant_trigger("ping @mathia."));
        assert!(is_assistant_trigger("(@mathia balance)"));
    }

    #[test]
    fn absent_trigger() {
        assert!(!is_assistant_trigger("just a normal message"));
        assert!(!is_assistant_trigger("mathia without the at sign"));
    }

    #[test]
    fn strip_removes_token_once() {
        assert_eq!(strip_trigger("@mathia show my balance"), "show my balance");
        assert_eq!(strip_trigger("hey @mathia balance"), "hey balance");
        assert_eq!(strip_trigger("no trigger here"), "no trigger here");
    }
}
