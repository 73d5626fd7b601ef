#![forbid(unsafe_code)]

//! Content sanitization applied before any insertion technique runs.
//!
//! Snippets are user-authored but end up inside pages that may interpret
//! them (rich editors parse pasted markup, some fields render links). The
//! sanitizer removes:
//! - control characters other than newline, carriage return and tab,
//! - script-capable URL schemes (`javascript:`, `vbscript:`, `data:text/html`),
//! - attribute fragments that look like inline event handlers (`onerror=`),
//!
//! and bounds the result to a maximum number of characters.

const BLOCKED_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:text/html"];

/// Sanitize `input` and truncate it to at most `max_chars` characters.
#[must_use]
pub fn sanitize_content(input: &str, max_chars: usize) -> String {
    let mut chars: Vec<char> = input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    // Removal can splice a new match together ("javajavascript:script:"), so
    // repeat until a pass changes nothing.
    loop {
        let before = chars.len();
        strip_schemes(&mut chars);
        strip_event_handlers(&mut chars);
        if chars.len() == before {
            break;
        }
    }

    chars.truncate(max_chars);
    chars.into_iter().collect()
}

fn strip_schemes(chars: &mut Vec<char>) {
    for scheme in BLOCKED_SCHEMES {
        let pattern: Vec<char> = scheme.chars().collect();
        let mut i = 0;
        while i + pattern.len() <= chars.len() {
            if starts_with_ignore_case(&chars[i..], &pattern) {
                chars.drain(i..i + pattern.len());
            } else {
                i += 1;
            }
        }
    }
}

/// Remove `on<letters>\s*=` where `on` starts a word.
fn strip_event_handlers(chars: &mut Vec<char>) {
    let mut i = 0;
    while i + 1 < chars.len() {
        let at_word_start = i == 0 || !chars[i - 1].is_alphanumeric();
        if at_word_start
            && chars[i].eq_ignore_ascii_case(&'o')
            && chars[i + 1].eq_ignore_ascii_case(&'n')
        {
            if let Some(end) = handler_end(chars, i + 2) {
                chars.drain(i..end);
                continue;
            }
        }
        i += 1;
    }
}

/// If `chars[start..]` is `<2+ letters>\s*=`, return the index just past `=`.
fn handler_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start;
    while j < chars.len() && chars[j].is_ascii_alphabetic() {
        j += 1;
    }
    if j - start < 2 {
        return None;
    }
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    (j < chars.len() && chars[j] == '=').then_some(j + 1)
}

fn starts_with_ignore_case(haystack: &[char], needle: &[char]) -> bool {
    haystack.len() >= needle.len()
        && haystack
            .iter()
            .zip(needle)
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ordinary_text() {
        let text = "Hi there,\n\tplease review the one-pager online.";
        assert_eq!(sanitize_content(text, 1000), text);
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(sanitize_content("a\u{0}b\u{7}c\r\n", 100), "abc\r\n");
    }

    #[test]
    fn strips_script_schemes_case_insensitively() {
        assert_eq!(
            sanitize_content("see JavaScript:alert(1) now", 100),
            "see alert(1) now"
        );
        assert_eq!(
            sanitize_content("x data:text/html,<b>", 100),
            "x ,<b>"
        );
    }

    #[test]
    fn strips_spliced_schemes() {
        assert_eq!(sanitize_content("javajavascript:script:go", 100), "go");
    }

    #[test]
    fn strips_event_handler_fragments() {
        assert_eq!(
            sanitize_content("<img src=x onerror=alert(1)>", 100),
            "<img src=x alert(1)>"
        );
        assert_eq!(
            sanitize_content("<a ONCLICK = go()>", 100),
            "<a  go()>"
        );
    }

    #[test]
    fn does_not_touch_words_containing_on() {
        let text = "Bonjour=salut; common = shared; on = off";
        assert_eq!(sanitize_content(text, 100), text);
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(sanitize_content("héllo wörld", 5), "héllo");
        assert_eq!(sanitize_content("abc", 0), "");
    }
}
