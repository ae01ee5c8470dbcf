//! Char-boundary-safe truncation for log and display output.

/// Truncate `&str` to at most `max_bytes` without splitting a UTF-8 codepoint.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate a `String` in place, appending `...` when anything was cut.
pub fn truncate_string(s: &mut String, max_bytes: usize) {
    if s.len() > max_bytes {
        let keep = truncate_str(s, max_bytes).len();
        s.truncate(keep);
        s.push_str("...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_untouched() {
        assert_eq!(truncate_str("note", 10), "note");
        assert_eq!(truncate_str("", 0), "");
    }

    #[test]
    fn cuts_ascii() {
        assert_eq!(truncate_str("buy milk today", 8), "buy milk");
    }

    #[test]
    fn never_splits_multibyte() {
        // 4-byte emoji, 3-byte CJK
        let s = "\u{1F600}\u{4e16}";
        assert_eq!(truncate_str(s, 5), "\u{1F600}");
        assert_eq!(truncate_str(s, 3), "");
        assert_eq!(truncate_str(s, 7), s);
    }

    #[test]
    fn string_gets_ellipsis() {
        let mut s = String::from("hello world");
        truncate_string(&mut s, 5);
        assert_eq!(s, "hello...");

        let mut short = String::from("hi");
        truncate_string(&mut short, 5);
        assert_eq!(short, "hi");
    }
}
