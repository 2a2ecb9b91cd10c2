//! Cleanup of captured DNOS CLI output before parsing.
//!
//! Captures can contain pagination artifacts, carriage returns from the PTY,
//! and trailing prompt fragments; all parsers run on cleaned captures so a
//! paginated capture parses identically to an un-paginated one.

/// Pager continuation marker emitted by the device when `| no-more` was not
/// applied.
pub const PAGER_MARKER: &str = "--More--";

/// Strips pager artifacts, PTY carriage returns, and backspace-erased pager
/// prompts from a capture.
pub fn clean_capture(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for line in raw.replace('\r', "").lines() {
        let line = strip_pager(line);
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
}

fn strip_pager(line: &str) -> &str {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix(PAGER_MARKER) {
        // The pager marker is erased with backspaces and spaces when the
        // output advances; anything left after it is real content.
        Some(rest) => rest.trim_start_matches(['\u{8}', ' ']),
        None => line,
    }
}

/// Whether a capture currently ends in an active pager prompt. Commands must
/// not be sent while this holds.
pub fn pager_active(buffer: &str) -> bool {
    buffer.trim_end().ends_with(PAGER_MARKER)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_clean_removes_pager_lines() {
        let raw = "line one\r\n--More--\u{8}\u{8} line two\r\nline three\r\n";
        assert_eq!(clean_capture(raw), "line one\nline two\nline three\n");
    }

    #[test]
    fn test_paginated_equals_plain() {
        let plain = indoc! {"
            | ge100-0/0/29.251 (L2) | enabled | up |
            | ge100-0/0/30.251 (L2) | enabled | up |
        "};
        let paginated = "| ge100-0/0/29.251 (L2) | enabled | up |\r\n--More--\u{8}\u{8}| ge100-0/0/30.251 (L2) | enabled | up |\r\n";
        assert_eq!(clean_capture(plain), clean_capture(paginated));
    }

    #[test]
    fn test_pager_active() {
        assert!(pager_active("some output\n--More--"));
        assert!(pager_active("some output\n--More-- "));
        assert!(!pager_active("some output\n"));
    }
}
