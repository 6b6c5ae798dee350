//! Text cleanup helpers applied to extracted document text

/// Clean and normalize extracted text.
///
/// Normalizes line endings, drops NUL bytes, collapses runs of three or
/// more newlines into a single blank line, right-trims every line and
/// trims the whole text.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let normalized = text
        .replace('\0', "")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let mut collapsed = String::with_capacity(normalized.len());
    let mut newline_run = 0usize;
    for ch in normalized.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                collapsed.push(ch);
            }
        } else {
            newline_run = 0;
            collapsed.push(ch);
        }
    }

    let lines: Vec<&str> = collapsed.split('\n').map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

/// Count whitespace-separated words
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_normalizes_whitespace() {
        let result = clean_text("Hello\r\nWorld\r\n\r\n\r\n\r\nTest");
        assert!(!result.contains('\r'));
        assert!(!result.contains("\n\n\n"));
        assert_eq!(result, "Hello\nWorld\n\nTest");
    }

    #[test]
    fn test_clean_text_removes_null_bytes() {
        assert_eq!(clean_text("Hello\0World"), "HelloWorld");
    }

    #[test]
    fn test_clean_text_trims_lines() {
        assert_eq!(clean_text("  a   \nb\t\n\n"), "a\nb");
    }

    #[test]
    fn test_clean_text_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n \r\n"), "");
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("Hello World Test"), 3);
        assert_eq!(count_words("  spaced\tout\nwords "), 3);
        assert_eq!(count_words(""), 0);
    }
}
