//! Splitting oversized content into platform-sized chunks.

/// Split `text` into chunks of at most `max_len` bytes.
///
/// Split priority: the last newline before the bound, else the last
/// space, else a hard cut. A separator-based split never lands below
/// half the bound (a tiny leading chunk reads worse than a mid-line
/// break), and a cut never falls inside a UTF-8 codepoint. The
/// separator at a split point is consumed, so joining the chunks with
/// it restores the original text.
#[must_use]
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_owned()];
    }
    let floor = max_len / 2;
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_len {
            chunks.push(rest.to_owned());
            break;
        }
        let window = boundary(rest, max_len);
        if let Some(pos) = rest[..window].rfind('\n').filter(|&p| p >= floor) {
            chunks.push(rest[..pos].to_owned());
            rest = &rest[pos + 1..];
            continue;
        }
        if let Some(pos) = rest[..window].rfind(' ').filter(|&p| p >= floor) {
            chunks.push(rest[..pos].to_owned());
            rest = &rest[pos + 1..];
            continue;
        }
        // Hard cut; always take at least one codepoint so the loop
        // makes progress.
        let cut = if window == 0 {
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            window
        };
        chunks.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    chunks
}

/// Largest index `<= at` that is a char boundary of `s`.
fn boundary(s: &str, at: usize) -> usize {
    let mut i = at.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_owned()]);
    }

    #[test]
    fn test_split_prefers_newline() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_message(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_owned(), "cccc".to_owned()]);
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn test_split_falls_back_to_space() {
        let text = "alpha beta gamma";
        let chunks = split_message(text, 12);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "a".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_separator_below_half_bound_ignored() {
        // The only newline sits at index 2, under the floor of 5, so
        // the first chunk is a hard cut at the bound.
        let text = format!("ab\n{}", "c".repeat(20));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0], "ab\nccccccc");
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_cut_never_inside_codepoint() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 9);
        assert!(chunks.iter().all(|c| c.len() <= 9));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_oversized_block_round_trips() {
        // 2.5x the bound, realistic line lengths.
        let line = "x".repeat(80);
        let text = vec![line; 128].join("\n");
        assert!(text.len() > 4096 * 2);
        let chunks = split_message(&text, 4096);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.join("\n"), text);
    }
}
