//! Line sanitizing and value extraction.
//!
//! Grounded in `GCode.cpp`'s `sanitizeCommandString`, `findEndOfNumber`,
//! `extractGcodeValue`, and `findNextGM`.

/// Strips control characters, `/` block-delete markers, `(...)` comments,
/// `;`-to-end-of-line comments, and `%` program markers. Mirrors
/// `sanitizeCommandString`.
pub fn sanitize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_paren_comment = false;
    for ch in line.chars() {
        if in_paren_comment {
            if ch == ')' {
                in_paren_comment = false;
            }
            continue;
        }
        match ch {
            '(' => in_paren_comment = true,
            ';' | '%' => break,
            '/' => {}
            c if c.is_ascii_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Returns the index just past the number (optional sign, digits, at most
/// one decimal point) starting at `start`. Mirrors `findEndOfNumber`.
fn find_end_of_number(s: &[u8], start: usize) -> usize {
    let mut i = start;
    if i < s.len() && (s[i] == b'-' || s[i] == b'+') {
        i += 1;
    }
    let mut seen_dot = false;
    while i < s.len() {
        match s[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }
    i
}

/// Finds `letter` in `segment` and parses the number following it,
/// returning `default` if the letter is absent. Mirrors `extractGcodeValue`.
pub fn extract_value(segment: &str, letter: char, default: f64) -> f64 {
    let bytes = segment.as_bytes();
    let Some(pos) = segment.find(letter) else {
        return default;
    };
    let start = pos + letter.len_utf8();
    let end = find_end_of_number(bytes, start);
    if end == start {
        return default;
    }
    segment[start..end].parse().unwrap_or(default)
}

/// Finds the index of the next `G` or `M` in `s` at or after `from`, or
/// `s.len()` if there is none. Mirrors `findNextGM`.
pub fn find_next_gm(s: &str, from: usize) -> usize {
    let from = from.min(s.len());
    s[from..]
        .find(|c| c == 'G' || c == 'M')
        .map(|i| from + i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_parenthetical_and_semicolon_comments() {
        assert_eq!(sanitize_line("G1 X1 (move right) Y2"), "G1 X1  Y2");
        assert_eq!(sanitize_line("G1 X1 ; trailing comment"), "G1 X1 ");
    }

    #[test]
    fn strips_block_delete_and_program_markers() {
        assert_eq!(sanitize_line("/G1 X1"), "G1 X1");
        assert_eq!(sanitize_line("%G1 X1%"), "");
    }

    #[test]
    fn extract_value_parses_signed_decimal() {
        assert_eq!(extract_value("G1X-10.5Y3", 'X', 0.0), -10.5);
        assert_eq!(extract_value("G1X-10.5Y3", 'Y', 0.0), 3.0);
    }

    #[test]
    fn extract_value_falls_back_to_default_when_letter_missing() {
        assert_eq!(extract_value("G1X10", 'Z', -42.0), -42.0);
    }

    #[test]
    fn find_next_gm_locates_next_segment_start() {
        let s = "T4G1X1M3";
        let first = find_next_gm(s, 0);
        assert_eq!(&s[first..first + 1], "G");
        let second = find_next_gm(s, first + 1);
        assert_eq!(&s[second..second + 1], "M");
    }

    #[test]
    fn find_next_gm_returns_len_when_absent() {
        assert_eq!(find_next_gm("T4", 0), 2);
    }
}
