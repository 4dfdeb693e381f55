//! Logical-line reading and low-level text utilities
//!
//! Scripts are line-oriented, but a line ending in `\` joins the next
//! raw line into one logical line. The reader tracks how many raw lines
//! each logical line consumed so errors can quote the line its first
//! token appeared on. Token substitution and the hex decoder for
//! `binary` shader sections also live here.

use crate::script::source::TokenReplacement;

/// A replacement at one position expanded more than this many times
pub const MAX_TOKEN_REPLACEMENTS: usize = 1000;

/// One fully joined logical line
#[derive(Debug)]
pub struct LogicalLine {
    /// The joined text, continuations removed
    pub text: String,
    /// 1-based number of the raw line the logical line starts on
    pub line_num: usize,
}

/// Iterator over the logical lines of a script
pub struct LineReader<'a> {
    lines: Vec<&'a str>,
    next: usize,
}

impl<'a> LineReader<'a> {
    /// Read logical lines from the full script text
    pub fn new(contents: &'a str) -> Self {
        Self {
            lines: contents.lines().collect(),
            next: 0,
        }
    }

    /// The next logical line, joining `\` continuations
    pub fn next_logical(&mut self) -> Option<LogicalLine> {
        if self.next >= self.lines.len() {
            return None;
        }
        let line_num = self.next + 1;
        let mut text = String::new();
        loop {
            let raw = self.lines[self.next];
            self.next += 1;
            match raw.strip_suffix('\\') {
                Some(stripped) if self.next < self.lines.len() => {
                    text.push_str(stripped);
                }
                _ => {
                    text.push_str(raw);
                    break;
                }
            }
        }
        Some(LogicalLine { text, line_num })
    }
}

/// Apply every registered token replacement to a logical line
///
/// Replaced text is re-scanned, so a replacement may itself contain
/// tokens. A position that expands more than [`MAX_TOKEN_REPLACEMENTS`]
/// times aborts with an error to catch mutually recursive tokens.
pub fn substitute_tokens(
    line: &str,
    replacements: &[TokenReplacement],
) -> Result<String, String> {
    if replacements.is_empty() {
        return Ok(line.to_owned());
    }
    let mut text = line.to_owned();
    let mut pos = 0;
    while pos < text.len() {
        let mut count = 0;
        loop {
            let matched = replacements
                .iter()
                .find(|r| !r.token.is_empty() && text[pos..].starts_with(&r.token));
            match matched {
                Some(r) => {
                    count += 1;
                    if count > MAX_TOKEN_REPLACEMENTS {
                        return Err(format!(
                            "infinite recursion suspected while replacing token \"{}\"",
                            r.token
                        ));
                    }
                    text.replace_range(pos..pos + r.token.len(), &r.replacement);
                }
                None => break,
            }
        }
        // advance one character
        pos += text[pos..].chars().next().map_or(1, char::len_utf8);
    }
    Ok(text)
}

/// Decode the payload of a `binary` shader section
///
/// Comments (`#` to end of line) are stripped; the remaining
/// whitespace-separated tokens are hex digits grouped into 32-bit
/// little-endian words.
pub fn decode_hex_words(text: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for line in text.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        };
        for token in line.split_whitespace() {
            if token.len() > 8 {
                return Err(format!("invalid binary word \"{token}\""));
            }
            let word = u32::from_str_radix(token, 16)
                .map_err(|_| format!("invalid binary word \"{token}\""))?;
            bytes.extend_from_slice(&word.to_le_bytes());
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacement(token: &str, replacement: &str) -> TokenReplacement {
        TokenReplacement {
            token: token.to_owned(),
            replacement: replacement.to_owned(),
        }
    }

    #[test]
    fn test_continuations_track_line_numbers() {
        let text = "a\nb \\\nc \\\nd\ne";
        let mut reader = LineReader::new(text);
        let first = reader.next_logical().unwrap();
        assert_eq!(first.text, "a");
        assert_eq!(first.line_num, 1);
        let second = reader.next_logical().unwrap();
        assert_eq!(second.text, "b c d");
        assert_eq!(second.line_num, 2);
        let third = reader.next_logical().unwrap();
        assert_eq!(third.text, "e");
        assert_eq!(third.line_num, 5);
        assert!(reader.next_logical().is_none());
    }

    #[test]
    fn test_trailing_backslash_on_last_line() {
        let mut reader = LineReader::new("a \\");
        assert_eq!(reader.next_logical().unwrap().text, "a \\");
    }

    #[test]
    fn test_token_substitution() {
        let reps = [replacement("@W", "4")];
        assert_eq!(substitute_tokens("fbsize @W @W", &reps).unwrap(), "fbsize 4 4");
    }

    #[test]
    fn test_replacement_is_rescanned() {
        let reps = [replacement("@A", "@B @B"), replacement("@B", "1")];
        assert_eq!(substitute_tokens("x @A", &reps).unwrap(), "x 1 1");
    }

    #[test]
    fn test_infinite_recursion_detected() {
        let reps = [replacement("@A", "@A@A")];
        assert!(substitute_tokens("@A", &reps).is_err());
    }

    #[test]
    fn test_hex_decode() {
        let bytes = decode_hex_words("07230203 00010000 # a comment\ndeadbeef").unwrap();
        assert_eq!(
            bytes,
            [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00, 0xef, 0xbe, 0xad, 0xde]
        );
    }

    #[test]
    fn test_hex_decode_rejects_garbage() {
        assert!(decode_hex_words("07230203 nope").is_err());
        assert!(decode_hex_words("123456789").is_err());
    }
}
