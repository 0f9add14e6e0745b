// src/gcode/parser.rs - Line parser for the letter/number command protocol
use std::collections::BTreeMap;

use super::{GCode, GCodeError};

/// Parses one line of text.
///
/// Returns `Ok(None)` for blank lines, comment only lines and lines starting
/// with `%`. Otherwise the line, once uppercased and stripped of whitespace,
/// `;` comments and `( )` comments, must be a sequence of letter + signed
/// decimal words with nothing left over.
pub fn parse_line(line: &str) -> Result<Option<GCode>, GCodeError> {
    let cleaned = strip_line(line);
    if cleaned.is_empty() || cleaned.starts_with('%') {
        return Ok(None);
    }

    let mut params = BTreeMap::new();
    let mut rest = cleaned.as_str();
    while !rest.is_empty() {
        let Some((letter, value, tail)) = next_word(rest) else {
            return Err(if params.is_empty() && !contains_word(rest) {
                GCodeError::NotFound
            } else {
                GCodeError::ExtraCharacters(cleaned.clone())
            });
        };
        if value.parse::<f64>().is_err() {
            return Err(GCodeError::InvalidNumber { letter, value: value.to_string() });
        }
        if params.insert(letter, value.to_string()).is_some() {
            return Err(GCodeError::Duplicated(letter));
        }
        rest = tail;
    }

    if params.contains_key(&'M') {
        if params.contains_key(&'G') {
            return Err(GCodeError::GAndM);
        }
        if params.contains_key(&'N') {
            return Err(GCodeError::NAndM);
        }
    }
    Ok(Some(GCode::from_params(params)))
}

/// Uppercases and drops whitespace and comments. An unclosed `(` is kept so
/// the word scanner reports it.
fn strip_line(line: &str) -> String {
    let upper = line.to_ascii_uppercase();
    let mut cleaned = String::with_capacity(upper.len());
    let mut chars = upper.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            ';' => break,
            '(' => match upper[index..].find(')') {
                Some(close) => {
                    let end = index + close;
                    while chars.next().is_some_and(|(i, _)| i < end) {}
                }
                None => cleaned.push(c),
            },
            c if c.is_whitespace() => {}
            c => cleaned.push(c),
        }
    }
    cleaned
}

/// Splits `X-1.5Y2` into (`X`, `-1.5`, `Y2`).
fn next_word(input: &str) -> Option<(char, &str, &str)> {
    let bytes = input.as_bytes();
    let letter = *bytes.first()?;
    if !letter.is_ascii_uppercase() {
        return None;
    }
    let mut pos = 1;
    if matches!(bytes.get(pos), Some(b'+' | b'-')) {
        pos += 1;
    }
    let digits = pos;
    while matches!(bytes.get(pos), Some(b) if b.is_ascii_digit() || *b == b'.') {
        pos += 1;
    }
    if pos == digits {
        return None;
    }
    Some((letter as char, &input[1..pos], &input[pos..]))
}

/// True if a letter + number word appears anywhere in `input`.
fn contains_word(input: &str) -> bool {
    input
        .char_indices()
        .any(|(i, c)| c.is_ascii_uppercase() && next_word(&input[i..]).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line() {
        assert_eq!(strip_line("x1 (note) y2 ; tail"), "X1Y2");
        assert_eq!(strip_line("G1 (unclosed"), "G1(UNCLOSED");
        assert_eq!(strip_line("(a;b)X1"), "X1");
    }

    #[test]
    fn test_next_word() {
        assert_eq!(next_word("X-1.5Y2"), Some(('X', "-1.5", "Y2")));
        assert_eq!(next_word("Y"), None);
        assert_eq!(next_word("+Y1"), None);
    }
}
