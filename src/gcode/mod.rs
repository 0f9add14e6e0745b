// src/gcode/mod.rs - Parsed G-code line and its accessors
pub mod parser;

pub use parser::parse_line;

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::coordinates::{Axis, Coordinates};

/// Malformed line. Never reaches the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GCodeError {
    #[error("gcode not found")]
    NotFound,
    #[error("extra characters in line: {0}")]
    ExtraCharacters(String),
    #[error("duplicated gcode entries: {0}")]
    Duplicated(char),
    #[error("g and m command found")]
    GAndM,
    #[error("n and m command found")]
    NAndM,
    #[error("invalid number for {letter}: {value}")]
    InvalidNumber { letter: char, value: String },
}

/// One parsed line: uppercase letters mapped to their raw decimal strings.
///
/// Every stored value is known to parse as `f64`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GCode {
    params: BTreeMap<char, String>,
}

impl GCode {
    pub(crate) fn from_params(params: BTreeMap<char, String>) -> Self {
        Self { params }
    }

    /// Shorthand for [`parse_line`].
    pub fn parse_line(line: &str) -> Result<Option<GCode>, GCodeError> {
        parser::parse_line(line)
    }

    pub fn has(&self, letter: char) -> bool {
        self.params.contains_key(&letter)
    }

    /// Raw text of a parameter, as written in the line.
    pub fn raw(&self, letter: char) -> Option<&str> {
        self.params.get(&letter).map(String::as_str)
    }

    pub fn get(&self, letter: char) -> Option<f64> {
        self.raw(letter).and_then(|value| value.parse().ok())
    }

    /// Parameter value times `multiply`, or `default` untouched when absent.
    pub fn get_or(&self, letter: char, default: f64, multiply: f64) -> f64 {
        self.get(letter).map_or(default, |value| value * multiply)
    }

    /// Command token such as `G1` or `M104`. Codes are normalized, so `G01`
    /// and `G1` produce the same token.
    pub fn command(&self) -> Option<String> {
        ['G', 'M']
            .into_iter()
            .find_map(|letter| self.get(letter).map(|code| format!("{}{}", letter, code)))
    }

    /// Axis values scaled by `multiply`; absent axes take the matching
    /// component of `default`.
    pub fn coordinates(&self, default: &Coordinates, multiply: f64) -> Coordinates {
        Coordinates::from_fn(|axis| self.get_or(axis.letter(), default[axis], multiply))
    }

    pub fn has_coordinates(&self) -> bool {
        Axis::ALL
            .into_iter()
            .any(|axis| self.has(axis.letter()))
    }

    /// Arc center offset from `I`, `J` and `K` mapped onto `X`, `Y` and `Z`.
    pub fn radius(&self, default: &Coordinates, multiply: f64) -> Coordinates {
        default
            .with(Axis::X, self.get_or('I', default.x(), multiply))
            .with(Axis::Y, self.get_or('J', default.y(), multiply))
            .with(Axis::Z, self.get_or('K', default.z(), multiply))
    }

    pub fn params(&self) -> impl Iterator<Item = (char, &str)> {
        self.params.iter().map(|(letter, value)| (*letter, value.as_str()))
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command_first = self
            .params()
            .filter(|(letter, _)| matches!(letter, 'G' | 'M'))
            .chain(self.params().filter(|(letter, _)| !matches!(letter, 'G' | 'M')));
        for (i, (letter, value)) in command_first.enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}{}", letter, value)?;
        }
        Ok(())
    }
}
