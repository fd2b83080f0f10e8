//! A1 references and `sqref` lists, 0-indexed internally.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EXCEL_MAX_ROWS: u32 = 1_048_576;
pub const EXCEL_MAX_COLS: u32 = 16_384;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty cell reference")]
    Empty,
    #[error("cell reference has no column letters")]
    MissingColumn,
    #[error("cell reference has no row number")]
    MissingRow,
    #[error("column out of range")]
    InvalidColumn,
    #[error("row out of range")]
    InvalidRow,
    #[error("unexpected characters after the row number")]
    TrailingCharacters,
}

/// One cell. `CellRef::new(0, 0)` (the default) is `A1`.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn to_a1(self) -> String {
        self.to_string()
    }

    /// Accepts absolute markers (`$B$2`) and lowercase letters.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let text = a1.trim();
        if text.is_empty() {
            return Err(A1ParseError::Empty);
        }
        let text = text.strip_prefix('$').unwrap_or(text);
        let split = text
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let (letters, rest) = text.split_at(split);
        if letters.is_empty() {
            return Err(A1ParseError::MissingColumn);
        }
        let digits = rest.strip_prefix('$').unwrap_or(rest);
        if digits.is_empty() {
            return Err(A1ParseError::MissingRow);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(if digits.starts_with(|c: char| c.is_ascii_digit()) {
                A1ParseError::TrailingCharacters
            } else {
                A1ParseError::MissingRow
            });
        }

        let col = name_to_col(letters)?;
        let row = match digits.parse::<u32>() {
            Ok(row) if (1..=EXCEL_MAX_ROWS).contains(&row) => row - 1,
            _ => return Err(A1ParseError::InvalidRow),
        };
        Ok(Self { row, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_name(self.col), self.row + 1)
    }
}

/// Inclusive rectangle with `start` at the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    /// Corners may be given in any order.
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    /// Same columns, last row moved to `end_row`.
    pub fn with_end_row(self, end_row: u32) -> Self {
        Range::new(self.start, CellRef::new(end_row, self.end.col))
    }

    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let (first, second) = match a1.trim().split_once(':') {
            Some((first, second)) => (first, second),
            None => (a1, a1),
        };
        Ok(Range::new(CellRef::from_a1(first)?, CellRef::from_a1(second)?))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)?;
        if !self.is_single_cell() {
            write!(f, ":{}", self.end)?;
        }
        Ok(())
    }
}

/// `"A1:A10 C2"` -> two ranges. Runs of whitespace are tolerated.
pub fn parse_sqref(sqref: &str) -> Result<Vec<Range>, A1ParseError> {
    sqref.split_whitespace().map(Range::from_a1).collect()
}

pub fn format_sqref(ranges: &[Range]) -> String {
    ranges
        .iter()
        .map(Range::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `0 -> "A"`, `27 -> "AB"`.
pub fn col_to_name(col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

fn name_to_col(letters: &str) -> Result<u32, A1ParseError> {
    let number = letters.bytes().try_fold(0u32, |acc, b| {
        let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        acc.checked_mul(26)
            .and_then(|acc| acc.checked_add(digit))
            .ok_or(A1ParseError::InvalidColumn)
    })?;
    match number {
        1..=EXCEL_MAX_COLS => Ok(number - 1),
        _ => Err(A1ParseError::InvalidColumn),
    }
}
