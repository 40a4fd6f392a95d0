//! Grade bands and grade tokens in standard codes.

use std::fmt;

/// Highest grade a band or code may name.
const MAX_GRADE: u8 = 12;

/// An inclusive grade range, or no constraint at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeBand {
    /// Any grade is acceptable.
    Unconstrained,
    /// Grades `start..=end`, kindergarten being 0.
    Range {
        /// First grade.
        start: u8,
        /// Last grade.
        end: u8,
    },
}

impl GradeBand {
    /// Parses `6-8`, `9-12`, `7`, `K-2` or `K`.
    ///
    /// Anything else, including an empty string, is unconstrained.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        parse_span(raw).map_or(Self::Unconstrained, |(start, end)| Self::Range { start, end })
    }

    /// Whether the band limits anything.
    #[must_use]
    pub const fn is_constrained(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// Whether a single grade falls inside the band.
    #[must_use]
    pub const fn contains(&self, grade: u8) -> bool {
        match *self {
            Self::Unconstrained => true,
            Self::Range { start, end } => start <= grade && grade <= end,
        }
    }

    /// Whether a whole span falls inside the band.
    #[must_use]
    pub const fn contains_span(&self, span: (u8, u8)) -> bool {
        match *self {
            Self::Unconstrained => true,
            Self::Range { start, end } => start <= span.0 && span.1 <= end,
        }
    }
}

impl fmt::Display for GradeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Unconstrained => write!(f, "any grade"),
            Self::Range { start, end } if start == end => write!(f, "{}", grade_label(start)),
            Self::Range { start, end } => write!(f, "{}-{}", grade_label(start), grade_label(end)),
        }
    }
}

fn grade_label(grade: u8) -> String {
    if grade == 0 {
        "K".to_string()
    } else {
        grade.to_string()
    }
}

fn parse_grade(token: &str) -> Option<u8> {
    let token = token.trim();
    if token.eq_ignore_ascii_case("k") {
        return Some(0);
    }
    token.parse::<u8>().ok().filter(|g| *g <= MAX_GRADE)
}

/// Parses a grade span strictly; `None` when it cannot be read.
#[must_use]
pub fn parse_span(raw: &str) -> Option<(u8, u8)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (start, end) = match raw.split_once(|c: char| c == '-' || c == '\u{2013}') {
        Some((a, b)) => (parse_grade(a)?, parse_grade(b)?),
        None => {
            let g = parse_grade(raw)?;
            (g, g)
        }
    };
    (start <= end).then_some((start, end))
}

/// Reads the leading grade token of a standard code, e.g. `7` in `7.G.3`
/// or `K` in `K.CC.1`. Codes like `HSA.CED.1` carry none.
#[must_use]
pub fn code_grade(code: &str) -> Option<u8> {
    let code = code.trim();
    let digits: String = code.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return digits.parse::<u8>().ok().filter(|g| *g <= MAX_GRADE);
    }
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some('K' | 'k'), None) => Some(0),
        (Some('K' | 'k'), Some(next)) if !next.is_ascii_alphabetic() => Some(0),
        _ => None,
    }
}
