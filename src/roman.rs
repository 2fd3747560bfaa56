use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Identifier attached to one page of the source book, classified from the
/// page counter value reported by the reader (and later from filename stems).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageLabel {
    /// Body page with an arabic number.
    Integer(i64),
    /// Front-matter page with a roman numeral, stored by value.
    Roman(u32),
    /// Anything the reader reports that is neither arabic nor roman.
    Opaque(String),
}

impl PageLabel {
    /// Classifies a raw label. Integer parse wins, then roman numerals
    /// (case-insensitive, strict subtractive notation), then opaque.
    pub fn classify(raw: &str) -> PageLabel {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return PageLabel::Integer(value);
        }
        if let Some(value) = parse_roman(trimmed) {
            return PageLabel::Roman(value);
        }
        PageLabel::Opaque(trimmed.to_string())
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, PageLabel::Integer(_))
    }

    pub fn is_roman(&self) -> bool {
        matches!(self, PageLabel::Roman(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PageLabel::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn roman_value(&self) -> Option<u32> {
        match self {
            PageLabel::Roman(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageLabel::Integer(value) => write!(f, "{value}"),
            PageLabel::Roman(value) => write!(f, "{}", format_roman(*value)),
            PageLabel::Opaque(text) => write!(f, "{text}"),
        }
    }
}

fn roman_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)m{0,3}(cm|cd|d?c{0,3})(xc|xl|l?x{0,3})(ix|iv|v?i{0,3})$")
            .expect("roman numeral pattern is valid")
    })
}

/// Parses a roman numeral in standard subtractive notation. Returns `None`
/// for the empty string and for malformed sequences such as `iiii` or `vx`.
pub fn parse_roman(text: &str) -> Option<u32> {
    if text.is_empty() || !roman_pattern().is_match(text) {
        return None;
    }

    let digits: Vec<u32> = text
        .chars()
        .map(|character| match character.to_ascii_lowercase() {
            'i' => 1,
            'v' => 5,
            'x' => 10,
            'l' => 50,
            'c' => 100,
            'd' => 500,
            'm' => 1000,
            _ => 0,
        })
        .collect();

    let mut total = 0_i64;
    for (position, digit) in digits.iter().enumerate() {
        if digits[position + 1..].iter().any(|later| later > digit) {
            total -= i64::from(*digit);
        } else {
            total += i64::from(*digit);
        }
    }

    u32::try_from(total).ok().filter(|value| *value > 0)
}

/// Canonical lowercase rendering, the inverse of [`parse_roman`] for every
/// value it accepts.
pub fn format_roman(mut value: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];

    let mut rendered = String::new();
    for (magnitude, numeral) in TABLE {
        while value >= magnitude {
            rendered.push_str(numeral);
            value -= magnitude;
        }
    }
    rendered
}
