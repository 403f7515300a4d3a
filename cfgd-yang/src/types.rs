//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Inclusive value range of an integer-like restriction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Range {
    pub lo: i128,
    pub hi: i128,
}

/// A `pattern` statement with its optional schema-declared error message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Pattern {
    pub regex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Compiled leaf type. The YANG compiler resolves typedef chains before
/// handing the schema over, so unions here are already flattened to base
/// types.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "base")]
pub enum DataType {
    String {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patterns: Vec<Pattern>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        length: Vec<Range>,
    },
    Integer {
        bits: u8,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ranges: Vec<Range>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Unsigned {
        bits: u8,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ranges: Vec<Range>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Boolean,
    Enumeration {
        values: Vec<String>,
    },
    Union {
        types: Vec<DataType>,
    },
    Leafref {
        path: String,
    },
    Empty,
}

// ===== impl DataType =====

impl DataType {
    pub fn string() -> DataType {
        DataType::String {
            patterns: Vec::new(),
            length: Vec::new(),
        }
    }

    pub fn int(bits: u8) -> DataType {
        DataType::Integer {
            bits,
            ranges: Vec::new(),
            message: None,
        }
    }

    pub fn int_range(bits: u8, lo: i128, hi: i128) -> DataType {
        DataType::Integer {
            bits,
            ranges: vec![Range { lo, hi }],
            message: None,
        }
    }

    pub fn uint(bits: u8) -> DataType {
        DataType::Unsigned {
            bits,
            ranges: Vec::new(),
            message: None,
        }
    }

    pub fn uint_range(bits: u8, lo: i128, hi: i128) -> DataType {
        DataType::Unsigned {
            bits,
            ranges: vec![Range { lo, hi }],
            message: None,
        }
    }

    pub fn enumeration<I, S>(values: I) -> DataType
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataType::Enumeration {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn leafref(path: impl Into<String>) -> DataType {
        DataType::Leafref { path: path.into() }
    }

    pub fn is_empty_type(&self) -> bool {
        matches!(self, DataType::Empty)
    }

    /// Checks a value against the type restrictions. The returned message
    /// is the user-visible invalid-value text.
    pub fn check(&self, value: &str) -> Result<(), String> {
        match self {
            DataType::String { patterns, length } => {
                if !length.is_empty() {
                    let len = value.chars().count() as i128;
                    if !length.iter().any(|r| len >= r.lo && len <= r.hi) {
                        return Err(format!(
                            "Must be {} characters",
                            ranges_text(length)
                        ));
                    }
                }
                for pattern in patterns {
                    // Patterns are implicitly anchored, as in YANG.
                    let anchored = format!("^(?:{})$", pattern.regex);
                    let re = Regex::new(&anchored).map_err(|_| {
                        format!("Invalid pattern '{}'", pattern.regex)
                    })?;
                    if !re.is_match(value) {
                        return Err(match &pattern.message {
                            Some(message) => message.clone(),
                            None => format!(
                                "Does not match pattern '{}'",
                                pattern.regex
                            ),
                        });
                    }
                }
                Ok(())
            }
            DataType::Integer {
                bits,
                ranges,
                message,
            } => {
                let parsed: i128 = value.parse().map_err(|_| {
                    message
                        .clone()
                        .unwrap_or_else(|| format!("'{value}' is not a valid integer"))
                })?;
                let (lo, hi) = int_bounds(*bits);
                check_number(parsed, lo, hi, ranges, message)
            }
            DataType::Unsigned {
                bits,
                ranges,
                message,
            } => {
                let parsed: i128 = match value.parse() {
                    Ok(parsed) if parsed >= 0 => parsed,
                    _ => {
                        return Err(message.clone().unwrap_or_else(|| {
                            format!("'{value}' is not a valid unsigned integer")
                        }));
                    }
                };
                let (lo, hi) = uint_bounds(*bits);
                check_number(parsed, lo, hi, ranges, message)
            }
            DataType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err("Must be true or false".to_owned()),
            },
            DataType::Enumeration { values } => {
                if values.iter().any(|v| v == value) {
                    Ok(())
                } else {
                    Err(format!("Must be one of [{}]", values.join(", ")))
                }
            }
            DataType::Union { types } => {
                let mut messages = Vec::new();
                for typ in types {
                    match typ.check(value) {
                        Ok(()) => return Ok(()),
                        Err(message) => messages.push(message),
                    }
                }
                Err(messages.join("; "))
            }
            // Leafref target existence is a validation-time concern; any
            // syntactically well-formed value is accepted on set.
            DataType::Leafref { .. } => Ok(()),
            DataType::Empty => Ok(()),
        }
    }

    /// Schema-defined completion placeholder (e.g. `<text>`, `<0..65535>`).
    pub fn placeholder(&self) -> String {
        match self {
            DataType::String { .. } => "<text>".to_owned(),
            DataType::Integer { bits, ranges, .. } => {
                let (lo, hi) = match ranges.first() {
                    Some(range) => (range.lo, range.hi),
                    None => int_bounds(*bits),
                };
                format!("<{lo}..{hi}>")
            }
            DataType::Unsigned { bits, ranges, .. } => {
                let (lo, hi) = match ranges.first() {
                    Some(range) => (range.lo, range.hi),
                    None => uint_bounds(*bits),
                };
                format!("<{lo}..{hi}>")
            }
            DataType::Boolean => "<true|false>".to_owned(),
            DataType::Enumeration { values } => {
                format!("<{}>", values.join("|"))
            }
            DataType::Union { types } => types
                .iter()
                .map(DataType::placeholder)
                .collect::<Vec<_>>()
                .join(" "),
            DataType::Leafref { .. } => "<leafref>".to_owned(),
            DataType::Empty => String::new(),
        }
    }
}

// ===== helper functions =====

fn int_bounds(bits: u8) -> (i128, i128) {
    match bits {
        8 => (i8::MIN as i128, i8::MAX as i128),
        16 => (i16::MIN as i128, i16::MAX as i128),
        32 => (i32::MIN as i128, i32::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

fn uint_bounds(bits: u8) -> (i128, i128) {
    match bits {
        8 => (0, u8::MAX as i128),
        16 => (0, u16::MAX as i128),
        32 => (0, u32::MAX as i128),
        _ => (0, u64::MAX as i128),
    }
}

fn check_number(
    value: i128,
    type_lo: i128,
    type_hi: i128,
    ranges: &[Range],
    message: &Option<String>,
) -> Result<(), String> {
    let ranges = if ranges.is_empty() {
        &[Range {
            lo: type_lo,
            hi: type_hi,
        }][..]
    } else {
        ranges
    };
    if ranges.iter().any(|r| value >= r.lo && value <= r.hi) {
        return Ok(());
    }
    Err(match message {
        Some(message) => message.clone(),
        None => format!("Must have value {}", ranges_value_text(ranges)),
    })
}

fn ranges_value_text(ranges: &[Range]) -> String {
    ranges
        .iter()
        .map(|r| {
            if r.lo == r.hi {
                format!("{}", r.lo)
            } else {
                format!("between {} and {}", r.lo, r.hi)
            }
        })
        .collect::<Vec<_>>()
        .join(" or ")
}

fn ranges_text(ranges: &[Range]) -> String {
    ranges
        .iter()
        .map(|r| {
            if r.lo == r.hi {
                format!("exactly {}", r.lo)
            } else {
                format!("between {} and {}", r.lo, r.hi)
            }
        })
        .collect::<Vec<_>>()
        .join(" or ")
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ranges() {
        let typ = DataType::int_range(16, 1, 1000);
        assert!(typ.check("1").is_ok());
        assert!(typ.check("1000").is_ok());
        assert_eq!(
            typ.check("1001").unwrap_err(),
            "Must have value between 1 and 1000"
        );
        assert!(typ.check("abc").is_err());
    }

    #[test]
    fn string_patterns() {
        let typ = DataType::String {
            patterns: vec![Pattern {
                regex: "[a-z]+[0-9]*".to_owned(),
                message: None,
            }],
            length: vec![Range { lo: 2, hi: 8 }],
        };
        assert!(typ.check("eth0").is_ok());
        assert!(typ.check("ETH0").is_err());
        assert_eq!(
            typ.check("e").unwrap_err(),
            "Must be between 2 and 8 characters"
        );
    }

    #[test]
    fn union_fallthrough() {
        let typ = DataType::Union {
            types: vec![DataType::uint(16), DataType::enumeration(["auto"])],
        };
        assert!(typ.check("42").is_ok());
        assert!(typ.check("auto").is_ok());
        assert!(typ.check("fast").is_err());
    }

    #[test]
    fn placeholders() {
        assert_eq!(DataType::string().placeholder(), "<text>");
        assert_eq!(DataType::uint(16).placeholder(), "<0..65535>");
        assert_eq!(
            DataType::uint_range(32, 68, 9000).placeholder(),
            "<68..9000>"
        );
    }
}
