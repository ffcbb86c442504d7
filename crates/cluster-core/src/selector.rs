//! W3C Web Annotation selectors.
//!
//! A [`Selector`] addresses a sub-region of a file: a quoted text span, a
//! character range, a media time range, a CSS or XPath node, or a range
//! composed of two other selectors. Candidates arriving as JSON are checked
//! with [`validate`], which bounds `RangeSelector` nesting before
//! deserializing and then applies the per-variant constraints.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults::{MEDIA_FRAGMENTS_URI, SELECTOR_MAX_DEPTH};
use crate::{Error, Result};

static FRAGMENT_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^t=(\d+(?:\.\d+)?),(\d+(?:\.\d+)?)$").expect("valid fragment regex")
});

static CONFORMS_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://\S+$").expect("valid URI regex"));

/// Polymorphic selector, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Selector {
    #[serde(rename = "TextQuoteSelector")]
    TextQuote {
        exact: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suffix: Option<String>,
    },
    /// Character offsets; `end` is exclusive.
    #[serde(rename = "TextPositionSelector")]
    TextPosition { start: u64, end: u64 },
    /// Media time range, `value` is `t=<start>,<end>` in seconds.
    #[serde(rename = "FragmentSelector")]
    Fragment {
        #[serde(rename = "conformsTo")]
        conforms_to: String,
        value: String,
    },
    #[serde(rename = "CssSelector")]
    Css { value: String },
    #[serde(rename = "XPathSelector")]
    XPath { value: String },
    #[serde(rename = "RangeSelector")]
    Range {
        #[serde(rename = "startSelector")]
        start_selector: Box<Selector>,
        #[serde(rename = "endSelector")]
        end_selector: Box<Selector>,
    },
}

/// Discriminant of [`Selector`], stored in `annotation_targets.selector_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorType {
    TextQuoteSelector,
    TextPositionSelector,
    FragmentSelector,
    CssSelector,
    XPathSelector,
    RangeSelector,
}

impl SelectorType {
    pub const ALL: [SelectorType; 6] = [
        SelectorType::TextQuoteSelector,
        SelectorType::TextPositionSelector,
        SelectorType::FragmentSelector,
        SelectorType::CssSelector,
        SelectorType::XPathSelector,
        SelectorType::RangeSelector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorType::TextQuoteSelector => "TextQuoteSelector",
            SelectorType::TextPositionSelector => "TextPositionSelector",
            SelectorType::FragmentSelector => "FragmentSelector",
            SelectorType::CssSelector => "CssSelector",
            SelectorType::XPathSelector => "XPathSelector",
            SelectorType::RangeSelector => "RangeSelector",
        }
    }
}

impl fmt::Display for SelectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SelectorType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid selector type: {}", s))
    }
}

/// Validate a JSON candidate and return the typed selector.
///
/// Nesting depth is checked on the raw JSON first, so deeply nested input is
/// rejected without recursing through the deserializer.
pub fn validate(candidate: &JsonValue) -> Result<Selector> {
    check_json_depth(candidate, 1)?;
    let selector: Selector = serde_json::from_value(candidate.clone())
        .map_err(|e| Error::InvalidInput(format!("malformed selector: {}", e)))?;
    selector.validate()?;
    Ok(selector)
}

fn check_json_depth(value: &JsonValue, depth: usize) -> Result<()> {
    if depth > SELECTOR_MAX_DEPTH {
        return Err(Error::InvalidInput(format!(
            "selector nesting exceeds depth limit of {}",
            SELECTOR_MAX_DEPTH
        )));
    }
    if let Some(obj) = value.as_object() {
        for key in ["startSelector", "endSelector"] {
            if let Some(child) = obj.get(key) {
                check_json_depth(child, depth + 1)?;
            }
        }
    }
    Ok(())
}

impl Selector {
    pub fn selector_type(&self) -> SelectorType {
        match self {
            Selector::TextQuote { .. } => SelectorType::TextQuoteSelector,
            Selector::TextPosition { .. } => SelectorType::TextPositionSelector,
            Selector::Fragment { .. } => SelectorType::FragmentSelector,
            Selector::Css { .. } => SelectorType::CssSelector,
            Selector::XPath { .. } => SelectorType::XPathSelector,
            Selector::Range { .. } => SelectorType::RangeSelector,
        }
    }

    /// Apply the per-variant constraints.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        if depth > SELECTOR_MAX_DEPTH {
            return Err(Error::InvalidInput(format!(
                "selector nesting exceeds depth limit of {}",
                SELECTOR_MAX_DEPTH
            )));
        }
        match self {
            Selector::TextQuote { exact, .. } => {
                if exact.is_empty() {
                    return Err(Error::InvalidInput(
                        "TextQuoteSelector.exact must not be empty".to_string(),
                    ));
                }
            }
            Selector::TextPosition { start, end } => {
                if start > end {
                    return Err(Error::InvalidInput(format!(
                        "TextPositionSelector start {} is after end {}",
                        start, end
                    )));
                }
            }
            Selector::Fragment { conforms_to, value } => {
                if !CONFORMS_TO.is_match(conforms_to) {
                    return Err(Error::InvalidInput(format!(
                        "FragmentSelector.conformsTo is not a URI: {}",
                        conforms_to
                    )));
                }
                let (start, end) = parse_time_fragment(value)?;
                if start > end {
                    return Err(Error::InvalidInput(format!(
                        "FragmentSelector start {} is after end {}",
                        start, end
                    )));
                }
            }
            Selector::Css { value } | Selector::XPath { value } => {
                if value.trim().is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "{}.value must not be empty",
                        self.selector_type()
                    )));
                }
            }
            Selector::Range {
                start_selector,
                end_selector,
            } => {
                start_selector.validate_at(depth + 1)?;
                end_selector.validate_at(depth + 1)?;
            }
        }
        Ok(())
    }

    /// Build a media fragment for a time range, ordering the bounds and
    /// rounding to milliseconds.
    pub fn media_fragment(start: f64, end: f64) -> Result<Selector> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < 0.0 {
            return Err(Error::InvalidInput(format!(
                "media time range must be non-negative: {}..{}",
                start, end
            )));
        }
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        Ok(Selector::Fragment {
            conforms_to: MEDIA_FRAGMENTS_URI.to_string(),
            value: format!("t={:.3},{:.3}", lo, hi),
        })
    }

    /// Time range in seconds for fragment selectors.
    pub fn time_range(&self) -> Option<(f64, f64)> {
        match self {
            Selector::Fragment { value, .. } => parse_time_fragment(value).ok(),
            _ => None,
        }
    }

    /// Quoted text, for text quote selectors.
    pub fn exact_text(&self) -> Option<&str> {
        match self {
            Selector::TextQuote { exact, .. } => Some(exact.as_str()),
            _ => None,
        }
    }

    /// Depth of this selector tree (1 for a leaf).
    pub fn depth(&self) -> usize {
        match self {
            Selector::Range {
                start_selector,
                end_selector,
            } => 1 + start_selector.depth().max(end_selector.depth()),
            _ => 1,
        }
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Parse `t=<start>,<end>` into seconds.
pub fn parse_time_fragment(value: &str) -> Result<(f64, f64)> {
    let caps = FRAGMENT_TIME.captures(value).ok_or_else(|| {
        Error::InvalidInput(format!(
            "FragmentSelector.value must match t=<start>,<end>: {}",
            value
        ))
    })?;
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| Error::InvalidInput(format!("invalid time value: {}", s)))
    };
    Ok((parse(&caps[1])?, parse(&caps[2])?))
}

/// Round seconds to millisecond precision.
pub fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested_range(depth: usize) -> JsonValue {
        let mut value = json!({"type": "TextQuoteSelector", "exact": "leaf"});
        for _ in 1..depth {
            value = json!({
                "type": "RangeSelector",
                "startSelector": value,
                "endSelector": {"type": "TextPositionSelector", "start": 0, "end": 1}
            });
        }
        value
    }

    #[test]
    fn test_text_quote_accepted() {
        let sel = validate(&json!({"type": "TextQuoteSelector", "exact": "hello"})).unwrap();
        assert_eq!(sel.selector_type(), SelectorType::TextQuoteSelector);
        assert_eq!(sel.exact_text(), Some("hello"));
    }

    #[test]
    fn test_text_quote_empty_exact_rejected() {
        let err = validate(&json!({"type": "TextQuoteSelector", "exact": ""})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_text_position_start_after_end_rejected() {
        let err = validate(&json!({"type": "TextPositionSelector", "start": 10, "end": 5}))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_text_position_negative_rejected() {
        assert!(validate(&json!({"type": "TextPositionSelector", "start": -1, "end": 5})).is_err());
    }

    #[test]
    fn test_fragment_reversed_range_rejected() {
        let err = validate(&json!({
            "type": "FragmentSelector",
            "conformsTo": MEDIA_FRAGMENTS_URI,
            "value": "t=5.000,2.000"
        }))
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_fragment_malformed_value_rejected() {
        for value in ["5,10", "t=abc,10", "t=5", "t=5,10,15"] {
            let candidate = json!({
                "type": "FragmentSelector",
                "conformsTo": MEDIA_FRAGMENTS_URI,
                "value": value
            });
            assert!(validate(&candidate).is_err(), "{} should be rejected", value);
        }
    }

    #[test]
    fn test_fragment_conforms_to_must_be_uri() {
        let candidate = json!({
            "type": "FragmentSelector",
            "conformsTo": "media frags",
            "value": "t=1,2"
        });
        assert!(validate(&candidate).is_err());
    }

    #[test]
    fn test_fragment_time_range() {
        let sel = validate(&json!({
            "type": "FragmentSelector",
            "conformsTo": MEDIA_FRAGMENTS_URI,
            "value": "t=1.5,12.250"
        }))
        .unwrap();
        assert_eq!(sel.time_range(), Some((1.5, 12.25)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(validate(&json!({"type": "SvgSelector", "value": "<svg/>"})).is_err());
        assert!(validate(&json!({"exact": "no tag"})).is_err());
    }

    #[test]
    fn test_range_within_depth_limit() {
        let sel = validate(&nested_range(SELECTOR_MAX_DEPTH)).unwrap();
        assert_eq!(sel.depth(), SELECTOR_MAX_DEPTH);
    }

    #[test]
    fn test_range_beyond_depth_limit_rejected() {
        let err = validate(&nested_range(SELECTOR_MAX_DEPTH + 1)).unwrap_err();
        assert!(err.to_string().contains("depth limit"));
    }

    #[test]
    fn test_range_children_validated() {
        let candidate = json!({
            "type": "RangeSelector",
            "startSelector": {"type": "TextPositionSelector", "start": 9, "end": 3},
            "endSelector": {"type": "CssSelector", "value": "#p2"}
        });
        assert!(validate(&candidate).is_err());
    }

    #[test]
    fn test_media_fragment_orders_and_rounds() {
        let sel = Selector::media_fragment(12.3456, 3.0).unwrap();
        assert_eq!(
            sel,
            Selector::Fragment {
                conforms_to: MEDIA_FRAGMENTS_URI.to_string(),
                value: "t=3.000,12.346".to_string(),
            }
        );
        assert!(sel.validate().is_ok());
        assert!(Selector::media_fragment(-1.0, 2.0).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let sel = Selector::Range {
            start_selector: Box::new(Selector::Css { value: "#a".into() }),
            end_selector: Box::new(Selector::XPath { value: "/p[2]".into() }),
        };
        let json = sel.to_json().unwrap();
        assert_eq!(json["type"], "RangeSelector");
        assert_eq!(json["startSelector"]["type"], "CssSelector");
        assert_eq!(json["endSelector"]["value"], "/p[2]");
    }

    #[test]
    fn test_selector_type_from_str() {
        for t in SelectorType::ALL {
            assert_eq!(t.as_str().parse::<SelectorType>().unwrap(), t);
        }
        assert!("Bogus".parse::<SelectorType>().is_err());
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(1.23456), 1.235);
        assert_eq!(round_millis(2.0), 2.0);
    }
}
