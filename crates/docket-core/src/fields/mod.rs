//! Extracted-field shaping.
//!
//! The extraction provider returns fields in a handful of shapes depending
//! on model version and field kind. This module collapses them into a
//! uniform tagged value so downstream naming and summary code never touch
//! provider JSON. The transformation is pure and deterministic.

mod date;

use std::collections::BTreeMap;

pub use date::normalize_date;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved key carrying the overall extraction confidence.
pub const CONFIDENCE_KEY: &str = "_confidence";

/// Keys a scalar value may hide under in provider output, probed in order.
const VALUE_KEYS: [&str; 7] = [
    "value",
    "content",
    "text",
    "valueString",
    "valueDate",
    "valueData",
    "date",
];

/// A single extracted field in uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Free text, trimmed and de-quoted.
    Scalar(String),
    /// A selection mark (checkbox).
    Selection(bool),
    /// A signature field.
    Signature(bool),
    /// A date already normalized to `YYYY-MM-DD`.
    Date(String),
}

impl FieldValue {
    /// The user-facing rendering used in summaries and file names.
    pub fn display(&self) -> &str {
        match self {
            Self::Scalar(s) | Self::Date(s) => s,
            Self::Selection(true) => "Yes",
            Self::Selection(false) => "No",
            Self::Signature(true) => "Signed",
            Self::Signature(false) => "Not Signed",
        }
    }

    /// Returns the scalar content, if any.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) | Self::Date(s) => Some(s),
            _ => None,
        }
    }
}

/// Collapses a provider `fields` object into uniform values.
///
/// Unknown shapes are skipped rather than failing the job: a field the
/// normalizer cannot read is simply absent from naming and summaries.
pub fn normalize_fields(raw: &Value) -> BTreeMap<String, FieldValue> {
    let mut out = BTreeMap::new();

    let Some(map) = raw.as_object() else {
        return out;
    };

    for (name, value) in map {
        if name == CONFIDENCE_KEY {
            continue;
        }
        if let Some(normalized) = normalize_value(value) {
            out.insert(name.clone(), normalized);
        }
    }

    out
}

/// Normalizes one provider field value.
pub fn normalize_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::String(s) => Some(FieldValue::Scalar(clean_scalar(s))),
        Value::Number(n) => Some(FieldValue::Scalar(n.to_string())),
        Value::Bool(b) => Some(FieldValue::Scalar(b.to_string())),
        // Arrays yield their first element.
        Value::Array(items) => items.first().and_then(normalize_value),
        Value::Object(obj) => normalize_object(obj),
        Value::Null => None,
    }
}

fn normalize_object(obj: &serde_json::Map<String, Value>) -> Option<FieldValue> {
    match obj.get("kind").and_then(Value::as_str) {
        Some("selectionMark") => {
            let state = obj.get("state").and_then(Value::as_str).unwrap_or_default();
            return Some(FieldValue::Selection(state.eq_ignore_ascii_case("selected")));
        }
        Some("signature") => {
            let state = obj.get("state").and_then(Value::as_str).unwrap_or_default();
            return Some(FieldValue::Signature(state.eq_ignore_ascii_case("signed")));
        }
        _ => {}
    }

    for key in VALUE_KEYS {
        if let Some(inner) = obj.get(key) {
            let normalized = normalize_value(inner)?;
            // Values sourced from date-designated keys normalize as dates
            // when they parse; otherwise the literal passes through.
            if matches!(key, "valueDate" | "date")
                && let FieldValue::Scalar(ref s) = normalized
                && let Some(iso) = normalize_date(s)
            {
                return Some(FieldValue::Date(iso));
            }
            return Some(normalized);
        }
    }

    None
}

/// Trims whitespace and strips one matching pair of surrounding quotes.
fn clean_scalar(s: &str) -> String {
    let trimmed = s.trim();
    let dequoted = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .unwrap_or(trimmed);
    dequoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scalar_shapes_collapse() {
        let raw = json!({
            "Company Name": "Acme Hauling",
            "Ticket Number": { "value": "T-1009" },
            "Material": { "content": "  Gravel  " },
            "Notes": { "text": "'quoted'" },
            "Quantity": { "valueString": "14.5" },
            "Total": 120.5,
        });
        let fields = normalize_fields(&raw);

        assert_eq!(fields["Company Name"], FieldValue::Scalar("Acme Hauling".into()));
        assert_eq!(fields["Ticket Number"], FieldValue::Scalar("T-1009".into()));
        assert_eq!(fields["Material"], FieldValue::Scalar("Gravel".into()));
        assert_eq!(fields["Notes"], FieldValue::Scalar("quoted".into()));
        assert_eq!(fields["Quantity"], FieldValue::Scalar("14.5".into()));
        assert_eq!(fields["Total"], FieldValue::Scalar("120.5".into()));
    }

    #[test]
    fn arrays_yield_first_element() {
        let raw = json!({ "Driver Name": [{ "value": "J. Mills" }, "ignored"] });
        let fields = normalize_fields(&raw);
        assert_eq!(fields["Driver Name"], FieldValue::Scalar("J. Mills".into()));
    }

    #[test]
    fn selection_marks_map_to_yes_no() {
        let raw = json!({
            "Prevailing Wage": { "kind": "selectionMark", "state": "selected" },
            "Night Work": { "kind": "selectionMark", "state": "unselected" },
        });
        let fields = normalize_fields(&raw);
        assert_eq!(fields["Prevailing Wage"].display(), "Yes");
        assert_eq!(fields["Night Work"].display(), "No");
    }

    #[test]
    fn signatures_map_to_signed() {
        let raw = json!({
            "Driver Signature": { "kind": "signature", "state": "signed" },
            "Customer Signature": { "kind": "signature", "state": "unsigned" },
        });
        let fields = normalize_fields(&raw);
        assert_eq!(fields["Driver Signature"].display(), "Signed");
        assert_eq!(fields["Customer Signature"].display(), "Not Signed");
    }

    #[test]
    fn date_keys_normalize_when_parseable() {
        let raw = json!({
            "Date": { "valueDate": "06/05/2025" },
            "Delivery Date": { "date": "garbage" },
        });
        let fields = normalize_fields(&raw);
        assert_eq!(fields["Date"], FieldValue::Date("2025-06-05".into()));
        // Unparseable literals pass through for display.
        assert_eq!(fields["Delivery Date"], FieldValue::Scalar("garbage".into()));
    }

    #[test]
    fn confidence_key_is_not_a_field() {
        let raw = json!({ "_confidence": 0.97, "Ticket Number": "1" });
        let fields = normalize_fields(&raw);
        assert!(!fields.contains_key(CONFIDENCE_KEY));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn normalization_is_idempotent_on_display() {
        let raw = json!({ "Flag": { "kind": "selectionMark", "state": "selected" } });
        let fields = normalize_fields(&raw);
        let rendered = fields["Flag"].display().to_string();
        // Re-normalizing the rendered string leaves it unchanged.
        let again = normalize_value(&Value::String(rendered.clone())).unwrap();
        assert_eq!(again.display(), rendered);
    }
}
