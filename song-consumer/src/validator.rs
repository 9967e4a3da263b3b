use serde_json::Value;
use tracing::debug;

use crate::{
    errors::ValidationError,
    metrics_consts::FIELDS_DEFAULTED,
    types::{RawMessage, SongRecord},
};

/// Outcome of coercing one field. A field that cannot be coerced falls back to
/// its default instead of failing the whole record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Coerced<T> {
    Value(T),
    Defaulted,
}

impl<T> Coerced<T> {
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Coerced::Value(v) => v,
            Coerced::Defaulted => default,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Coerced::Defaulted)
    }
}

/// Decodes a raw payload into an untyped json value. Only structural problems
/// (no payload, not json at all) are errors here.
pub fn decode(payload: Option<&[u8]>) -> Result<RawMessage, ValidationError> {
    match payload {
        None | Some([]) => Err(ValidationError::EmptyPayload),
        Some(bytes) => Ok(serde_json::from_slice(bytes)?),
    }
}

pub fn validate(raw: &RawMessage) -> Result<SongRecord, ValidationError> {
    debug!(message = %raw, "validating message");

    let Value::Object(fields) = raw else {
        return Err(ValidationError::NotAMapping(kind_of(raw)));
    };

    let duration = coerce_int(fields.get("duration_seconds")).non_negative();
    let year = coerce_int(fields.get("release_year"));
    let sentiment = coerce_float(fields.get("sentiment"));

    for (name, defaulted) in [
        ("duration_seconds", duration.is_defaulted()),
        ("release_year", year.is_defaulted()),
        ("sentiment", sentiment.is_defaulted()),
    ] {
        if defaulted {
            debug!(field = name, "field missing or not coercible, using default");
            metrics::counter!(FIELDS_DEFAULTED, &[("field", name)]).increment(1);
        }
    }

    let record = SongRecord {
        title: coerce_text(fields.get("title")),
        artist: coerce_text(fields.get("artist")),
        genre: coerce_text(fields.get("genre")),
        duration_seconds: duration.unwrap_or(0),
        release_year: year.unwrap_or(0),
        sentiment: sentiment.unwrap_or(0.0),
    };
    debug!(?record, "validated message");

    Ok(record)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn coerce_int(value: Option<&Value>) -> Coerced<i64> {
    let Some(value) = value else {
        return Coerced::Defaulted;
    };

    let coerced = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_float)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    };

    coerced.map_or(Coerced::Defaulted, Coerced::Value)
}

fn coerce_float(value: Option<&Value>) -> Coerced<f64> {
    let Some(value) = value else {
        return Coerced::Defaulted;
    };

    let coerced = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    };

    match coerced {
        Some(f) if f.is_finite() => Coerced::Value(f),
        _ => Coerced::Defaulted,
    }
}

// Floats truncate toward zero, as long as the result fits
fn truncate_float(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

impl Coerced<i64> {
    fn non_negative(self) -> Coerced<i64> {
        match self {
            Coerced::Value(v) if v >= 0 => Coerced::Value(v),
            _ => Coerced::Defaulted,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn validates_a_well_formed_message() {
        let raw = json!({
            "title": "Bohemian Rhapsody",
            "artist": "Queen",
            "genre": "Rock",
            "duration_seconds": 354,
            "release_year": 1975,
            "sentiment": 0.92
        });

        let record = validate(&raw).unwrap();

        assert_eq!(record.title.as_deref(), Some("Bohemian Rhapsody"));
        assert_eq!(record.artist.as_deref(), Some("Queen"));
        assert_eq!(record.genre.as_deref(), Some("Rock"));
        assert_eq!(record.duration_seconds, 354);
        assert_eq!(record.release_year, 1975);
        assert_eq!(record.sentiment, 0.92);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let record = validate(&json!({})).unwrap();

        assert_eq!(record.title, None);
        assert_eq!(record.artist, None);
        assert_eq!(record.genre, None);
        assert_eq!(record.duration_seconds, 0);
        assert_eq!(record.release_year, 0);
        assert_eq!(record.sentiment, 0.0);
    }

    #[test]
    fn non_coercible_numbers_are_defaulted_not_rejected() {
        let raw = json!({
            "title": "Imagine",
            "duration_seconds": "three minutes",
            "release_year": [1971],
            "sentiment": {"score": 0.4}
        });

        let record = validate(&raw).unwrap();

        assert_eq!(record.title.as_deref(), Some("Imagine"));
        assert_eq!(record.duration_seconds, 0);
        assert_eq!(record.release_year, 0);
        assert_eq!(record.sentiment, 0.0);
    }

    #[test]
    fn null_numbers_are_defaulted() {
        let raw = json!({"duration_seconds": null, "release_year": null, "sentiment": null});

        let record = validate(&raw).unwrap();

        assert_eq!(record.duration_seconds, 0);
        assert_eq!(record.release_year, 0);
        assert_eq!(record.sentiment, 0.0);
    }

    #[test]
    fn numeric_strings_floats_and_bools_are_coerced() {
        let raw = json!({
            "duration_seconds": " 241 ",
            "release_year": 1991.9,
            "sentiment": "-0.25"
        });

        let record = validate(&raw).unwrap();

        assert_eq!(record.duration_seconds, 241);
        assert_eq!(record.release_year, 1991);
        assert_eq!(record.sentiment, -0.25);

        let record = validate(&json!({"release_year": true, "sentiment": false})).unwrap();
        assert_eq!(record.release_year, 1);
        assert_eq!(record.sentiment, 0.0);
    }

    #[test]
    fn negative_duration_and_non_finite_sentiment_are_defaulted() {
        let raw = json!({
            "duration_seconds": -30,
            "release_year": -500,
            "sentiment": "NaN"
        });

        let record = validate(&raw).unwrap();

        assert_eq!(record.duration_seconds, 0);
        // Years are not range checked
        assert_eq!(record.release_year, -500);
        assert_eq!(record.sentiment, 0.0);
    }

    #[test]
    fn out_of_range_integers_are_defaulted() {
        let raw = json!({"duration_seconds": u64::MAX, "release_year": 1e300});

        let record = validate(&raw).unwrap();

        assert_eq!(record.duration_seconds, 0);
        assert_eq!(record.release_year, 0);
    }

    #[test]
    fn scalar_text_fields_are_stringified_and_compound_ones_dropped() {
        let raw = json!({"title": 1999, "artist": ["Prince"], "genre": true});

        let record = validate(&raw).unwrap();

        assert_eq!(record.title.as_deref(), Some("1999"));
        assert_eq!(record.artist, None);
        assert_eq!(record.genre.as_deref(), Some("true"));
    }

    #[test]
    fn non_mappings_are_rejected() {
        for raw in [
            json!(null),
            json!(42),
            json!("Hotel California"),
            json!([{"title": "Imagine"}]),
        ] {
            match validate(&raw) {
                Err(ValidationError::NotAMapping(_)) => {}
                other => panic!("Expected NotAMapping for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn decode_rejects_structurally_invalid_payloads() {
        assert!(matches!(decode(None), Err(ValidationError::EmptyPayload)));
        assert!(matches!(decode(Some(&b""[..])), Err(ValidationError::EmptyPayload)));
        assert!(matches!(
            decode(Some(&b"{\"title\": "[..])),
            Err(ValidationError::Undecodable(_))
        ));
        assert!(matches!(
            decode(Some(&[0xff_u8, 0xfe, 0x00][..])),
            Err(ValidationError::Undecodable(_))
        ));

        let raw = decode(Some(&br#"{"title": "Imagine"}"#[..])).unwrap();
        assert_eq!(raw, serde_json::json!({"title": "Imagine"}));
    }
}
