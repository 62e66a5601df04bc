use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;

use crate::controllers::paste::NewPaste;
use crate::error::ValidationError;
use crate::models::Paste;

/// Body of `POST /api/pastes`.
///
/// Parsed by hand from a JSON value so that a bad field is reported by name
/// instead of as a generic deserialization failure.
pub fn parse_new_paste(body: &Value) -> Result<NewPaste, ValidationError> {
    let fields = body.as_object().ok_or(ValidationError::InvalidBody)?;

    let content = match fields.get("content") {
        None | Some(Value::Null) => return Err(ValidationError::EmptyContent),
        Some(Value::String(content)) => content.clone(),
        Some(_) => return Err(ValidationError::WrongType { field: "content" }),
    };

    let ttl_seconds = optional_integer(fields.get("ttl_seconds"), ValidationError::InvalidTtl)?;
    let max_views = optional_integer(fields.get("max_views"), ValidationError::InvalidMaxViews)?;

    Ok(NewPaste {
        content,
        ttl_seconds,
        max_views,
    })
}

fn optional_integer(
    value: Option<&Value>,
    invalid: ValidationError,
) -> Result<Option<i64>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => integer(value).map(Some).ok_or(invalid),
    }
}

/// JSON numbers like `60` and `60.0` are both integers.
fn integer(value: &Value) -> Option<i64> {
    const MAX_EXACT: f64 = 9_007_199_254_740_991.0;

    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT)
            .map(|f| f as i64)
    })
}

#[derive(Debug, Serialize)]
pub struct CreatedPaste {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PasteView {
    pub content: String,
    pub remaining_views: Option<i64>,
    pub expires_at: Option<String>,
}

impl From<Paste> for PasteView {
    fn from(paste: Paste) -> Self {
        PasteView {
            content: paste.content,
            remaining_views: paste.remaining_views,
            expires_at: paste
                .expires_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_full_body() {
        let new = parse_new_paste(&json!({"content": "hi", "ttl_seconds": 60, "max_views": 2}))
            .unwrap();
        assert_eq!(new, NewPaste::new("hi").ttl_seconds(60).max_views(2));
    }

    #[test]
    fn nulls_count_as_absent() {
        let new = parse_new_paste(&json!({"content": "hi", "ttl_seconds": null})).unwrap();
        assert_eq!(new, NewPaste::new("hi"));
    }

    #[test]
    fn whole_floats_are_integers() {
        let new = parse_new_paste(&json!({"content": "hi", "max_views": 3.0})).unwrap();
        assert_eq!(new.max_views, Some(3));
    }

    #[test]
    fn bad_fields_are_named() {
        let cases = [
            (json!("just a string"), "body"),
            (json!({}), "content"),
            (json!({"content": 5}), "content"),
            (json!({"content": "a", "ttl_seconds": "60"}), "ttl_seconds"),
            (json!({"content": "a", "ttl_seconds": 1.5}), "ttl_seconds"),
            (json!({"content": "a", "max_views": true}), "max_views"),
        ];
        for (body, field) in cases {
            let err = parse_new_paste(&body).unwrap_err();
            assert_eq!(err.field(), field, "{body}");
        }
    }

    #[test]
    fn range_checks_are_left_to_the_engine() {
        let new = parse_new_paste(&json!({"content": "", "ttl_seconds": 0})).unwrap();
        assert_eq!(new.ttl_seconds, Some(0));
    }

    #[test]
    fn view_formats_expiry_with_millis() {
        let at = crate::clock::Clock::from_millis(1_700_000_060_000).unwrap().now();
        let view = PasteView::from(Paste {
            id: "id".to_owned(),
            content: "x".to_owned(),
            created_at: at,
            expires_at: Some(at),
            max_views: None,
            remaining_views: None,
        });
        assert_eq!(view.expires_at.as_deref(), Some("2023-11-14T22:14:20.000Z"));
    }
}
