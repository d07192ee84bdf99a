//! Selector codec: bidirectional mapping between compact wire-selector
//! encodings and structured catcha selectors, per media kind.
//!
//! Pure and stateless. Covers:
//!
//! - Image fragments `xywh=<x>,<y>,<w>,<h>`
//! - Time-range fragments `t=<start>,<end>` with a CSS `refinedBy` selector
//! - Text range selectors (xpath pair + offsets) and quote selectors
//! - SVG path selectors (passed through opaquely)
//!
//! Malformed fragment strings (wrong token count) are a hard conversion
//! failure, never a silent default.

use serde_json::{json, Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Selector type names
// ---------------------------------------------------------------------------

pub const FRAGMENT_SELECTOR: &str = "FragmentSelector";
pub const SVG_SELECTOR: &str = "SvgSelector";
pub const RANGE_SELECTOR: &str = "RangeSelector";
pub const TEXT_QUOTE_SELECTOR: &str = "TextQuoteSelector";
pub const TEXT_POSITION_SELECTOR: &str = "TextPositionSelector";
pub const XPATH_SELECTOR: &str = "XPathSelector";
pub const CSS_SELECTOR: &str = "CssSelector";
pub const VIEWPORT_SCOPE: &str = "Viewport";

/// `conformsTo` value for media-fragment selectors.
pub const MEDIA_FRAGS_SPEC: &str = "http://www.w3.org/TR/media-frags/";

// ---------------------------------------------------------------------------
// Numeric sniffing
// ---------------------------------------------------------------------------

/// Decode a string as a number if possible: integer first, then float,
/// else the original string unchanged. The empty string stays a string.
///
/// This rule is load-bearing for time-range decoding; clients send both
/// `"t=10,20"` and `"t=1.5,stop"` style fragments.
pub fn string_to_number(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return json!(f);
    }
    Value::String(s.to_string())
}

/// Render a JSON scalar back to its fragment-string form.
pub fn value_to_fragment_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Image fragments (xywh)
// ---------------------------------------------------------------------------

/// Encode a legacy `{x, y, width, height}` object as `xywh=x,y,w,h`.
///
/// Values may arrive as numbers or strings; both are accepted. A missing
/// key is a hard conversion failure naming the key.
pub fn encode_xywh(position: &Map<String, Value>) -> Result<String, CoreError> {
    let mut parts = Vec::with_capacity(4);
    for key in ["x", "y", "width", "height"] {
        let value = position.get(key).ok_or_else(|| {
            CoreError::Validation(format!("image position is missing key '{key}'"))
        })?;
        parts.push(value_to_fragment_string(value));
    }
    Ok(format!("xywh={}", parts.join(",")))
}

/// Decode an `xywh=x,y,w,h` fragment into a `{x, y, width, height}` object
/// with stringified values.
///
/// A fragment with the wrong token count is a hard conversion failure.
pub fn decode_xywh(fragment: &str) -> Result<Value, CoreError> {
    let value = fragment.strip_prefix("xywh=").ok_or_else(|| {
        CoreError::Validation(format!("malformed xywh fragment '{fragment}'"))
    })?;
    let tokens: Vec<&str> = value.split(',').collect();
    if tokens.len() != 4 {
        return Err(CoreError::Validation(format!(
            "xywh fragment '{fragment}' has {} tokens, expected 4",
            tokens.len()
        )));
    }
    Ok(json!({
        "x": tokens[0],
        "y": tokens[1],
        "width": tokens[2],
        "height": tokens[3],
    }))
}

// ---------------------------------------------------------------------------
// Time-range fragments (t=start,end)
// ---------------------------------------------------------------------------

/// Encode a start/end pair as a `t=start,end` fragment.
pub fn encode_time_fragment(start: &Value, end: &Value) -> String {
    format!(
        "t={},{}",
        value_to_fragment_string(start),
        value_to_fragment_string(end)
    )
}

/// Decode a `t=start,end` fragment. Start and end are decoded with
/// [`string_to_number`], so numeric values come back as numbers and
/// anything else stays a string.
pub fn decode_time_fragment(fragment: &str) -> Result<(Value, Value), CoreError> {
    let value = fragment.strip_prefix("t=").ok_or_else(|| {
        CoreError::Validation(format!("malformed time fragment '{fragment}'"))
    })?;
    let tokens: Vec<&str> = value.split(',').collect();
    if tokens.len() != 2 {
        return Err(CoreError::Validation(format!(
            "time fragment '{fragment}' has {} tokens, expected 2",
            tokens.len()
        )));
    }
    Ok((string_to_number(tokens[0]), string_to_number(tokens[1])))
}

// ---------------------------------------------------------------------------
// Structured selector builders
// ---------------------------------------------------------------------------

/// Build a `FragmentSelector` for an image region.
pub fn fragment_selector(value: &str) -> Value {
    json!({
        "type": FRAGMENT_SELECTOR,
        "conformsTo": MEDIA_FRAGS_SPEC,
        "value": value,
    })
}

/// Build a `FragmentSelector` for a time range, refined by a CSS selector
/// naming the media container element.
pub fn time_fragment_selector(start: &Value, end: &Value, container: &str) -> Value {
    json!({
        "type": FRAGMENT_SELECTOR,
        "conformsTo": MEDIA_FRAGS_SPEC,
        "value": encode_time_fragment(start, end),
        "refinedBy": [{
            "type": CSS_SELECTOR,
            "value": format!("#{container}"),
        }],
    })
}

/// Build an `SvgSelector` around an opaque SVG path value.
pub fn svg_selector(value: &Value) -> Value {
    json!({
        "type": SVG_SELECTOR,
        "value": value,
    })
}

/// Build a `RangeSelector` from a legacy AnnotatorJS range tuple
/// `{start, end, startOffset, endOffset}`.
pub fn range_selector(range: &Map<String, Value>) -> Result<Value, CoreError> {
    let get = |key: &str| -> Result<&Value, CoreError> {
        range
            .get(key)
            .ok_or_else(|| CoreError::Validation(format!("text range is missing key '{key}'")))
    };
    Ok(json!({
        "type": RANGE_SELECTOR,
        "startSelector": { "type": XPATH_SELECTOR, "value": get("start")? },
        "endSelector": { "type": XPATH_SELECTOR, "value": get("end")? },
        "refinedBy": [{
            "type": TEXT_POSITION_SELECTOR,
            "start": get("startOffset")?,
            "end": get("endOffset")?,
        }],
    }))
}

/// Build a `TextQuoteSelector` around an exact-quote string.
pub fn text_quote_selector(exact: &str) -> Value {
    json!({
        "type": TEXT_QUOTE_SELECTOR,
        "exact": exact,
    })
}

/// Build a `Viewport` scope from a legacy bounds object, or `None` when the
/// bounds are malformed (bounds are advisory; a bad one is dropped, not
/// an error).
pub fn viewport_scope(bounds: &Value) -> Option<Value> {
    let obj = bounds.as_object()?;
    let fragment = encode_xywh(obj).ok()?;
    Some(json!({
        "type": VIEWPORT_SCOPE,
        "value": fragment,
    }))
}

// ---------------------------------------------------------------------------
// Structured selector decoders
// ---------------------------------------------------------------------------

/// Decode one image selector item back to its legacy `rangePosition` form:
/// fragment selectors become `{x, y, width, height}` objects, SVG selectors
/// become their bare value, and anything else tagged passes through as-is.
pub fn decode_image_selector_item(item: &Value) -> Result<Value, CoreError> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Validation("image selector item has no 'type'".into()))?;
    match kind {
        FRAGMENT_SELECTOR => {
            let value = item.get("value").and_then(Value::as_str).ok_or_else(|| {
                CoreError::Validation("fragment selector has no 'value'".into())
            })?;
            decode_xywh(value)
        }
        SVG_SELECTOR => item
            .get("value")
            .cloned()
            .ok_or_else(|| CoreError::Validation("svg selector has no 'value'".into())),
        _ => Ok(item.clone()),
    }
}

/// Decode a time-range fragment selector into `(rangeTime, container)`.
/// The container comes from the first CSS `refinedBy` entry with its `#`
/// prefix stripped.
pub fn decode_time_selector_item(item: &Value) -> Result<(Value, String), CoreError> {
    let value = item
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::Validation("time selector has no 'value'".into()))?;
    let (start, end) = decode_time_fragment(value)?;

    let container = item
        .get("refinedBy")
        .and_then(Value::as_array)
        .and_then(|refs| refs.first())
        .and_then(|r| r.get("value"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CoreError::Validation("time selector has no refinedBy container".into())
        })?;

    Ok((
        json!({ "start": start, "end": end }),
        container.trim_start_matches('#').to_string(),
    ))
}

/// Decode a `RangeSelector` back to a legacy range tuple.
pub fn decode_range_selector_item(item: &Value) -> Result<Value, CoreError> {
    let xpath = |key: &str| -> Result<Value, CoreError> {
        item.get(key)
            .and_then(|s| s.get("value"))
            .cloned()
            .ok_or_else(|| {
                CoreError::Validation(format!("range selector is missing '{key}.value'"))
            })
    };
    let position = item
        .get("refinedBy")
        .and_then(Value::as_array)
        .and_then(|refs| refs.first())
        .ok_or_else(|| {
            CoreError::Validation("range selector has no refinedBy position".into())
        })?;
    let offset = |key: &str| -> Result<Value, CoreError> {
        position.get(key).cloned().ok_or_else(|| {
            CoreError::Validation(format!("range selector position is missing '{key}'"))
        })
    };
    Ok(json!({
        "start": xpath("startSelector")?,
        "end": xpath("endSelector")?,
        "startOffset": offset("start")?,
        "endOffset": offset("end")?,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- string_to_number ---------------------------------------------------

    #[test]
    fn sniff_integer() {
        assert_eq!(string_to_number("42"), json!(42));
    }

    #[test]
    fn sniff_float() {
        assert_eq!(string_to_number("4.2"), json!(4.2));
    }

    #[test]
    fn sniff_non_numeric_unchanged() {
        assert_eq!(string_to_number("abc"), json!("abc"));
    }

    #[test]
    fn sniff_empty_stays_string() {
        assert_eq!(string_to_number(""), json!(""));
    }

    #[test]
    fn sniff_negative_integer() {
        assert_eq!(string_to_number("-7"), json!(-7));
    }

    // -- xywh codec ---------------------------------------------------------

    #[test]
    fn xywh_encode_then_decode_recovers_strings() {
        for (x, y, w, h) in [(0u32, 0, 1, 1), (10, 20, 300, 4000), (7, 0, 0, 9)] {
            let position = json!({ "x": x, "y": y, "width": w, "height": h });
            let fragment = encode_xywh(position.as_object().unwrap()).unwrap();
            let decoded = decode_xywh(&fragment).unwrap();
            assert_eq!(decoded["x"], json!(x.to_string()));
            assert_eq!(decoded["y"], json!(y.to_string()));
            assert_eq!(decoded["width"], json!(w.to_string()));
            assert_eq!(decoded["height"], json!(h.to_string()));
        }
    }

    #[test]
    fn xywh_string_values_accepted() {
        let position = json!({ "x": "1", "y": "2", "width": "3", "height": "4" });
        let fragment = encode_xywh(position.as_object().unwrap()).unwrap();
        assert_eq!(fragment, "xywh=1,2,3,4");
    }

    #[test]
    fn xywh_missing_key_rejected() {
        let position = json!({ "x": 1, "y": 2, "width": 3 });
        let err = encode_xywh(position.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("height"));
    }

    #[test]
    fn xywh_wrong_token_count_rejected() {
        let err = decode_xywh("xywh=1,2,3").unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn xywh_missing_prefix_rejected() {
        assert!(decode_xywh("1,2,3,4").is_err());
    }

    // -- time fragment codec ------------------------------------------------

    #[test]
    fn time_fragment_numeric_round_trip() {
        let (start, end) = decode_time_fragment("t=10,25").unwrap();
        assert_eq!(start, json!(10));
        assert_eq!(end, json!(25));
        assert_eq!(encode_time_fragment(&start, &end), "t=10,25");
    }

    #[test]
    fn time_fragment_float_decoded() {
        let (start, end) = decode_time_fragment("t=1.5,2.25").unwrap();
        assert_eq!(start, json!(1.5));
        assert_eq!(end, json!(2.25));
    }

    #[test]
    fn time_fragment_non_numeric_stays_string() {
        let (start, end) = decode_time_fragment("t=intro,").unwrap();
        assert_eq!(start, json!("intro"));
        assert_eq!(end, json!(""));
    }

    #[test]
    fn time_fragment_wrong_token_count_rejected() {
        assert!(decode_time_fragment("t=1,2,3").is_err());
        assert!(decode_time_fragment("t=1").is_err());
    }

    // -- structured selectors -----------------------------------------------

    #[test]
    fn range_selector_round_trip() {
        let range = json!({
            "start": "/div[1]/p[2]",
            "end": "/div[1]/p[3]",
            "startOffset": 12,
            "endOffset": 130,
        });
        let selector = range_selector(range.as_object().unwrap()).unwrap();
        assert_eq!(selector["type"], json!(RANGE_SELECTOR));
        let decoded = decode_range_selector_item(&selector).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn range_selector_missing_offset_rejected() {
        let range = json!({ "start": "/p[1]", "end": "/p[2]", "startOffset": 0 });
        assert!(range_selector(range.as_object().unwrap()).is_err());
    }

    #[test]
    fn time_selector_round_trip() {
        let selector = time_fragment_selector(&json!(3), &json!(9), "vid-container-1");
        let (range_time, container) = decode_time_selector_item(&selector).unwrap();
        assert_eq!(range_time, json!({ "start": 3, "end": 9 }));
        assert_eq!(container, "vid-container-1");
    }

    #[test]
    fn image_fragment_item_decodes_to_position() {
        let item = fragment_selector("xywh=5,6,7,8");
        let decoded = decode_image_selector_item(&item).unwrap();
        assert_eq!(
            decoded,
            json!({ "x": "5", "y": "6", "width": "7", "height": "8" })
        );
    }

    #[test]
    fn svg_item_decodes_to_bare_value() {
        let item = svg_selector(&json!("<svg><path d='M0 0'/></svg>"));
        let decoded = decode_image_selector_item(&item).unwrap();
        assert_eq!(decoded, json!("<svg><path d='M0 0'/></svg>"));
    }

    #[test]
    fn unknown_tagged_item_passes_through() {
        let item = json!({ "type": "PointSelector", "x": 3, "y": 4 });
        let decoded = decode_image_selector_item(&item).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn viewport_scope_from_bounds() {
        let scope = viewport_scope(&json!({ "x": 0, "y": 0, "width": 800, "height": 600 }));
        assert_eq!(
            scope.unwrap(),
            json!({ "type": VIEWPORT_SCOPE, "value": "xywh=0,0,800,600" })
        );
    }

    #[test]
    fn malformed_bounds_silently_dropped() {
        assert!(viewport_scope(&json!({ "x": 0, "y": 0 })).is_none());
        assert!(viewport_scope(&json!("not an object")).is_none());
    }
}
