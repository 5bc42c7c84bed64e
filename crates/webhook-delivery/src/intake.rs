//! Intake path (spec §4.4.1): signature verification, JSON parsing (single
//! object or batch array), and translation into [`NewEvent`]s.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use webhook_store::event_store::NewEvent;

use crate::signature;
use crate::DeliveryError;

/// One element of an intake body. Recognized fields are lifted out;
/// everything else is preserved verbatim as `payload`.
#[derive(Debug, Clone, Deserialize)]
struct IntakeElement {
    idempotency_key: Option<String>,
    event_type: Option<String>,
    #[serde(flatten)]
    payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeResult {
    pub id: String,
    pub duplicate: bool,
}

/// Verifies `signature_header` against `body`, then parses `body` as either
/// a single JSON object or an array of objects, returning one [`NewEvent`]
/// per element in input order.
pub fn parse_batch(
    hmac_secret: &str,
    body: &[u8],
    signature_header: &str,
) -> Result<Vec<NewEvent>, DeliveryError> {
    signature::verify(hmac_secret, body, signature_header)
        .map_err(|_| DeliveryError::InvalidSignature)?;

    let value: Value = serde_json::from_slice(body).map_err(|_| DeliveryError::BadRequest)?;

    let elements: Vec<IntakeElement> = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|_| DeliveryError::BadRequest)?,
        object @ Value::Object(_) => {
            vec![serde_json::from_value(object).map_err(|_| DeliveryError::BadRequest)?]
        }
        _ => return Err(DeliveryError::BadRequest),
    };

    let received_at = Utc::now();
    Ok(elements
        .into_iter()
        .map(|element| NewEvent {
            idempotency_key: element.idempotency_key,
            event_type: element.event_type,
            payload: element.payload,
            signature: signature_header.to_string(),
            received_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_yields_one_event() {
        let body = br#"{"idempotency_key":"A","event_type":"order","amount":5}"#;
        let sig = signature::compute_signature("shh", body).unwrap();
        let events = parse_batch("shh", body, &sig).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].idempotency_key.as_deref(), Some("A"));
        assert_eq!(events[0].event_type.as_deref(), Some("order"));
        assert_eq!(events[0].payload["amount"], 5);
    }

    #[test]
    fn array_yields_one_event_per_element() {
        let body = br#"[{"event_type":"a"},{"event_type":"b"}]"#;
        let sig = signature::compute_signature("shh", body).unwrap();
        let events = parse_batch("shh", body, &sig).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type.as_deref(), Some("a"));
        assert_eq!(events[1].event_type.as_deref(), Some("b"));
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let body = br#"{"event_type":"a"}"#;
        let err = parse_batch("shh", body, "deadbeef").unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidSignature));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let body = b"not json";
        let sig = signature::compute_signature("shh", body).unwrap();
        let err = parse_batch("shh", body, &sig).unwrap_err();
        assert!(matches!(err, DeliveryError::BadRequest));
    }

    #[test]
    fn unrecognized_fields_land_in_payload() {
        let body = br#"{"foo":"bar","nested":{"x":1}}"#;
        let sig = signature::compute_signature("shh", body).unwrap();
        let events = parse_batch("shh", body, &sig).unwrap();
        assert_eq!(events[0].payload["foo"], "bar");
        assert_eq!(events[0].payload["nested"]["x"], 1);
    }
}
