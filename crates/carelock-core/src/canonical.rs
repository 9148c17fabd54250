//! Canonical CBOR encoding of audit records.
//!
//! Records are encoded as a CBOR map with small integer keys in ascending
//! order, definite lengths, no floats and shortest-form integers. The same
//! record therefore always produces the same bytes, and so the same
//! [`RecordId`](crate::types::RecordId), on every platform.

use std::net::IpAddr;

use ciborium::value::Value;

use crate::audit::{AuditRecord, ContextSnapshot};
use crate::error::CoreError;
use crate::types::{Action, DecisionId, LocationId, PrincipalId, ResourceId, ResourceType};

/// Record field keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const DECISION_ID: u64 = 0;
    pub const PRINCIPAL: u64 = 1;
    pub const ACTION: u64 = 2;
    pub const RESOURCE_TYPE: u64 = 3;
    pub const RESOURCE_ID: u64 = 4;
    pub const ALLOWED: u64 = 5;
    pub const REASON: u64 = 6;
    pub const MATCHED_RULE: u64 = 7;
    pub const DETAIL: u64 = 8;
    pub const DECIDED_AT: u64 = 9;
    pub const ORIGIN: u64 = 10;
    pub const LOCATION: u64 = 11;
    pub const RETENTION_MS: u64 = 12;
    pub const EXPIRES_AT: u64 = 13;
}

/// Encode a record to canonical bytes.
pub fn canonical_record_bytes(record: &AuditRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(&record_to_value(record), &mut buf).expect("CBOR serialization failed");
    buf
}

/// Decode a record from canonical bytes.
pub fn decode_record(bytes: &[u8]) -> Result<AuditRecord, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    value_to_record(&value)
}

fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::Text(s.to_string()))
}

/// Convert a record to a CBOR map (entries already in key order).
fn record_to_value(record: &AuditRecord) -> Value {
    let entries = vec![
        (keys::DECISION_ID, Value::Bytes(record.decision_id.0.to_vec())),
        (keys::PRINCIPAL, Value::Text(record.principal.0.clone())),
        (keys::ACTION, Value::Text(record.action.0.clone())),
        (keys::RESOURCE_TYPE, Value::Text(record.resource_type.0.clone())),
        (keys::RESOURCE_ID, text_or_null(record.resource_id.as_ref().map(ResourceId::as_str))),
        (keys::ALLOWED, Value::Bool(record.allowed)),
        (keys::REASON, Value::Text(record.reason.as_str().to_string())),
        (keys::MATCHED_RULE, text_or_null(record.matched_rule.as_deref())),
        (keys::DETAIL, Value::Text(record.detail.clone())),
        (keys::DECIDED_AT, Value::Integer(record.context.decided_at.into())),
        (
            keys::ORIGIN,
            record
                .context
                .origin
                .map_or(Value::Null, |ip| Value::Text(ip.to_string())),
        ),
        (keys::LOCATION, text_or_null(record.context.location.as_ref().map(LocationId::as_str))),
        (keys::RETENTION_MS, Value::Integer(record.retention_ms.into())),
        (keys::EXPIRES_AT, Value::Integer(record.expires_at.into())),
    ];

    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::Integer(k.into()), v))
            .collect(),
    )
}

/// Convert a CBOR map back to a record.
fn value_to_record(value: &Value) -> Result<AuditRecord, CoreError> {
    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::Malformed("expected map".into())),
    };

    let get = |key: u64| -> Result<&Value, CoreError> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == i128::from(key)))
            .map(|(_, v)| v)
            .ok_or_else(|| CoreError::Malformed(format!("missing field {key}")))
    };

    let text = |key: u64| -> Result<String, CoreError> {
        match get(key)? {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(CoreError::Malformed(format!("field {key} must be text"))),
        }
    };

    let opt_text = |key: u64| -> Result<Option<String>, CoreError> {
        match get(key)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            _ => Err(CoreError::Malformed(format!("field {key} must be text or null"))),
        }
    };

    let int = |key: u64| -> Result<i64, CoreError> {
        match get(key)? {
            Value::Integer(i) => i64::try_from(*i)
                .map_err(|_| CoreError::Malformed(format!("field {key} out of range"))),
            _ => Err(CoreError::Malformed(format!("field {key} must be an integer"))),
        }
    };

    let decision_id = match get(keys::DECISION_ID)? {
        Value::Bytes(b) => DecisionId::try_from(b.as_slice())
            .map_err(|_| CoreError::Malformed("decision id must be 32 bytes".into()))?,
        _ => return Err(CoreError::Malformed("decision id must be bytes".into())),
    };

    let allowed = match get(keys::ALLOWED)? {
        Value::Bool(b) => *b,
        _ => return Err(CoreError::Malformed("allowed must be a bool".into())),
    };

    let origin = opt_text(keys::ORIGIN)?
        .map(|s| s.parse::<IpAddr>())
        .transpose()
        .map_err(|e| CoreError::Malformed(format!("origin: {e}")))?;

    Ok(AuditRecord {
        decision_id,
        principal: PrincipalId(text(keys::PRINCIPAL)?),
        action: Action(text(keys::ACTION)?),
        resource_type: ResourceType(text(keys::RESOURCE_TYPE)?),
        resource_id: opt_text(keys::RESOURCE_ID)?.map(ResourceId),
        allowed,
        reason: text(keys::REASON)?.parse()?,
        matched_rule: opt_text(keys::MATCHED_RULE)?,
        detail: text(keys::DETAIL)?,
        context: ContextSnapshot {
            decided_at: int(keys::DECIDED_AT)?,
            origin,
            location: opt_text(keys::LOCATION)?.map(LocationId),
        },
        retention_ms: int(keys::RETENTION_MS)?,
        expires_at: int(keys::EXPIRES_AT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRecordBuilder;
    use crate::context::RequestContext;
    use crate::decision::{Decision, ReasonCode};

    fn record() -> AuditRecord {
        let decision = Decision::deny(
            ReasonCode::ExplicitAclDeny,
            Some("acl:deny:user:alice:delete".into()),
            "explicit deny",
        );
        let ctx = RequestContext::at(1_700_000_000_000)
            .with_origin("10.0.0.7".parse().unwrap())
            .with_location("praxis-nord");
        AuditRecordBuilder::new("alice".into(), "delete".into(), "patients".into())
            .resource_id(Some("p-1".into()))
            .decision_id(DecisionId::from_bytes([3; 32]))
            .build(&decision, &ctx)
    }

    #[test]
    fn test_decode_inverts_encode() {
        let original = record();
        let decoded = decode_record(&canonical_record_bytes(&original)).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(original.id(), decoded.id());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        assert_eq!(canonical_record_bytes(&record()), canonical_record_bytes(&record()));
    }

    #[test]
    fn test_map_keys_are_single_byte_and_ordered() {
        let bytes = canonical_record_bytes(&record());
        // Map header: major type 5 with 14 entries
        assert_eq!(bytes[0], 0xa0 | 14);
        // First key is 0
        assert_eq!(bytes[1], 0x00);
    }

    #[test]
    fn test_decode_rejects_non_map() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Integer(1.into()), &mut buf).unwrap();
        assert!(decode_record(&buf).is_err());
    }
}
