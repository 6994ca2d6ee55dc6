use super::*;
use serde_json::json;

fn tenant() -> Tenant {
    Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
}

fn header_refs<'a>(headers: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a [u8])> {
    headers.iter().map(|(k, v)| (*k, v.as_bytes())).collect()
}

#[test]
fn test_record_round_trip_preserves_tenant_and_trace() {
    let txn = Uuid::new_v4();
    let envelope = Envelope::new(
        "command.character.stat",
        42,
        tenant(),
        "AWARD_MESOS",
        &json!({ "characterId": 42, "amount": 1000 }),
    )
    .unwrap()
    .with_transaction(txn);

    let headers = envelope.headers();
    let payload = envelope.to_payload().unwrap();
    let decoded = Envelope::from_record(
        &envelope.topic,
        envelope.key_bytes().as_bytes(),
        header_refs(&headers),
        &payload,
    )
    .unwrap();

    assert_eq!(decoded, envelope);
}

#[test]
fn test_payload_shape() {
    let txn = Uuid::new_v4();
    let envelope = Envelope::new("t", 1, tenant(), "CREATED", &json!({ "assetId": 9 }))
        .unwrap()
        .with_transaction(txn);
    let value: serde_json::Value = serde_json::from_slice(&envelope.to_payload().unwrap()).unwrap();
    assert_eq!(value["transactionId"], json!(txn.to_string()));
    assert_eq!(value["type"], json!("CREATED"));
    assert_eq!(value["body"]["assetId"], json!(9));
}

#[test]
fn test_spontaneous_event_omits_transaction() {
    let envelope = Envelope::new("t", 1, tenant(), "LOGIN", &json!({})).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&envelope.to_payload().unwrap()).unwrap();
    assert!(value.get("transactionId").is_none());
}

#[test]
fn test_missing_tenant_header_rejected() {
    let payload = br#"{"type":"LOGIN","body":{}}"#;
    let result = Envelope::from_record("t", b"7", Vec::<(&str, &[u8])>::new(), payload);
    assert!(matches!(result, Err(EnvelopeError::MissingHeader(headers::TENANT_ID))));
}

#[test]
fn test_invalid_tenant_header_rejected() {
    let payload = br#"{"type":"LOGIN","body":{}}"#;
    let result = Envelope::from_record(
        "t",
        b"7",
        vec![(headers::TENANT_ID, b"not-a-uuid".as_slice())],
        payload,
    );
    assert!(matches!(result, Err(EnvelopeError::InvalidHeader { .. })));
}

#[test]
fn test_non_numeric_key_rejected() {
    let t = tenant();
    let id = t.id.to_string();
    let payload = br#"{"type":"LOGIN","body":{}}"#;
    let result = Envelope::from_record(
        "t",
        b"abc",
        vec![(headers::TENANT_ID, id.as_bytes())],
        payload,
    );
    assert!(matches!(result, Err(EnvelopeError::InvalidKey(_))));
}

#[test]
fn test_caused_by_continues_trace() {
    let cause = Envelope::new("t", 1, tenant(), "A", &json!({})).unwrap();
    let effect = Envelope::new("t", 2, tenant(), "B", &json!({}))
        .unwrap()
        .caused_by(&cause);
    assert_eq!(effect.trace.trace_id, cause.trace.trace_id);
    assert_eq!(effect.trace.parent_span_id.as_deref(), Some(cause.trace.span_id.as_str()));
    assert_ne!(effect.trace.span_id, cause.trace.span_id);
}

#[test]
fn test_transaction_key_is_low_32_bits() {
    let txn = Uuid::from_u128(0x1234_5678_9abc_def0_0000_0000_cafe_babe);
    assert_eq!(transaction_key(txn), 0xcafe_babe);
}

#[test]
fn test_name_key_is_stable_per_tenant() {
    let t = tenant();
    assert_eq!(name_key(&t, "ellinia-orbis"), name_key(&t, "ellinia-orbis"));
    assert_ne!(name_key(&t, "ellinia-orbis"), name_key(&tenant(), "ellinia-orbis"));
}

#[test]
fn test_error_code_round_trip_and_unknown() {
    let code: ErrorCode = serde_json::from_value(json!("STORAGE_FULL")).unwrap();
    assert_eq!(code, ErrorCode::StorageFull);
    assert_eq!(code.category(), ErrorCategory::Capacity);

    let unknown: ErrorCode = serde_json::from_value(json!("SOMETHING_NEW")).unwrap();
    assert_eq!(unknown, ErrorCode::Other("SOMETHING_NEW".to_string()));
    assert_eq!(serde_json::to_value(&unknown).unwrap(), json!("SOMETHING_NEW"));
}
