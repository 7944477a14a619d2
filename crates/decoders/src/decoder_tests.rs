//! Tests for the provider webhook decoders, using payloads shaped like the
//! ones Resend and SendGrid actually post.

use postbox_common::types::SuppressionReason;
use serde_json::json;
use uuid::Uuid;

use crate::{DecodeError, ProviderWebhook, WebhookSource, decode};

fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

// ───────────────────────────── Resend ──────────────────────────────

#[test]
fn test_resend_permanent_bounce() {
    let payload = json!({
        "type": "email.bounced",
        "created_at": "2026-03-02T10:00:00.000Z",
        "data": {
            "email_id": "4ef9a417-02e9-4d39-ad75-9611e0fcc33c",
            "from": "Studio <no-reply@studio.example>",
            "to": ["Someone@Example.COM"],
            "subject": "Your receipt",
            "bounce": { "type": "Permanent", "subType": "General", "message": "mailbox unknown" }
        }
    });

    let events = decode(WebhookSource::Resend, &body(payload.clone())).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].email, "someone@example.com");
    assert_eq!(events[0].reason, SuppressionReason::HardBounce);
    assert_eq!(events[0].source, "resend");
    assert_eq!(events[0].user_id, None);
    assert_eq!(events[0].details, payload);
}

#[test]
fn test_resend_transient_bounce_ignored() {
    let payload = json!({
        "type": "email.bounced",
        "data": { "to": ["a@x.com"], "bounce": { "type": "Transient" } }
    });
    assert!(decode(WebhookSource::Resend, &body(payload)).unwrap().is_empty());
}

#[test]
fn test_resend_complaint_with_tag_object() {
    let user_id = Uuid::new_v4();
    let payload = json!({
        "type": "email.complained",
        "data": { "to": "a@x.com", "tags": { "user_id": user_id.to_string() } }
    });

    let events = decode(WebhookSource::Resend, &body(payload)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, SuppressionReason::SpamComplaint);
    assert_eq!(events[0].user_id, Some(user_id));
}

#[test]
fn test_resend_tag_array() {
    let user_id = Uuid::new_v4();
    let payload = json!({
        "type": "email.bounced",
        "data": {
            "to": ["a@x.com"],
            "tags": [{ "name": "category", "value": "marketing" }, { "name": "user_id", "value": user_id.to_string() }]
        }
    });

    let events = decode(WebhookSource::Resend, &body(payload)).unwrap();
    assert_eq!(events[0].user_id, Some(user_id));
}

#[test]
fn test_resend_delivered_ignored() {
    let payload = json!({ "type": "email.delivered", "data": { "to": ["a@x.com"] } });
    assert!(decode(WebhookSource::Resend, &body(payload)).unwrap().is_empty());
}

#[test]
fn test_resend_missing_recipient_yields_nothing() {
    let payload = json!({ "type": "email.complained", "data": {} });
    assert!(decode(WebhookSource::Resend, &body(payload)).unwrap().is_empty());
}

#[test]
fn test_resend_array_body_rejected() {
    let result = ProviderWebhook::parse(WebhookSource::Resend, b"[]");
    assert!(matches!(result, Err(DecodeError::UnexpectedShape(_))));
}

#[test]
fn test_invalid_json_rejected() {
    let result = decode(WebhookSource::Resend, b"{not json");
    assert!(matches!(result, Err(DecodeError::InvalidJson(_))));
}

// ──────────────────────────── SendGrid ─────────────────────────────

#[test]
fn test_sendgrid_batch_mixed_events() {
    let user_id = Uuid::new_v4();
    let payload = json!([
        { "email": "bounce@x.com", "event": "bounce", "type": "bounce", "reason": "550 5.1.1", "sg_event_id": "e1" },
        { "email": "soft@x.com", "event": "bounce", "type": "blocked", "sg_event_id": "e2" },
        { "email": "Spam@X.com", "event": "spamreport", "sg_event_id": "e3", "user_id": user_id.to_string() },
        { "email": "unsub@x.com", "event": "unsubscribe", "sg_event_id": "e4" },
        { "email": "group@x.com", "event": "group_unsubscribe", "sg_event_id": "e5" },
        { "email": "open@x.com", "event": "open", "sg_event_id": "e6" }
    ]);

    let events = decode(WebhookSource::SendGrid, &body(payload)).unwrap();
    let summary: Vec<(&str, SuppressionReason)> = events
        .iter()
        .map(|e| (e.email.as_str(), e.reason))
        .collect();

    assert_eq!(
        summary,
        vec![
            ("bounce@x.com", SuppressionReason::HardBounce),
            ("spam@x.com", SuppressionReason::SpamComplaint),
            ("unsub@x.com", SuppressionReason::ProviderUnsub),
            ("group@x.com", SuppressionReason::ProviderUnsub),
        ]
    );
    assert_eq!(events[1].user_id, Some(user_id));
    assert!(events.iter().all(|e| e.source == "sendgrid"));
    assert_eq!(events[0].details["sg_event_id"], "e1");
}

#[test]
fn test_sendgrid_malformed_entries_skipped() {
    let payload = json!([
        { "event": "bounce" },
        42,
        { "email": "ok@x.com", "event": "spamreport" }
    ]);

    let events = decode(WebhookSource::SendGrid, &body(payload)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].email, "ok@x.com");
}

#[test]
fn test_sendgrid_single_object_accepted() {
    let payload = json!({ "email": "a@x.com", "event": "bounce" });
    let events = decode(WebhookSource::SendGrid, &body(payload)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, SuppressionReason::HardBounce);
}

#[test]
fn test_sendgrid_scalar_body_rejected() {
    let result = decode(WebhookSource::SendGrid, b"\"hello\"");
    assert!(matches!(result, Err(DecodeError::UnexpectedShape(_))));
}

#[test]
fn test_sendgrid_invalid_user_id_ignored() {
    let payload = json!([{ "email": "a@x.com", "event": "spamreport", "user_id": "not-a-uuid" }]);
    let events = decode(WebhookSource::SendGrid, &body(payload)).unwrap();
    assert_eq!(events[0].user_id, None);
}
