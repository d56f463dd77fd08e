//! Inbound notification classification.
//!
//! Turns a raw notification body into a handshake, a set of genuine source
//! keys, or nothing. Every key the pipeline writes classifies as
//! pipeline-owned under [`KeyLayout::classify`] and is skipped here, so the
//! pipeline's own uploads never start a new run.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;
use vsplit_models::{KeyKind, KeyLayout};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// String layers unwrapped from a notification message.
const MAX_MESSAGE_DEPTH: usize = 3;

/// Why a key named by a notification does not start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Written by the pipeline or its workers
    PipelineOwned { kind: KeyKind },
    /// Outside the namespace or not a source video
    Foreign,
    OtherBucket { bucket: String },
    /// Not an object-created event
    NotCreated { event: String },
    /// A run for this source is already in progress in this process
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedKey {
    pub key: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of classifying a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// Subscription handshake; only the confirmation callback must run
    Handshake { subscribe_url: String },
    /// Object-created notification. `sources` are deduplicated and in
    /// notification order.
    ObjectCreated {
        sources: Vec<String>,
        skipped: Vec<SkippedKey>,
    },
    Unrecognized { reason: String },
}

impl EventClass {
    pub fn label(&self) -> &'static str {
        match self {
            EventClass::Handshake { .. } => "handshake",
            EventClass::ObjectCreated { sources, .. } if sources.is_empty() => "ignored",
            EventClass::ObjectCreated { .. } => "object_created",
            EventClass::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// A key named by an object-created record.
struct ObjectRef {
    bucket: Option<String>,
    key: String,
    event: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventClassifier {
    layout: KeyLayout,
    bucket: Option<String>,
}

impl EventClassifier {
    /// `bucket` restricts accepted notifications to one bucket.
    pub fn new(layout: KeyLayout, bucket: Option<String>) -> Self {
        Self { layout, bucket }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Classify a raw notification body.
    pub fn classify(&self, body: &[u8]) -> PipelineResult<EventClass> {
        let result = serde_json::from_slice::<Value>(body)
            .map_err(|e| PipelineError::malformed(format!("invalid JSON: {}", e)))
            .and_then(|envelope| self.classify_envelope(&envelope));

        match &result {
            Ok(class) => {
                debug!(class = class.label(), "Classified event");
                metrics::record_event(class.label());
            }
            Err(e) => {
                warn!("Rejected event: {}", e);
                metrics::record_event("malformed");
            }
        }
        result
    }

    /// Inner notification body, with message layers unwrapped. Used for the
    /// raw-event archive.
    pub fn notification_body(&self, body: &[u8]) -> PipelineResult<Value> {
        let envelope: Value = serde_json::from_slice(body)
            .map_err(|e| PipelineError::malformed(format!("invalid JSON: {}", e)))?;
        match envelope
            .as_object()
            .and_then(|map| field(map, &["Message", "message"]))
        {
            Some(message) => unwrap_message(message),
            None => Ok(envelope),
        }
    }

    fn classify_envelope(&self, envelope: &Value) -> PipelineResult<EventClass> {
        let Some(map) = envelope.as_object() else {
            return Err(PipelineError::malformed("envelope is not a JSON object"));
        };

        match field(map, &["Type", "type"]).and_then(Value::as_str) {
            Some("SubscriptionConfirmation") => {
                let subscribe_url = field(map, &["SubscribeURL", "subscribe_url", "SubscribeUrl"])
                    .and_then(Value::as_str)
                    .ok_or_else(|| PipelineError::malformed("handshake without SubscribeURL"))?;
                let parsed = Url::parse(subscribe_url).map_err(|e| {
                    PipelineError::malformed(format!("invalid SubscribeURL: {}", e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PipelineError::malformed(format!(
                        "unsupported SubscribeURL scheme: {}",
                        parsed.scheme()
                    )));
                }
                info!("Subscription handshake received");
                Ok(EventClass::Handshake {
                    subscribe_url: subscribe_url.to_string(),
                })
            }
            Some("Notification") => {
                let message = field(map, &["Message", "message"])
                    .ok_or_else(|| PipelineError::malformed("notification without Message"))?;
                let body = unwrap_message(message)?;
                if is_test_event(&body) {
                    return Ok(EventClass::Unrecognized {
                        reason: "storage test event".to_string(),
                    });
                }
                match self.extract_objects(&body)? {
                    Some(objects) => self.classify_objects(objects),
                    None => Err(PipelineError::malformed("notification without key")),
                }
            }
            Some(other) => Ok(EventClass::Unrecognized {
                reason: format!("unsupported message type {}", other),
            }),
            // Direct object-store event without an envelope
            None => match self.extract_objects(envelope)? {
                Some(objects) => self.classify_objects(objects),
                None => Ok(EventClass::Unrecognized {
                    reason: "no message type, records or key".to_string(),
                }),
            },
        }
    }

    /// Objects named by a notification body. `None` when the body names no
    /// object at all.
    fn extract_objects(&self, body: &Value) -> PipelineResult<Option<Vec<ObjectRef>>> {
        let Some(map) = body.as_object() else {
            return Err(PipelineError::malformed("notification body is not a JSON object"));
        };

        if let Some(records) = field(map, &["Records", "records"]) {
            let records = records
                .as_array()
                .ok_or_else(|| PipelineError::malformed("Records is not a list"))?;
            if records.is_empty() {
                return Ok(None);
            }
            return records.iter().map(parse_record).collect::<PipelineResult<Vec<_>>>().map(Some);
        }

        if let Some(key) = field(map, &["key", "Key"]) {
            let key = key
                .as_str()
                .ok_or_else(|| PipelineError::malformed("key is not a string"))?;
            let bucket = field(map, &["bucket", "Bucket"])
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Some(vec![ObjectRef {
                bucket,
                key: decode_key(key)?,
                event: None,
            }]));
        }

        Ok(None)
    }

    fn classify_objects(&self, objects: Vec<ObjectRef>) -> PipelineResult<EventClass> {
        let mut sources: Vec<String> = Vec::new();
        let mut skipped = Vec::new();

        for object in objects {
            if let Some(event) = object.event.filter(|e| !is_created_event(e)) {
                skipped.push(SkippedKey {
                    key: object.key,
                    reason: SkipReason::NotCreated { event },
                });
                continue;
            }

            if let (Some(expected), Some(bucket)) = (&self.bucket, &object.bucket) {
                if expected != bucket {
                    skipped.push(SkippedKey {
                        key: object.key,
                        reason: SkipReason::OtherBucket {
                            bucket: bucket.clone(),
                        },
                    });
                    continue;
                }
            }

            match self.layout.classify(&object.key) {
                KeyKind::Source => {
                    if !sources.contains(&object.key) {
                        sources.push(object.key);
                    }
                }
                KeyKind::Foreign => skipped.push(SkippedKey {
                    key: object.key,
                    reason: SkipReason::Foreign,
                }),
                kind => {
                    debug!(key = %object.key, kind = kind.as_str(), "Skipping pipeline-owned key");
                    skipped.push(SkippedKey {
                        key: object.key,
                        reason: SkipReason::PipelineOwned { kind },
                    });
                }
            }
        }

        Ok(EventClass::ObjectCreated { sources, skipped })
    }
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

/// Decode JSON carried in string layers, up to [`MAX_MESSAGE_DEPTH`].
fn unwrap_message(message: &Value) -> PipelineResult<Value> {
    let mut current = message.clone();
    for _ in 0..MAX_MESSAGE_DEPTH {
        match current {
            Value::String(text) => {
                current = serde_json::from_str(&text).map_err(|e| {
                    PipelineError::malformed(format!("Message is not JSON: {}", e))
                })?;
            }
            other => return Ok(other),
        }
    }
    match current {
        Value::String(_) => Err(PipelineError::malformed("Message nested too deeply")),
        other => Ok(other),
    }
}

fn parse_record(record: &Value) -> PipelineResult<ObjectRef> {
    let event = record
        .get("eventName")
        .and_then(Value::as_str)
        .map(str::to_string);
    let s3 = record
        .get("s3")
        .ok_or_else(|| PipelineError::malformed("record without s3 section"))?;
    let key = s3
        .pointer("/object/key")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::malformed("record without object key"))?;
    let bucket = s3
        .pointer("/bucket/name")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ObjectRef {
        bucket,
        key: decode_key(key)?,
        event,
    })
}

fn is_test_event(body: &Value) -> bool {
    body.get("Event").and_then(Value::as_str) == Some("s3:TestEvent")
}

fn is_created_event(event: &str) -> bool {
    event.trim_start_matches("s3:").starts_with("ObjectCreated")
}

/// Percent-decode an object key; `+` stands for a space.
fn decode_key(raw: &str) -> PipelineResult<String> {
    let spaced = raw.replace('+', " ");
    let key = urlencoding::decode(&spaced)
        .map_err(|e| PipelineError::malformed(format!("key is not valid UTF-8: {}", e)))?
        .into_owned();
    if key.is_empty() {
        return Err(PipelineError::malformed("empty key"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classifier() -> EventClassifier {
        EventClassifier::new(KeyLayout::default(), Some("media".to_string()))
    }

    fn notification(inner: Value) -> Vec<u8> {
        json!({"Type": "Notification", "Message": inner.to_string()})
            .to_string()
            .into_bytes()
    }

    fn s3_event(key: &str) -> Value {
        json!({"Records": [{
            "eventName": "ObjectCreated:Put",
            "s3": {"bucket": {"name": "media"}, "object": {"key": key}}
        }]})
    }

    fn sources(class: EventClass) -> Vec<String> {
        match class {
            EventClass::ObjectCreated { sources, .. } => sources,
            other => panic!("unexpected class: {other:?}"),
        }
    }

    #[test]
    fn test_handshake() {
        let body = json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.example.com/confirm?token=abc"
        });
        let class = classifier().classify(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            class,
            EventClass::Handshake {
                subscribe_url: "https://sns.example.com/confirm?token=abc".to_string()
            }
        );

        let snake = json!({"type": "SubscriptionConfirmation", "subscribe_url": "http://localhost/c"});
        assert!(matches!(
            classifier().classify(snake.to_string().as_bytes()).unwrap(),
            EventClass::Handshake { .. }
        ));
    }

    #[test]
    fn test_handshake_without_url_is_malformed() {
        let body = json!({"Type": "SubscriptionConfirmation"});
        assert!(matches!(
            classifier().classify(body.to_string().as_bytes()),
            Err(PipelineError::MalformedEvent(_))
        ));

        let body = json!({"Type": "SubscriptionConfirmation", "SubscribeURL": "file:///etc/passwd"});
        assert!(matches!(
            classifier().classify(body.to_string().as_bytes()),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_flat_notification_with_encoded_key() {
        let body = notification(json!({"bucket": "media", "key": "uploads/my+clip%281%29.mp4"}));
        let class = classifier().classify(&body).unwrap();
        assert_eq!(sources(class), vec!["uploads/my clip(1).mp4"]);
    }

    #[test]
    fn test_double_encoded_message() {
        let inner = json!({"bucket": "media", "key": "clip.mp4"}).to_string();
        let body = json!({"Type": "Notification", "Message": Value::String(inner).to_string()});
        let class = classifier().classify(body.to_string().as_bytes()).unwrap();
        assert_eq!(sources(class), vec!["clip.mp4"]);
    }

    #[test]
    fn test_s3_records() {
        let class = classifier().classify(&notification(s3_event("clip.mp4"))).unwrap();
        assert_eq!(sources(class), vec!["clip.mp4"]);

        // Direct delivery without an envelope
        let class = classifier()
            .classify(s3_event("a/b.mov").to_string().as_bytes())
            .unwrap();
        assert_eq!(sources(class), vec!["a/b.mov"]);
    }

    #[test]
    fn test_pipeline_keys_never_start_runs() {
        for key in [
            "clip/part0.mp4",
            "clip/part3_cmpl.mp4",
            "clip_merged.mp4",
            "clip/manifest.mp4.txt",
            "events/20260101T000000Z-1.json",
        ] {
            let class = classifier().classify(&notification(s3_event(key))).unwrap();
            match class {
                EventClass::ObjectCreated { sources, skipped } => {
                    assert!(sources.is_empty(), "{key} started a run");
                    assert!(matches!(skipped[0].reason, SkipReason::PipelineOwned { .. }));
                }
                other => panic!("unexpected class for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_skips_other_bucket_and_deletes() {
        let other = json!({"bucket": "elsewhere", "key": "clip.mp4"});
        let class = classifier().classify(&notification(other)).unwrap();
        match class {
            EventClass::ObjectCreated { sources, skipped } => {
                assert!(sources.is_empty());
                assert_eq!(
                    skipped[0].reason,
                    SkipReason::OtherBucket {
                        bucket: "elsewhere".to_string()
                    }
                );
            }
            other => panic!("unexpected class: {other:?}"),
        }

        let removed = json!({"Records": [{
            "eventName": "ObjectRemoved:Delete",
            "s3": {"bucket": {"name": "media"}, "object": {"key": "clip.mp4"}}
        }]});
        let class = classifier().classify(&notification(removed)).unwrap();
        assert_eq!(class.label(), "ignored");
    }

    #[test]
    fn test_duplicate_records_deduplicated() {
        let body = json!({"Records": [
            {"eventName": "ObjectCreated:Put", "s3": {"bucket": {"name": "media"}, "object": {"key": "clip.mp4"}}},
            {"eventName": "ObjectCreated:Put", "s3": {"bucket": {"name": "media"}, "object": {"key": "clip.mp4"}}}
        ]});
        let class = classifier().classify(&notification(body)).unwrap();
        assert_eq!(sources(class), vec!["clip.mp4"]);
    }

    #[test]
    fn test_malformed_and_unrecognized() {
        assert!(matches!(
            classifier().classify(b"not json"),
            Err(PipelineError::MalformedEvent(_))
        ));
        assert!(matches!(
            classifier().classify(&notification(json!({"bucket": "media"}))),
            Err(PipelineError::MalformedEvent(_))
        ));

        let test_event = json!({"Service": "Amazon S3", "Event": "s3:TestEvent"});
        assert!(matches!(
            classifier().classify(&notification(test_event)).unwrap(),
            EventClass::Unrecognized { .. }
        ));

        let unsubscribe = json!({"Type": "UnsubscribeConfirmation"});
        assert!(matches!(
            classifier().classify(unsubscribe.to_string().as_bytes()).unwrap(),
            EventClass::Unrecognized { .. }
        ));
        assert!(matches!(
            classifier().classify(b"{}").unwrap(),
            EventClass::Unrecognized { .. }
        ));
    }

    #[test]
    fn test_skipped_key_serialization() {
        let skipped = SkippedKey {
            key: "clip/part0.mp4".to_string(),
            reason: SkipReason::PipelineOwned {
                kind: KeyKind::Chunk { index: 0 },
            },
        };
        let value = serde_json::to_value(&skipped).unwrap();
        assert_eq!(value["key"], "clip/part0.mp4");
        assert_eq!(value["reason"], "pipeline_owned");
        assert_eq!(value["kind"]["kind"], "chunk");
    }
}
