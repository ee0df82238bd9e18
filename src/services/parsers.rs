//! Typed event parsers: pipeline phase 2.
//!
//! Dispatch is by event type. Payloads flagged `structured: true` bypass
//! parsing entirely and their `data` field is used as-is.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::domain::error::PipelineError;
use crate::domain::models::{RawEvent, Severity, StructuredData};

const CRITICAL_KEYWORDS: &[&str] = &["critical", "emergency", "alert"];
const HIGH_KEYWORDS: &[&str] = &["error", "failure", "failed"];
const MEDIUM_KEYWORDS: &[&str] = &["warning", "warn"];
const LOW_KEYWORDS: &[&str] = &["notice", "info"];

/// Case-insensitive substring heuristic; first match wins.
///
/// The substring `alert` maps to critical even inside benign phrases;
/// that behavior is deliberate and matched by downstream consumers.
pub fn severity_from_keywords(text: &str) -> Severity {
    let lower = text.to_lowercase();
    let contains = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));
    if contains(CRITICAL_KEYWORDS) {
        Severity::Critical
    } else if contains(HIGH_KEYWORDS) {
        Severity::High
    } else if contains(MEDIUM_KEYWORDS) {
        Severity::Medium
    } else if contains(LOW_KEYWORDS) {
        Severity::Low
    } else {
        Severity::Info
    }
}

/// Parse a raw event into structured form.
///
/// Errors are phase-local: the pipeline falls back to [`parse_generic`],
/// which cannot fail.
pub fn parse_event(event: &RawEvent) -> Result<StructuredData, PipelineError> {
    if event
        .payload
        .get("structured")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return parse_structured(event);
    }

    match event.event_type.as_str() {
        "cloudwatch" => parse_cloudwatch(event),
        "syslog" => parse_syslog(event),
        t if t.starts_with("google-workspace") => parse_workspace(event),
        _ => Ok(parse_generic(event)),
    }
}

/// Bypass: the adapter already produced structured data.
fn parse_structured(event: &RawEvent) -> Result<StructuredData, PipelineError> {
    let data = event
        .payload
        .get("data")
        .ok_or_else(|| PipelineError::Parse("structured payload missing data".to_string()))?;
    serde_json::from_value(data.clone())
        .map_err(|e| PipelineError::Parse(format!("invalid structured data: {e}")))
}

fn parse_cloudwatch(event: &RawEvent) -> Result<StructuredData, PipelineError> {
    let message = event
        .payload
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::Parse("cloudwatch event missing message".to_string()))?;

    let timestamp = event
        .payload
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(event.timestamp);

    Ok(StructuredData {
        timestamp,
        severity: severity_from_keywords(message),
        source: "cloudwatch".to_string(),
        source_ip: payload_ip(&event.payload),
        destination_ip: None,
        message: message.to_string(),
        data: event.payload.clone(),
    })
}

fn parse_workspace(event: &RawEvent) -> Result<StructuredData, PipelineError> {
    let payload = &event.payload;
    let name = payload
        .get("events")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("name"))
        .or_else(|| payload.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::Parse("workspace event missing name".to_string()))?;

    let application = payload
        .pointer("/id/applicationName")
        .and_then(Value::as_str)
        .unwrap_or("workspace");
    let actor = payload
        .pointer("/actor/email")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let timestamp = payload
        .pointer("/id/time")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or(event.timestamp, |dt| dt.with_timezone(&Utc));

    Ok(StructuredData {
        timestamp,
        severity: severity_from_keywords(name),
        source: event.event_type.clone(),
        source_ip: payload
            .get("ipAddress")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        destination_ip: None,
        message: format!("{application}: {name} by {actor}"),
        data: payload.clone(),
    })
}

fn parse_syslog(event: &RawEvent) -> Result<StructuredData, PipelineError> {
    let severity_code = event
        .payload
        .get("severity")
        .and_then(Value::as_u64)
        .ok_or_else(|| PipelineError::Parse("syslog event missing severity".to_string()))?;
    let severity = Severity::from_syslog(u8::try_from(severity_code).unwrap_or(u8::MAX));

    let message = event
        .payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| event.payload.get("rawMessage").and_then(Value::as_str))
        .unwrap_or_default();

    Ok(StructuredData {
        timestamp: event.timestamp,
        severity,
        source: "syslog".to_string(),
        source_ip: payload_ip(&event.payload),
        destination_ip: None,
        message: message.to_string(),
        data: event.payload.clone(),
    })
}

/// Fallback parser: never fails, keyword severity heuristic.
pub fn parse_generic(event: &RawEvent) -> StructuredData {
    let message = event
        .payload
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(
            || serde_json::to_string(&event.payload).unwrap_or_default(),
            ToString::to_string,
        );

    StructuredData {
        timestamp: event.timestamp,
        severity: severity_from_keywords(&message),
        source: event.source.clone(),
        source_ip: payload_ip(&event.payload),
        destination_ip: event
            .payload
            .get("destinationIp")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        message,
        data: event.payload.clone(),
    }
}

fn payload_ip(payload: &Value) -> Option<String> {
    payload
        .get("sourceIp")
        .or_else(|| payload.get("ipAddress"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyword_heuristic_priority_order() {
        assert_eq!(severity_from_keywords("CRITICAL disk failure"), Severity::Critical);
        assert_eq!(severity_from_keywords("emergency shutdown"), Severity::Critical);
        assert_eq!(severity_from_keywords("login failure detected"), Severity::High);
        assert_eq!(severity_from_keywords("Warning: cert expires"), Severity::Medium);
        assert_eq!(severity_from_keywords("notice: rotation done"), Severity::Low);
        assert_eq!(severity_from_keywords("all quiet"), Severity::Info);
    }

    #[test]
    fn test_keyword_heuristic_alert_substring_is_critical() {
        // Deliberately matches inside benign phrases.
        assert_eq!(severity_from_keywords("user muted an alert digest"), Severity::Critical);
    }

    #[test]
    fn test_keyword_critical_beats_high() {
        // "failure" is also present; critical group is checked first.
        assert_eq!(severity_from_keywords("critical failure"), Severity::Critical);
    }

    #[test]
    fn test_structured_bypass_returns_data_unchanged() {
        let structured = json!({
            "timestamp": "2025-10-01T12:00:00Z",
            "severity": "high",
            "source": "edr",
            "sourceIp": "10.1.2.3",
            "message": "process injection observed",
            "data": {"pid": 4242},
        });
        let event = RawEvent::new(
            "edr",
            "edr-telemetry",
            json!({"structured": true, "data": structured}),
        );
        let parsed = parse_event(&event).unwrap();
        assert_eq!(parsed.severity, Severity::High);
        assert_eq!(parsed.source, "edr");
        assert_eq!(parsed.source_ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(parsed.message, "process injection observed");
        assert_eq!(parsed.data, json!({"pid": 4242}));
    }

    #[test]
    fn test_syslog_severity_mapping() {
        for (code, expected) in [
            (0u8, Severity::Critical),
            (2, Severity::Critical),
            (3, Severity::High),
            (4, Severity::Medium),
            (5, Severity::Low),
            (6, Severity::Info),
            (7, Severity::Info),
        ] {
            let event = RawEvent::new(
                "syslog",
                "syslog",
                json!({"severity": code, "facility": 16, "message": "m"}),
            );
            assert_eq!(parse_event(&event).unwrap().severity, expected, "code {code}");
        }
    }

    #[test]
    fn test_syslog_carries_source_ip() {
        let event = RawEvent::new(
            "syslog",
            "syslog",
            json!({"severity": 2, "message": "disk failure", "sourceIp": "192.0.2.7"}),
        );
        let parsed = parse_event(&event).unwrap();
        assert_eq!(parsed.source, "syslog");
        assert_eq!(parsed.source_ip.as_deref(), Some("192.0.2.7"));
    }

    #[test]
    fn test_cloudwatch_parses_message_and_timestamp() {
        let event = RawEvent::new(
            "cloudwatch",
            "cloudwatch",
            json!({"message": "task exited with error", "timestamp": 1_700_000_000_000_i64}),
        );
        let parsed = parse_event(&event).unwrap();
        assert_eq!(parsed.severity, Severity::High);
        assert_eq!(parsed.source, "cloudwatch");
        assert_eq!(parsed.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_cloudwatch_without_message_is_parse_error() {
        let event = RawEvent::new("cloudwatch", "cloudwatch", json!({"logGroup": "/app"}));
        assert!(matches!(parse_event(&event), Err(PipelineError::Parse(_))));
    }

    #[test]
    fn test_workspace_event_name_heuristic() {
        let event = RawEvent::new(
            "google-workspace",
            "google-workspace-admin",
            json!({
                "id": {"applicationName": "admin", "time": "2025-09-30T08:00:00Z"},
                "actor": {"email": "ops@example.com"},
                "ipAddress": "203.0.113.9",
                "events": [{"name": "suspicious_login_failure"}],
            }),
        );
        let parsed = parse_event(&event).unwrap();
        assert_eq!(parsed.severity, Severity::High);
        assert_eq!(parsed.message, "admin: suspicious_login_failure by ops@example.com");
        assert_eq!(parsed.source_ip.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_generic_parser_never_fails() {
        let event = RawEvent::new("custom", "custom-feed", json!({"odd": [1, 2, 3]}));
        let parsed = parse_generic(&event);
        assert_eq!(parsed.severity, Severity::Info);
        assert!(parsed.message.contains("odd"));
    }
}
