use tracing::warn;

use rsyslog_core::Message;

use crate::config::OtlpConfig;

/// Default syslog-priority to OTLP-severity mapping, indexed by priority.
const SEVERITY_LOOKUP: [(u32, &str); 8] = [
    (24, "EMERGENCY"),
    (23, "ALERT"),
    (22, "CRITICAL"),
    (17, "ERROR"),
    (13, "WARNING"),
    (11, "NOTICE"),
    (9, "INFO"),
    (5, "DEBUG"),
];

/// One log record staged for export. Owns all its string data so the batch
/// can outlive the message it was built from.
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub observed_time_unix_nano: u64,
    pub severity_number: u32,
    pub severity_text: Option<String>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub facility: u16,
    pub body: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub trace_flags: u8,
}

impl LogRecord {
    /// Build a record from a message and its rendered body: severity
    /// mapping, syslog field extraction and trace-correlation property
    /// extraction with validation.
    pub(crate) fn populate(msg: &Message, body: &[u8], cfg: &OtlpConfig) -> LogRecord {
        let (severity_number, severity_text) = map_severity(msg.severity, cfg);

        let mut record = LogRecord {
            time_unix_nano: msg.time_unix_nano,
            observed_time_unix_nano: msg.observed_time_unix_nano,
            severity_number,
            severity_text,
            hostname: non_empty(msg.hostname.clone()),
            app_name: non_empty(msg.app_name.clone()),
            proc_id: non_empty(msg.proc_id.clone()),
            msg_id: non_empty(msg.msg_id.clone()),
            facility: msg.facility as u16,
            body: String::from_utf8_lossy(body).into_owned(),
            trace_id: None,
            span_id: None,
            trace_flags: 0,
        };

        if let Some(trace_id) = msg.property_string(&cfg.trace_id_property) {
            if is_valid_trace_id(&trace_id) {
                record.trace_id = Some(trace_id);
            } else {
                warn!(
                    value = %trace_id,
                    "invalid trace_id format (expected 32 hex chars), dropping"
                );
            }
        }
        if let Some(span_id) = msg.property_string(&cfg.span_id_property) {
            if is_valid_span_id(&span_id) {
                record.span_id = Some(span_id);
            } else {
                warn!(
                    value = %span_id,
                    "invalid span_id format (expected 16 hex chars), dropping"
                );
            }
        }
        if let Some(flags) = msg.property_string(&cfg.trace_flags_property) {
            record.trace_flags = parse_trace_flags(&flags);
        }

        record
    }

    /// Estimated wire footprint of the record body alone; the fixed
    /// per-record JSON framing is accounted for by the caller's overhead
    /// constant.
    pub(crate) fn body_len(&self) -> usize {
        self.body.len()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn map_severity(priority: u8, cfg: &OtlpConfig) -> (u32, Option<String>) {
    let priority = priority as usize;
    if priority > 7 {
        return (0, None);
    }
    if let Some((number, text)) = &cfg.severity_map[priority] {
        return (*number, Some(text.clone()));
    }
    let (number, text) = SEVERITY_LOOKUP[priority];
    (number, Some(text.to_string()))
}

/// trace_id is 128 bits: exactly 32 hex characters.
fn is_valid_trace_id(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// span_id is 64 bits: exactly 16 hex characters.
fn is_valid_span_id(value: &str) -> bool {
    value.len() == 16 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// trace_flags is a hex byte; anything unparsable maps to 0.
fn parse_trace_flags(value: &str) -> u8 {
    if value.is_empty() {
        return 0;
    }
    match u32::from_str_radix(value, 16) {
        Ok(parsed) if parsed <= 255 => parsed as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OtlpConfigBuilder;
    use serde_json::json;

    fn config() -> OtlpConfig {
        OtlpConfigBuilder::new()
            .with_endpoint("http://localhost:4318")
            .build()
            .unwrap()
    }

    fn message() -> Message {
        Message {
            time_unix_nano: 1_700_000_000_000_000_000,
            observed_time_unix_nano: 1_700_000_000_500_000_000,
            severity: 3,
            facility: 4,
            hostname: Some("host1".to_string()),
            app_name: Some("app".to_string()),
            proc_id: Some("42".to_string()),
            msg_id: Some("ID47".to_string()),
            ..Message::from_body("ignored")
        }
    }

    #[test]
    fn default_severity_table() {
        let cfg = config();
        for (priority, expected) in SEVERITY_LOOKUP.iter().enumerate() {
            let mut msg = message();
            msg.severity = priority as u8;
            let rec = LogRecord::populate(&msg, b"x", &cfg);
            assert_eq!(rec.severity_number, expected.0);
            assert_eq!(rec.severity_text.as_deref(), Some(expected.1));
        }
    }

    #[test]
    fn severity_override_replaces_single_entry() {
        let cfg = OtlpConfigBuilder::new()
            .with_severity_map_json(r#"{"3": {"number": 99, "text": "MYERR"}}"#)
            .unwrap()
            .build()
            .unwrap();
        let mut msg = message();
        msg.severity = 3;
        let rec = LogRecord::populate(&msg, b"x", &cfg);
        assert_eq!(rec.severity_number, 99);
        assert_eq!(rec.severity_text.as_deref(), Some("MYERR"));

        // other priorities still use the default table
        msg.severity = 6;
        let rec = LogRecord::populate(&msg, b"x", &cfg);
        assert_eq!(rec.severity_number, 9);
        assert_eq!(rec.severity_text.as_deref(), Some("INFO"));
    }

    #[test]
    fn valid_trace_correlation_is_extracted() {
        let cfg = config();
        let mut msg = message();
        msg.set_property("trace_id", json!("0af7651916cd43dd8448eb211c80319c"));
        msg.set_property("span_id", json!("b7ad6b7169203331"));
        msg.set_property("trace_flags", json!("01"));
        let rec = LogRecord::populate(&msg, b"x", &cfg);
        assert_eq!(
            rec.trace_id.as_deref(),
            Some("0af7651916cd43dd8448eb211c80319c")
        );
        assert_eq!(rec.span_id.as_deref(), Some("b7ad6b7169203331"));
        assert_eq!(rec.trace_flags, 1);
    }

    #[test]
    fn malformed_trace_ids_are_dropped() {
        let cfg = config();
        let mut msg = message();
        msg.set_property("trace_id", json!("not-hex"));
        msg.set_property("span_id", json!("too-short"));
        msg.set_property("trace_flags", json!("1ff"));
        let rec = LogRecord::populate(&msg, b"x", &cfg);
        assert!(rec.trace_id.is_none());
        assert!(rec.span_id.is_none());
        assert_eq!(rec.trace_flags, 0);
    }

    #[test]
    fn custom_trace_property_names() {
        let cfg = OtlpConfigBuilder::new()
            .with_trace_id_property("my_trace")
            .build()
            .unwrap();
        let mut msg = message();
        msg.set_property("my_trace", json!("0af7651916cd43dd8448eb211c80319c"));
        let rec = LogRecord::populate(&msg, b"x", &cfg);
        assert!(rec.trace_id.is_some());
    }

    #[test]
    fn empty_syslog_fields_become_none() {
        let cfg = config();
        let mut msg = message();
        msg.app_name = Some(String::new());
        msg.proc_id = None;
        let rec = LogRecord::populate(&msg, b"body", &cfg);
        assert!(rec.app_name.is_none());
        assert!(rec.proc_id.is_none());
        assert_eq!(rec.body, "body");
    }
}
