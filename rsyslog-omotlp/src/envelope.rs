//! The OTLP/HTTP JSON logs envelope, built as a typed tree and serialized
//! once per flush.

use serde::Serialize;
use serde_json::Value;

use rsyslog_core::Result;

use crate::config::OtlpConfig;
use crate::record::LogRecord;

const SCOPE_NAME: &str = "rsyslog.omotel";
const SDK_NAME: &str = "rsyslog-omotel";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportLogsServiceRequest {
    resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs {
    resource: Resource,
    scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Serialize)]
struct Resource {
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs {
    scope: Scope,
    log_records: Vec<JsonLogRecord>,
}

#[derive(Debug, Serialize)]
struct Scope {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonLogRecord {
    time_unix_nano: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed_time_unix_nano: Option<u64>,
    severity_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity_text: Option<String>,
    body: AnyValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u8>,
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct KeyValue {
    key: String,
    value: AnyValue,
}

/// The OTLP `AnyValue` wrapper: `{"stringValue": …}` and friends.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum AnyValue {
    StringValue(String),
    IntValue(i64),
    DoubleValue(f64),
    BoolValue(bool),
}

fn push_string(attributes: &mut Vec<KeyValue>, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    attributes.push(KeyValue {
        key: key.to_string(),
        value: AnyValue::StringValue(value.to_string()),
    });
}

fn push_int(attributes: &mut Vec<KeyValue>, key: &str, value: i64) {
    attributes.push(KeyValue {
        key: key.to_string(),
        value: AnyValue::IntValue(value),
    });
}

/// Serialize `records` into one export request.
///
/// `host.name` is emitted at the resource scope only when every record in
/// the batch carries the identical non-empty hostname; otherwise hostname
/// attribution stays per record.
pub(crate) fn build_export(records: &[LogRecord], cfg: &OtlpConfig) -> Result<String> {
    let mut resource_attributes = Vec::new();
    push_string(&mut resource_attributes, "service.name", "rsyslog");
    push_string(&mut resource_attributes, "telemetry.sdk.name", SDK_NAME);
    // the language tag is a fixed part of the wire contract; consumers
    // match on the literal
    push_string(&mut resource_attributes, "telemetry.sdk.language", "C");
    push_string(&mut resource_attributes, "telemetry.sdk.version", VERSION);

    // flat overlay: scalars only, the OTLP resource is a flat key/value set
    for (key, value) in &cfg.resource {
        match value {
            Value::String(s) => push_string(&mut resource_attributes, key, s),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    push_int(&mut resource_attributes, key, i);
                } else if let Some(f) = n.as_f64() {
                    resource_attributes.push(KeyValue {
                        key: key.clone(),
                        value: AnyValue::DoubleValue(f),
                    });
                }
            }
            Value::Bool(b) => resource_attributes.push(KeyValue {
                key: key.clone(),
                value: AnyValue::BoolValue(*b),
            }),
            Value::Null | Value::Array(_) | Value::Object(_) => {}
        }
    }

    if let Some(id) = &cfg.service_instance_id {
        push_string(&mut resource_attributes, "service.instance.id", id);
    }
    if let Some(env_name) = &cfg.deployment_environment {
        push_string(&mut resource_attributes, "deployment.environment", env_name);
    }

    if let Some(hostname) = common_hostname(records) {
        push_string(&mut resource_attributes, "host.name", hostname);
    }

    let log_records = records.iter().map(|r| to_json_record(r, cfg)).collect();

    let request = ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Resource {
                attributes: resource_attributes,
            },
            scope_logs: vec![ScopeLogs {
                scope: Scope {
                    name: SCOPE_NAME,
                    version: VERSION,
                },
                log_records,
            }],
        }],
    };

    serde_json::to_string(&request)
        .map_err(|e| rsyslog_core::Error::Internal(format!("envelope serialization: {e}")))
}

/// The hostname shared by every record of the batch, if there is one.
fn common_hostname(records: &[LogRecord]) -> Option<&str> {
    let first = records.first()?.hostname.as_deref().filter(|h| !h.is_empty())?;
    for record in &records[1..] {
        match record.hostname.as_deref() {
            Some(h) if h == first => {}
            _ => return None,
        }
    }
    Some(first)
}

fn to_json_record(record: &LogRecord, cfg: &OtlpConfig) -> JsonLogRecord {
    let mapped = |default: &'static str, key: &str| -> String {
        cfg.attribute_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    let hostname_attr = mapped("log.syslog.hostname", "hostname");
    let appname_attr = mapped("log.syslog.appname", "appname");
    let procid_attr = mapped("log.syslog.procid", "procid");
    let msgid_attr = mapped("log.syslog.msgid", "msgid");
    let facility_attr = mapped("log.syslog.facility", "facility");

    let mut attributes = Vec::new();
    if let Some(app_name) = &record.app_name {
        push_string(&mut attributes, &appname_attr, app_name);
    }
    if let Some(proc_id) = &record.proc_id {
        push_string(&mut attributes, &procid_attr, proc_id);
    }
    if let Some(msg_id) = &record.msg_id {
        push_string(&mut attributes, &msgid_attr, msg_id);
    }
    push_int(&mut attributes, &facility_attr, record.facility as i64);
    if let Some(hostname) = &record.hostname {
        push_string(&mut attributes, &hostname_attr, hostname);
    }

    JsonLogRecord {
        time_unix_nano: record.time_unix_nano,
        observed_time_unix_nano: (record.observed_time_unix_nano != 0)
            .then_some(record.observed_time_unix_nano),
        severity_number: record.severity_number,
        severity_text: record.severity_text.clone(),
        body: AnyValue::StringValue(record.body.clone()),
        trace_id: record.trace_id.clone(),
        span_id: record.span_id.clone(),
        flags: (record.trace_flags != 0).then_some(record.trace_flags),
        attributes,
    }
}
