use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use rsyslog_core::{Error, Result};

/// Endpoint for log export, logs-specific variable first.
pub(crate) const OTEL_EXPORTER_OTLP_LOGS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT";
pub(crate) const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub(crate) const OTEL_EXPORTER_OTLP_LOGS_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_LOGS_PROTOCOL";
pub(crate) const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
pub(crate) const OTEL_EXPORTER_OTLP_LOGS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT";
pub(crate) const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
pub(crate) const OTEL_EXPORTER_OTLP_LOGS_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_LOGS_COMPRESSION";
pub(crate) const OTEL_EXPORTER_OTLP_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_COMPRESSION";
pub(crate) const OTEL_EXPORTER_OTLP_LOGS_HEADERS: &str = "OTEL_EXPORTER_OTLP_LOGS_HEADERS";
pub(crate) const OTEL_EXPORTER_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";

pub(crate) const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4318";
pub(crate) const DEFAULT_PATH: &str = "/v1/logs";
pub(crate) const DEFAULT_PROTOCOL: &str = "http/json";
pub(crate) const DEFAULT_TEMPLATE: &str = "RSYSLOG_FileFormat";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_BATCH_MAX_ITEMS: usize = 512;
pub(crate) const DEFAULT_BATCH_MAX_BYTES: usize = 512 * 1024;
pub(crate) const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;
pub(crate) const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub(crate) const DEFAULT_RETRY_MAX_RETRIES: u32 = 5;
pub(crate) const DEFAULT_RETRY_JITTER_PERCENT: u32 = 20;

/// Payload compression applied before the HTTP POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    fn parse(value: &str) -> Result<Compression> {
        match value.to_ascii_lowercase().as_str() {
            "gzip" => Ok(Compression::Gzip),
            "none" => Ok(Compression::None),
            other => Err(Error::Param(format!(
                "compression '{other}' is not supported"
            ))),
        }
    }
}

/// Backoff parameters for the HTTP client's internal retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub max_retries: u32,
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_ms: DEFAULT_RETRY_INITIAL_MS,
            max_ms: DEFAULT_RETRY_MAX_MS,
            max_retries: DEFAULT_RETRY_MAX_RETRIES,
            jitter_percent: DEFAULT_RETRY_JITTER_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ca_cert_file: Option<PathBuf>,
    pub ca_cert_dir: Option<PathBuf>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub verify_hostname: bool,
    pub verify_peer: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Immutable exporter configuration, shared by every worker of an action.
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub path: String,
    pub protocol: String,
    pub body_template: String,
    /// Endpoint and path joined; the URL requests are POSTed to.
    pub url: String,
    pub request_timeout_ms: u64,
    pub batch_max_items: usize,
    pub batch_max_bytes: usize,
    pub batch_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub compression: Compression,
    /// Extra request headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Flat resource-attribute overlay from the `resource` JSON object.
    pub resource: Map<String, Value>,
    pub service_instance_id: Option<String>,
    pub deployment_environment: Option<String>,
    pub trace_id_property: String,
    pub span_id_property: String,
    pub trace_flags_property: String,
    /// Remaps the per-record syslog attribute names.
    pub attribute_map: HashMap<String, String>,
    /// Per-priority severity override, index 0..=7.
    pub severity_map: [Option<(u32, String)>; 8],
    pub tls: TlsConfig,
    pub proxy: ProxyConfig,
}

/// Builder for [`OtlpConfig`]. Unset fields fall back to the
/// `OTEL_EXPORTER_OTLP_LOGS_*` / `OTEL_EXPORTER_OTLP_*` environment
/// variables and then to compiled-in defaults, at [`OtlpConfigBuilder::build`]
/// time.
#[derive(Debug, Default)]
pub struct OtlpConfigBuilder {
    endpoint: Option<String>,
    path: Option<String>,
    protocol: Option<String>,
    body_template: Option<String>,
    request_timeout_ms: Option<u64>,
    batch_max_items: Option<usize>,
    batch_max_bytes: Option<usize>,
    batch_timeout_ms: Option<u64>,
    retry: RetryPolicy,
    compression: Option<Compression>,
    headers: Vec<(String, String)>,
    headers_configured: bool,
    resource: Map<String, Value>,
    service_instance_id: Option<String>,
    deployment_environment: Option<String>,
    trace_id_property: Option<String>,
    span_id_property: Option<String>,
    trace_flags_property: Option<String>,
    attribute_map: HashMap<String, String>,
    severity_map: [Option<(u32, String)>; 8],
    tls_verify_hostname: Option<bool>,
    tls_verify_peer: Option<bool>,
    tls: TlsConfig,
    proxy: ProxyConfig,
}

impl OtlpConfigBuilder {
    pub fn new() -> Self {
        OtlpConfigBuilder::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    pub fn with_batch_max_items(mut self, items: usize) -> Self {
        self.batch_max_items = Some(items);
        self
    }

    pub fn with_batch_max_bytes(mut self, bytes: usize) -> Self {
        self.batch_max_bytes = Some(bytes);
        self
    }

    pub fn with_batch_timeout_ms(mut self, ms: u64) -> Self {
        self.batch_timeout_ms = Some(ms);
        self
    }

    pub fn with_retry_initial_ms(mut self, ms: u64) -> Self {
        self.retry.initial_ms = ms;
        self
    }

    pub fn with_retry_max_ms(mut self, ms: u64) -> Self {
        self.retry.max_ms = ms;
        self
    }

    pub fn with_retry_max_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_retry_jitter_percent(mut self, percent: u32) -> Self {
        self.retry.jitter_percent = percent;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Compression by configuration value, `gzip` or `none`
    /// (case-insensitive).
    pub fn with_compression_name(mut self, value: &str) -> Result<Self> {
        self.compression = Some(Compression::parse(value)?);
        Ok(self)
    }

    /// Extra headers as a JSON object of string values.
    pub fn with_headers_json(mut self, json_text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_text)
            .map_err(|e| Error::Param(format!("failed to parse headers JSON: {e}")))?;
        let obj = root
            .as_object()
            .ok_or_else(|| Error::Param("headers parameter must be a JSON object".to_string()))?;
        for (key, value) in obj {
            let value = value.as_str().ok_or_else(|| {
                Error::Param(format!("header '{key}' value must be a string"))
            })?;
            self.headers.push((key.clone(), value.to_string()));
        }
        self.headers_configured = true;
        Ok(self)
    }

    /// Adds `Authorization: Bearer <token>`.
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        self.headers.push((
            "Authorization".to_string(),
            format!("Bearer {}", token.as_ref()),
        ));
        self
    }

    /// Resource-attribute overlay as a JSON object. String, integer, float
    /// and boolean values become resource attributes; arrays, objects and
    /// null entries are skipped at serialization time.
    pub fn with_resource_json(mut self, json_text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_text)
            .map_err(|e| Error::Param(format!("resource parameter contains invalid JSON: {e}")))?;
        match root {
            Value::Object(map) => {
                self.resource = map;
                Ok(self)
            }
            _ => Err(Error::Param(
                "resource parameter must be a JSON object".to_string(),
            )),
        }
    }

    pub fn with_service_instance_id(mut self, id: impl Into<String>) -> Self {
        self.service_instance_id = Some(id.into());
        self
    }

    pub fn with_deployment_environment(mut self, env_name: impl Into<String>) -> Self {
        self.deployment_environment = Some(env_name.into());
        self
    }

    pub fn with_trace_id_property(mut self, name: impl Into<String>) -> Self {
        self.trace_id_property = Some(name.into());
        self
    }

    pub fn with_span_id_property(mut self, name: impl Into<String>) -> Self {
        self.span_id_property = Some(name.into());
        self
    }

    pub fn with_trace_flags_property(mut self, name: impl Into<String>) -> Self {
        self.trace_flags_property = Some(name.into());
        self
    }

    /// Attribute remapping as a JSON object: source property name to OTLP
    /// attribute name.
    pub fn with_attribute_map_json(mut self, json_text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_text)
            .map_err(|e| Error::Param(format!("failed to parse attributeMap JSON: {e}")))?;
        let obj = root.as_object().ok_or_else(|| {
            Error::Param("attributeMap must be a JSON object".to_string())
        })?;
        for (prop, attr) in obj {
            let attr = attr.as_str().ok_or_else(|| {
                Error::Param(format!("attributeMap value for '{prop}' must be a string"))
            })?;
            self.attribute_map.insert(prop.clone(), attr.to_string());
        }
        Ok(self)
    }

    /// Severity overrides as a JSON object keyed by syslog priority (0-7),
    /// each value an object with `number` and `text`.
    pub fn with_severity_map_json(mut self, json_text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_text)
            .map_err(|e| Error::Param(format!("failed to parse severity.map JSON: {e}")))?;
        let obj = root.as_object().ok_or_else(|| {
            Error::Param("severity.map must be a JSON object".to_string())
        })?;
        for (key, value) in obj {
            let priority: usize = key.parse().map_err(|_| {
                Error::Param(format!("severity.map key '{key}' must be a number 0-7"))
            })?;
            if priority > 7 {
                return Err(Error::Param(format!(
                    "severity.map key '{key}' must be a number 0-7"
                )));
            }
            let entry = value.as_object().ok_or_else(|| {
                Error::Param(format!(
                    "severity.map value for priority {priority} must be an object"
                ))
            })?;
            let number = entry.get("number").and_then(Value::as_u64).ok_or_else(|| {
                Error::Param(format!(
                    "severity.map[{priority}] must have 'number' field (integer)"
                ))
            })?;
            let text = entry.get("text").and_then(Value::as_str).ok_or_else(|| {
                Error::Param(format!(
                    "severity.map[{priority}] must have 'text' field (string)"
                ))
            })?;
            self.severity_map[priority] = Some((number as u32, text.to_string()));
        }
        Ok(self)
    }

    pub fn with_tls_ca_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_file = Some(path.into());
        self
    }

    pub fn with_tls_ca_cert_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_dir = Some(path.into());
        self
    }

    pub fn with_tls_client_cert(
        mut self,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.tls.client_cert_file = Some(cert.into());
        self.tls.client_key_file = Some(key.into());
        self
    }

    /// `on`/`yes`/`1` or `off`/`no`/`0`, case-insensitive.
    pub fn with_tls_verify_hostname(mut self, value: &str) -> Result<Self> {
        self.tls_verify_hostname = Some(parse_switch("tls.verify_hostname", value)?);
        Ok(self)
    }

    /// `on`/`yes`/`1` or `off`/`no`/`0`, case-insensitive.
    pub fn with_tls_verify_peer(mut self, value: &str) -> Result<Self> {
        self.tls_verify_peer = Some(parse_switch("tls.verify_peer", value)?);
        Ok(self)
    }

    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy.url = Some(url.into());
        self
    }

    pub fn with_proxy_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.proxy.user = Some(user.into());
        self.proxy.password = Some(password.into());
        self
    }

    /// Validate everything and produce the immutable configuration.
    pub fn build(mut self) -> Result<OtlpConfig> {
        self.apply_env_defaults()?;

        if self.retry.jitter_percent > 100 {
            return Err(Error::Param(
                "retry.jitter.percent must be between 0 and 100".to_string(),
            ));
        }

        let (endpoint, path) = split_endpoint_path(
            self.endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            self.path,
        );
        let path = path.unwrap_or_else(|| DEFAULT_PATH.to_string());

        let protocol = self
            .protocol
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string())
            .to_ascii_lowercase();
        if protocol != "http/json" {
            return Err(Error::NotImplemented(format!(
                "protocol '{protocol}' is not supported by this build"
            )));
        }

        let compression = self.compression.unwrap_or_default();
        let mut headers = self.headers;
        if compression == Compression::Gzip {
            headers.push(("Content-Encoding".to_string(), "gzip".to_string()));
        }

        if let Some(file) = &self.tls.ca_cert_file {
            check_readable_file("tls.cacert", file)?;
        }
        if let Some(dir) = &self.tls.ca_cert_dir {
            if !dir.is_dir() {
                return Err(Error::Param(format!(
                    "tls.cadir directory '{}' cannot be accessed",
                    dir.display()
                )));
            }
        }
        if let Some(file) = &self.tls.client_cert_file {
            check_readable_file("tls.cert", file)?;
        }
        if let Some(file) = &self.tls.client_key_file {
            check_readable_file("tls.key", file)?;
        }
        self.tls.verify_hostname = self.tls_verify_hostname.unwrap_or(true);
        self.tls.verify_peer = self.tls_verify_peer.unwrap_or(true);

        if let Some(url) = &self.proxy.url {
            let valid = ["http://", "https://", "socks4://", "socks5://"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !valid {
                return Err(Error::Param(
                    "proxy URL must start with http://, https://, socks4://, or socks5://"
                        .to_string(),
                ));
            }
        }

        let url = join_url(&endpoint, &path);

        Ok(OtlpConfig {
            endpoint,
            path,
            protocol,
            body_template: self
                .body_template
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            url,
            request_timeout_ms: self
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            batch_max_items: self.batch_max_items.unwrap_or(DEFAULT_BATCH_MAX_ITEMS),
            batch_max_bytes: self.batch_max_bytes.unwrap_or(DEFAULT_BATCH_MAX_BYTES),
            batch_timeout_ms: self.batch_timeout_ms.unwrap_or(DEFAULT_BATCH_TIMEOUT_MS),
            retry: self.retry,
            compression,
            headers,
            resource: self.resource,
            service_instance_id: self.service_instance_id,
            deployment_environment: self.deployment_environment,
            trace_id_property: self
                .trace_id_property
                .unwrap_or_else(|| "trace_id".to_string()),
            span_id_property: self
                .span_id_property
                .unwrap_or_else(|| "span_id".to_string()),
            trace_flags_property: self
                .trace_flags_property
                .unwrap_or_else(|| "trace_flags".to_string()),
            attribute_map: self.attribute_map,
            severity_map: self.severity_map,
            tls: self.tls,
            proxy: self.proxy,
        })
    }

    /// Fill unset fields from environment variables, logs-specific variable
    /// first, the generic one second. Only non-empty values count.
    fn apply_env_defaults(&mut self) -> Result<()> {
        if self.endpoint.is_none() {
            self.endpoint =
                first_populated_env(&[OTEL_EXPORTER_OTLP_LOGS_ENDPOINT, OTEL_EXPORTER_OTLP_ENDPOINT]);
        }
        if self.protocol.is_none() {
            self.protocol =
                first_populated_env(&[OTEL_EXPORTER_OTLP_LOGS_PROTOCOL, OTEL_EXPORTER_OTLP_PROTOCOL]);
        }
        if self.request_timeout_ms.is_none() {
            if let Some(value) =
                first_populated_env(&[OTEL_EXPORTER_OTLP_LOGS_TIMEOUT, OTEL_EXPORTER_OTLP_TIMEOUT])
            {
                self.request_timeout_ms = Some(parse_timeout_value(&value)?);
            }
        }
        if self.compression.is_none() {
            if let Some(value) = first_populated_env(&[
                OTEL_EXPORTER_OTLP_LOGS_COMPRESSION,
                OTEL_EXPORTER_OTLP_COMPRESSION,
            ]) {
                self.compression = Some(Compression::parse(&value)?);
            }
        }
        if !self.headers_configured {
            if let Some(value) =
                first_populated_env(&[OTEL_EXPORTER_OTLP_LOGS_HEADERS, OTEL_EXPORTER_OTLP_HEADERS])
            {
                parse_headers_env(&value, &mut self.headers)?;
            }
        }
        Ok(())
    }
}

fn first_populated_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.is_empty())
}

fn check_readable_file(param: &str, path: &Path) -> Result<()> {
    std::fs::File::open(path).map_err(|e| {
        Error::Param(format!(
            "{param} file '{}' cannot be accessed: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

fn parse_switch(param: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "yes" | "1" => Ok(true),
        "off" | "no" | "0" => Ok(false),
        _ => Err(Error::Param(format!("{param} must be 'on' or 'off'"))),
    }
}

/// Timeout value with an optional unit suffix: `ms` means milliseconds,
/// `s` seconds, a bare number milliseconds.
pub(crate) fn parse_timeout_value(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let (number, multiplier) = if let Some(stripped) = trimmed.strip_suffix("ms") {
        (stripped, 1u64)
    } else if let Some(stripped) = trimmed.strip_suffix('s') {
        (stripped, 1000u64)
    } else {
        (trimmed, 1u64)
    };
    let parsed: u64 = number
        .trim()
        .parse()
        .map_err(|_| Error::Param(format!("invalid timeout value '{text}'")))?;
    parsed
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Param(format!("timeout '{text}' exceeds range")))
}

/// Environment headers: comma-separated `key=value` pairs, whitespace
/// trimmed, percent-encoding decoded in both key and value.
pub(crate) fn parse_headers_env(text: &str, headers: &mut Vec<(String, String)>) -> Result<()> {
    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| Error::Param(format!("header entry '{token}' is missing '='")))?;
        headers.push((
            percent_decode(key.trim()),
            percent_decode(value.trim()),
        ));
    }
    Ok(())
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a path component off the endpoint when no explicit path was
/// configured, so `endpoint="http://host:4318/v1/logs"` works the same as
/// `endpoint="http://host:4318" path="/v1/logs"`.
fn split_endpoint_path(endpoint: String, path: Option<String>) -> (String, Option<String>) {
    if path.is_some() {
        return (endpoint, path);
    }
    let after_scheme = match endpoint.find("://") {
        Some(pos) => pos + 3,
        None => 0,
    };
    match endpoint[after_scheme..].find('/') {
        Some(rel) => {
            let split_at = after_scheme + rel;
            if split_at == 0 || split_at + 1 >= endpoint.len() {
                return (endpoint, None);
            }
            let path = endpoint[split_at..].to_string();
            let base = endpoint[..split_at].to_string();
            (base, Some(path))
        }
        None => (endpoint, None),
    }
}

/// Join endpoint and path with exactly one slash between them.
fn join_url(endpoint: &str, path: &str) -> String {
    match (endpoint.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", endpoint, &path[1..]),
        (false, false) => format!("{endpoint}/{path}"),
        _ => format!("{endpoint}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let cfg = temp_env::with_vars_unset(
            [
                OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
                OTEL_EXPORTER_OTLP_ENDPOINT,
                OTEL_EXPORTER_OTLP_LOGS_PROTOCOL,
                OTEL_EXPORTER_OTLP_PROTOCOL,
                OTEL_EXPORTER_OTLP_LOGS_TIMEOUT,
                OTEL_EXPORTER_OTLP_TIMEOUT,
                OTEL_EXPORTER_OTLP_LOGS_COMPRESSION,
                OTEL_EXPORTER_OTLP_COMPRESSION,
                OTEL_EXPORTER_OTLP_LOGS_HEADERS,
                OTEL_EXPORTER_OTLP_HEADERS,
            ],
            || OtlpConfigBuilder::new().build().unwrap(),
        );
        assert_eq!(cfg.url, "http://127.0.0.1:4318/v1/logs");
        assert_eq!(cfg.protocol, "http/json");
        assert_eq!(cfg.batch_max_items, 512);
        assert_eq!(cfg.batch_max_bytes, 512 * 1024);
        assert_eq!(cfg.batch_timeout_ms, 5000);
        assert_eq!(cfg.request_timeout_ms, 10_000);
        assert_eq!(cfg.trace_id_property, "trace_id");
        assert!(cfg.tls.verify_peer);
        assert!(cfg.tls.verify_hostname);
    }

    #[test]
    fn endpoint_with_embedded_path_is_split() {
        let cfg = OtlpConfigBuilder::new()
            .with_endpoint("http://collector:4318/custom/logs")
            .build()
            .unwrap();
        assert_eq!(cfg.endpoint, "http://collector:4318");
        assert_eq!(cfg.path, "/custom/logs");
        assert_eq!(cfg.url, "http://collector:4318/custom/logs");
    }

    #[test]
    fn explicit_path_wins_over_split() {
        let cfg = OtlpConfigBuilder::new()
            .with_endpoint("http://collector:4318/ignored")
            .with_path("/v1/logs")
            .build()
            .unwrap();
        assert_eq!(cfg.endpoint, "http://collector:4318/ignored");
        assert_eq!(cfg.url, "http://collector:4318/ignored/v1/logs");
    }

    #[test]
    fn url_join_handles_slashes() {
        assert_eq!(join_url("http://h", "/p"), "http://h/p");
        assert_eq!(join_url("http://h/", "/p"), "http://h/p");
        assert_eq!(join_url("http://h/", "p"), "http://h/p");
        assert_eq!(join_url("http://h", "p"), "http://h/p");
    }

    #[test]
    fn unsupported_protocol_is_not_implemented() {
        let err = OtlpConfigBuilder::new()
            .with_protocol("grpc")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn logs_endpoint_env_beats_generic_env() {
        temp_env::with_vars(
            [
                (
                    OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
                    Some("http://logs-endpoint:4318"),
                ),
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("http://wrong:4318")),
            ],
            || {
                let cfg = OtlpConfigBuilder::new().build().unwrap();
                assert_eq!(cfg.endpoint, "http://logs-endpoint:4318");
            },
        );
    }

    #[test]
    fn explicit_endpoint_beats_env() {
        temp_env::with_vars(
            [(OTEL_EXPORTER_OTLP_ENDPOINT, Some("http://from-env:4318"))],
            || {
                let cfg = OtlpConfigBuilder::new()
                    .with_endpoint("http://explicit:4318")
                    .build()
                    .unwrap();
                assert_eq!(cfg.endpoint, "http://explicit:4318");
            },
        );
    }

    #[test]
    fn timeout_env_suffixes() {
        assert_eq!(parse_timeout_value("1500").unwrap(), 1500);
        assert_eq!(parse_timeout_value("1500ms").unwrap(), 1500);
        assert_eq!(parse_timeout_value("2s").unwrap(), 2000);
        assert!(parse_timeout_value("fast").is_err());
        assert!(parse_timeout_value("-1").is_err());
    }

    #[test]
    fn env_timeout_applies_when_unset() {
        temp_env::with_vars([(OTEL_EXPORTER_OTLP_TIMEOUT, Some("3s"))], || {
            let cfg = OtlpConfigBuilder::new().build().unwrap();
            assert_eq!(cfg.request_timeout_ms, 3000);
        });
    }

    #[test]
    fn env_headers_are_percent_decoded() {
        let mut headers = Vec::new();
        parse_headers_env("api%2Dkey=secret%3Dvalue, other=x", &mut headers).unwrap();
        assert_eq!(
            headers,
            vec![
                ("api-key".to_string(), "secret=value".to_string()),
                ("other".to_string(), "x".to_string())
            ]
        );
    }

    #[test]
    fn env_headers_entry_without_equals_fails() {
        let mut headers = Vec::new();
        assert!(parse_headers_env("broken-entry", &mut headers).is_err());
    }

    #[test]
    fn gzip_adds_content_encoding_header() {
        let cfg = OtlpConfigBuilder::new()
            .with_compression(Compression::Gzip)
            .build()
            .unwrap();
        assert!(cfg
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Encoding" && v == "gzip"));
    }

    #[test]
    fn bearer_token_becomes_authorization_header() {
        let cfg = OtlpConfigBuilder::new()
            .with_bearer_token("tok123")
            .build()
            .unwrap();
        assert!(cfg
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer tok123"));
    }

    #[test]
    fn severity_map_json_parses_and_validates() {
        let builder = OtlpConfigBuilder::new()
            .with_severity_map_json(r#"{"3": {"number": 99, "text": "CUSTOM_ERR"}}"#)
            .unwrap();
        let cfg = builder.build().unwrap();
        assert_eq!(
            cfg.severity_map[3],
            Some((99, "CUSTOM_ERR".to_string()))
        );
        assert_eq!(cfg.severity_map[0], None);

        assert!(OtlpConfigBuilder::new()
            .with_severity_map_json(r#"{"8": {"number": 1, "text": "X"}}"#)
            .is_err());
        assert!(OtlpConfigBuilder::new()
            .with_severity_map_json(r#"{"1": {"number": 1}}"#)
            .is_err());
    }

    #[test]
    fn jitter_over_100_is_rejected() {
        let err = OtlpConfigBuilder::new()
            .with_retry_jitter_percent(101)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Param(_)));
    }

    #[test]
    fn bad_proxy_scheme_is_rejected() {
        let err = OtlpConfigBuilder::new()
            .with_proxy("ftp://proxy:3128")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Param(_)));

        assert!(OtlpConfigBuilder::new()
            .with_proxy("socks5://proxy:1080")
            .build()
            .is_ok());
    }

    #[test]
    fn compression_values_are_case_insensitive() {
        assert_eq!(Compression::parse("GZIP").unwrap(), Compression::Gzip);
        assert_eq!(Compression::parse("none").unwrap(), Compression::None);
        assert!(Compression::parse("brotli").is_err());
    }
}
