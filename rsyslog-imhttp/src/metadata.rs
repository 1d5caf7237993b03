use serde_json::{Map, Value};

/// Hard cap on the number of headers copied into message metadata.
const MAX_HTTP_HEADERS: usize = 64;

/// Request headers as a JSON object, names lowercased. Duplicate names
/// keep the last value.
pub(crate) fn headers_json(headers: &[tiny_http::Header]) -> Value {
    let mut map = Map::new();
    for header in headers.iter().take(MAX_HTTP_HEADERS) {
        map.insert(
            header.field.as_str().as_str().to_ascii_lowercase(),
            Value::String(header.value.as_str().to_string()),
        );
    }
    Value::Object(map)
}

/// URI query string as a JSON object: pairs split on `&` or `;`, key and
/// value split at the first `=` (a bare key gets an empty value).
pub(crate) fn query_params_json(query: &str) -> Value {
    let mut map = Map::new();
    for pair in query.split(['&', ';']) {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Value::Object(map)
}
