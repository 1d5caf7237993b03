use serde_json::{Map, Value};

/// Flow-control hint a message carries from its input.
///
/// Inputs that can pause their source (e.g. a TCP peer) mark messages so the
/// host queues may exert back pressure; inputs that cannot (UDP) use
/// `NoDelay` and the host will drop rather than stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// Never delay the submitting thread for this message.
    NoDelay,
    /// The submitter tolerates a light delay.
    #[default]
    LightDelay,
    /// The submitter can be blocked until queue space is available.
    FullDelay,
}

/// One parsed log record flowing through the system.
///
/// This is the shape the core modules rely on; the host's message object
/// carries more (parser state, rule-engine scratch), none of which the
/// modules may touch.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Timestamp from the message itself, nanoseconds since the epoch.
    pub time_unix_nano: u64,
    /// Timestamp of reception, nanoseconds since the epoch.
    pub observed_time_unix_nano: u64,
    /// Syslog severity, 0..=7.
    pub severity: u8,
    /// Syslog facility, 0..=23.
    pub facility: u8,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    /// Raw message body as received (after framing, before any template).
    pub body: Vec<u8>,
    /// JSON-typed property bag (`$!` variables).
    pub properties: Map<String, Value>,
    pub flow_control: FlowControl,
    /// Name of the input that produced this message.
    pub input_name: Option<String>,
    /// Ruleset the message is bound to, if the input overrides the default.
    pub ruleset: Option<String>,
    /// Peer address for network inputs.
    pub remote_addr: Option<String>,
}

impl Message {
    /// Create a message holding `body`, with all other fields defaulted.
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Message {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Message body interpreted as UTF-8, lossily.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Look up a property by name. A leading `$!` is accepted and stripped,
    /// so callers may use the configuration-file spelling.
    pub fn property(&self, name: &str) -> Option<&Value> {
        let key = name.strip_prefix("$!").unwrap_or(name);
        self.properties.get(key)
    }

    /// Property value rendered as a string: string values verbatim, any
    /// other JSON value as its JSON text. `None` if the property is absent.
    pub fn property_string(&self, name: &str) -> Option<String> {
        match self.property(name)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Attach a JSON subtree as a property.
    pub fn set_property(&mut self, name: &str, value: Value) {
        let key = name.strip_prefix("$!").unwrap_or(name);
        self.properties.insert(key.to_string(), value);
    }
}
