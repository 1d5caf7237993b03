use std::path::PathBuf;

use nix::sys::signal::Signal;

use rsyslog_core::{Error, Result};

pub(crate) const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_FILE_CREATE_MODE: u32 = 0o600;
const DEFAULT_BEGIN_MARK: &str = "BEGIN TRANSACTION";
const DEFAULT_COMMIT_MARK: &str = "COMMIT TRANSACTION";

/// Signal forwarded to the child when the host receives HUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HupSignal {
    /// Do not forward HUP.
    #[default]
    None,
    Hup,
    Usr1,
    Usr2,
    Int,
    Term,
}

impl HupSignal {
    /// Parse the configuration spelling (`HUP`, `USR1`, ...).
    pub fn parse(name: &str) -> Result<HupSignal> {
        match name {
            "HUP" => Ok(HupSignal::Hup),
            "USR1" => Ok(HupSignal::Usr1),
            "USR2" => Ok(HupSignal::Usr2),
            "INT" => Ok(HupSignal::Int),
            "TERM" => Ok(HupSignal::Term),
            _ => Err(Error::Param(format!("unknown hup.signal '{name}'"))),
        }
    }

    pub(crate) fn as_signal(self) -> Option<Signal> {
        match self {
            HupSignal::None => None,
            HupSignal::Hup => Some(Signal::SIGHUP),
            HupSignal::Usr1 => Some(Signal::SIGUSR1),
            HupSignal::Usr2 => Some(Signal::SIGUSR2),
            HupSignal::Int => Some(Signal::SIGINT),
            HupSignal::Term => Some(Signal::SIGTERM),
        }
    }
}

/// Immutable supervisor configuration, shared by the instance and all of
/// its workers.
#[derive(Debug, Clone)]
pub struct ProgConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub body_template: String,
    pub confirm_messages: bool,
    pub confirm_timeout_ms: u64,
    pub report_failures: bool,
    pub use_transactions: bool,
    pub begin_transaction_mark: String,
    pub commit_transaction_mark: String,
    pub hup_signal: HupSignal,
    pub signal_on_close: bool,
    pub close_timeout_ms: u64,
    pub kill_unresponsive: bool,
    pub force_single_instance: bool,
    pub output_file: Option<PathBuf>,
    pub output_create_mode: u32,
}

/// Builder for [`ProgConfig`].
#[derive(Debug, Default)]
pub struct ProgConfigBuilder {
    binary: Option<PathBuf>,
    args: Vec<String>,
    body_template: Option<String>,
    confirm_messages: bool,
    confirm_timeout_ms: Option<u64>,
    report_failures: bool,
    use_transactions: bool,
    begin_transaction_mark: Option<String>,
    commit_transaction_mark: Option<String>,
    hup_signal: HupSignal,
    signal_on_close: bool,
    close_timeout_ms: Option<u64>,
    kill_unresponsive: Option<bool>,
    force_single_instance: bool,
    output_file: Option<PathBuf>,
    output_create_mode: Option<u32>,
}

impl ProgConfigBuilder {
    pub fn new() -> Self {
        ProgConfigBuilder::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Legacy combined form: binary plus arguments in one string, split on
    /// whitespace with double-quoted arguments kept together.
    pub fn with_command_line(mut self, line: &str) -> Result<Self> {
        let mut parts = split_command_line(line)?;
        if parts.is_empty() {
            return Err(Error::Param("no binary to execute specified".to_string()));
        }
        self.binary = Some(PathBuf::from(parts.remove(0)));
        self.args = parts;
        Ok(self)
    }

    pub fn with_body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }

    pub fn with_confirm_messages(mut self, on: bool) -> Self {
        self.confirm_messages = on;
        self
    }

    pub fn with_confirm_timeout_ms(mut self, ms: u64) -> Self {
        self.confirm_timeout_ms = Some(ms);
        self
    }

    pub fn with_report_failures(mut self, on: bool) -> Self {
        self.report_failures = on;
        self
    }

    pub fn with_use_transactions(mut self, on: bool) -> Self {
        self.use_transactions = on;
        self
    }

    pub fn with_begin_transaction_mark(mut self, mark: impl Into<String>) -> Self {
        self.begin_transaction_mark = Some(mark.into());
        self
    }

    pub fn with_commit_transaction_mark(mut self, mark: impl Into<String>) -> Self {
        self.commit_transaction_mark = Some(mark.into());
        self
    }

    pub fn with_hup_signal(mut self, signal: HupSignal) -> Self {
        self.hup_signal = signal;
        self
    }

    pub fn with_signal_on_close(mut self, on: bool) -> Self {
        self.signal_on_close = on;
        self
    }

    pub fn with_close_timeout_ms(mut self, ms: u64) -> Self {
        self.close_timeout_ms = Some(ms);
        self
    }

    pub fn with_kill_unresponsive(mut self, on: bool) -> Self {
        self.kill_unresponsive = Some(on);
        self
    }

    pub fn with_force_single_instance(mut self, on: bool) -> Self {
        self.force_single_instance = on;
        self
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_output_create_mode(mut self, mode: u32) -> Self {
        self.output_create_mode = Some(mode);
        self
    }

    pub fn build(self) -> Result<ProgConfig> {
        let binary = self
            .binary
            .ok_or_else(|| Error::Param("no binary to execute specified".to_string()))?;

        if self.output_create_mode.is_some() && self.output_file.is_none() {
            return Err(Error::Param(
                "the output file create mode requires an output file".to_string(),
            ));
        }

        let signal_on_close = self.signal_on_close;
        Ok(ProgConfig {
            binary,
            args: self.args,
            body_template: self
                .body_template
                .unwrap_or_else(|| "RSYSLOG_FileFormat".to_string()),
            confirm_messages: self.confirm_messages,
            confirm_timeout_ms: self.confirm_timeout_ms.unwrap_or(DEFAULT_CONFIRM_TIMEOUT_MS),
            report_failures: self.report_failures,
            use_transactions: self.use_transactions,
            begin_transaction_mark: self
                .begin_transaction_mark
                .unwrap_or_else(|| DEFAULT_BEGIN_MARK.to_string()),
            commit_transaction_mark: self
                .commit_transaction_mark
                .unwrap_or_else(|| DEFAULT_COMMIT_MARK.to_string()),
            hup_signal: self.hup_signal,
            signal_on_close,
            close_timeout_ms: self.close_timeout_ms.unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS),
            // unless told otherwise, only kill children we also signal
            kill_unresponsive: self.kill_unresponsive.unwrap_or(signal_on_close),
            force_single_instance: self.force_single_instance,
            output_file: self.output_file,
            output_create_mode: self.output_create_mode.unwrap_or(DEFAULT_FILE_CREATE_MODE),
        })
    }
}

fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(Error::Param(format!("unbalanced quotes in '{line}'")));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}
