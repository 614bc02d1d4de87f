//! Log output of the controller.
//!
//! `LOG_FORMAT=json` switches to one JSON object per line, anything else prints aligned columns
//! for a terminal. Fields of the enclosing `controller`, `job` and `stage` spans are attached to
//! every event so a line can be traced back to its worker and job without the span tree.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Context as _;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "prover_controller=info,controller_prover_interface=info";

/// Span fields with a dedicated column in the pretty output, in column order.
const COLUMNS: [(&str, usize); 3] = [("local_id", 12), ("job", 17), ("range", 13)];

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[90m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT").ok().and_then(|value| Self::from_str(&value).ok()).unwrap_or_default()
    }
}

/// Fields recorded on a span or an event.
#[derive(Debug, Clone, Default)]
struct Fields {
    message: Option<String>,
    values: BTreeMap<&'static str, Value>,
}

impl Fields {
    fn insert(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(message)) => self.message = Some(message),
            (name, value) => {
                self.values.insert(name, value);
            }
        }
    }
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.insert(field, Value::String(rendered.trim_matches('"').to_string()));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// Keeps the fields of every open span in its extensions for the formatter.
struct SpanFieldsLayer;

impl<S> Layer<S> for SpanFieldsLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut fields = Fields::default();
            attrs.record(&mut fields);
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(fields) = extensions.get_mut::<Fields>() {
                values.record(fields);
            }
        }
    }
}

/// Merges the fields of the current span scope, innermost first.
fn scope_fields<S, N>(ctx: &FmtContext<'_, S, N>) -> BTreeMap<&'static str, Value>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let mut merged = BTreeMap::new();
    let Some(span) = ctx.lookup_current() else { return merged };
    for scope in span.scope() {
        if let Some(fields) = scope.extensions().get::<Fields>() {
            for (name, value) in &fields.values {
                merged.entry(*name).or_insert_with(|| value.clone());
            }
        }
    }
    merged
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Short name of the module an event comes from.
fn component(target: &str) -> &'static str {
    match target.split("::").take(2).collect::<Vec<_>>().as_slice() {
        ["controller_prover_interface", ..] => "prover",
        ["prover_controller", "pipeline"] => "pipeline",
        ["prover_controller", "worker"] => "worker",
        ["prover_controller", ..] => "controller",
        _ => "external",
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::TRACE => "\x1b[90m",
        Level::DEBUG => "\x1b[34m",
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
    }
}

pub struct ControllerFormatter {
    format: LogFormat,
}

impl ControllerFormatter {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    fn pretty(&self, event: Fields, mut scope: BTreeMap<&'static str, Value>, meta: &tracing::Metadata<'_>) -> String {
        let level = *meta.level();
        let mut line = format!(
            "\x1b[96m{}{RESET} {DIM}|{RESET} {}{:<5}{RESET} {DIM}|{RESET} {:<10}",
            Utc::now().format("%y-%m-%d %H:%M:%S"),
            level_color(level),
            level,
            component(meta.target()),
        );
        for (name, width) in COLUMNS {
            let cell = scope.remove(name).map(|v| plain(&v)).unwrap_or_else(|| "-".to_string());
            let _ = write!(line, " {DIM}|{RESET} \x1b[92m{cell:<width$}{RESET}");
        }
        let _ = write!(line, " {DIM}|{RESET} \x1b[97m{}{RESET}", event.message.unwrap_or_default());

        let extra: Vec<String> = event
            .values
            .iter()
            .map(|(name, value)| format!("{name}={}", plain(value)))
            .collect();
        if !extra.is_empty() {
            let _ = write!(line, " {DIM}({}){RESET}", extra.join(", "));
        }
        line
    }

    fn json(&self, event: Fields, scope: BTreeMap<&'static str, Value>, meta: &tracing::Metadata<'_>) -> String {
        let mut root = Map::new();
        root.insert("timestamp".into(), Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).into());
        root.insert("level".into(), meta.level().as_str().into());
        root.insert("target".into(), meta.target().into());
        root.insert("component".into(), component(meta.target()).into());
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            root.insert("location".into(), format!("{file}:{line}").into());
        }
        if let Some(message) = event.message {
            root.insert("message".into(), message.into());
        }

        let mut fields: Map<String, Value> = scope.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        // Event fields shadow span fields of the same name
        fields.extend(event.values.into_iter().map(|(k, v)| (k.to_string(), v)));
        if !fields.is_empty() {
            root.insert("fields".into(), Value::Object(fields));
        }
        Value::Object(root).to_string()
    }
}

impl<S, N> FormatEvent<S, N> for ControllerFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);
        let scope = scope_fields(ctx);
        let line = match self.format {
            LogFormat::Pretty => self.pretty(fields, scope, event.metadata()),
            LogFormat::Json => self.json(fields, scope, event.metadata()),
        };
        writeln!(writer, "{line}")
    }
}

/// Installs `color_eyre` and the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() -> anyhow::Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!("Unable to install color_eyre: {e}"))?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .parse(DEFAULT_FILTER)
            .context("Invalid default log filter")?,
    };

    let format = LogFormat::from_env();
    let fmt_layer = fmt::layer().event_format(ControllerFormatter::new(format));
    let subscriber =
        Registry::default().with(env_filter).with(SpanFieldsLayer).with(ErrorLayer::default()).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).context("Failed to set global default subscriber")
}
