#[cfg(feature = "color")]
use colored::*;
use log::{warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use tokio::sync::broadcast::{Receiver, Sender};

const TIMESTAMP_FORMAT_LOCAL: &[FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
const TIMESTAMP_FORMAT_UTC: &[FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]Z");

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    Relative,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TargetLevel {
    pub target: String,
    #[serde(
        serialize_with = "serialize_level",
        deserialize_with = "deserialize_level"
    )]
    pub level: Level,
}

/// Logger settings as they appear in the node's YAML config.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(
        serialize_with = "serialize_level",
        deserialize_with = "deserialize_level"
    )]
    pub level: Level,
    #[serde(default)]
    pub target_levels: Vec<TargetLevel>,
    #[serde(default = "default_true")]
    pub use_colors: bool,
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
    #[serde(default)]
    pub output: OutputFormat,
}
const fn default_true() -> bool {
    true
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            target_levels: vec![TargetLevel {
                target: "sqlx".to_string(),
                level: Level::Warn,
            }],
            use_colors: true,
            timestamp_format: TimestampFormat::Local,
            output: OutputFormat::Text,
        }
    }
}

pub struct NodeLogger {
    pub use_colors: bool,
    pub current_level: Level,
    pub timestamp_format: TimestampFormat,
    pub output: OutputFormat,
    pub target_levels: Vec<(String, Level)>,
    pub start_instant: Instant,
    pub printed_error: AtomicBool,
    pub channel: Sender<LogEvent>,
}

pub struct NodeLoggerBuilder {
    use_colors: bool,
    current_level: Level,
    timestamp_format: TimestampFormat,
    output: OutputFormat,
    target_levels: Vec<(String, Level)>,
}

impl Default for NodeLoggerBuilder {
    fn default() -> Self {
        Self {
            use_colors: true,
            current_level: Level::Info,
            timestamp_format: TimestampFormat::Local,
            output: OutputFormat::Text,
            target_levels: vec![],
        }
    }
}

impl From<&LoggingConfig> for NodeLoggerBuilder {
    fn from(config: &LoggingConfig) -> Self {
        let mut builder = Self::new()
            .use_colors(config.use_colors)
            .current_level(config.level)
            .timestamp_format(config.timestamp_format)
            .output(config.output);
        for target_level in &config.target_levels {
            builder = builder.with_target_level(&target_level.target, target_level.level);
        }
        builder
    }
}

impl NodeLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn use_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }
    pub fn current_level(mut self, current_level: Level) -> Self {
        self.current_level = current_level;
        self
    }
    pub fn timestamp_format(mut self, timestamp_format: TimestampFormat) -> Self {
        self.timestamp_format = timestamp_format;
        self
    }
    pub fn output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }
    pub fn with_target_level(mut self, target: &str, level: Level) -> Self {
        self.target_levels.push((target.to_string(), level));
        self
    }
    pub fn build(mut self) -> NodeLogger {
        // Longest prefix first so `dg_full_node::mempool` wins over `dg_full_node`
        self.target_levels.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        NodeLogger {
            use_colors: self.use_colors,
            current_level: self.current_level,
            timestamp_format: self.timestamp_format,
            output: self.output,
            target_levels: self.target_levels,
            start_instant: Instant::now(),
            printed_error: AtomicBool::new(false),
            channel: Sender::new(1024),
        }
    }
    pub fn init(self) -> Result<Arc<NodeLogger>, SetLoggerError> {
        self.build().init()
    }
}

impl NodeLogger {
    pub fn builder() -> NodeLoggerBuilder {
        NodeLoggerBuilder::new()
    }
    pub fn from_config(config: &LoggingConfig) -> Result<Arc<Self>, SetLoggerError> {
        NodeLoggerBuilder::from(config).init()
    }
    pub fn init(self) -> Result<Arc<Self>, SetLoggerError> {
        let logger = Arc::new(self);
        // SAFETY: the leaked clone keeps the allocation alive for the rest of the process,
        // which is what `log::set_logger` requires of its argument.
        let static_logger: &'static Self = unsafe { &*Arc::into_raw(logger.clone()) };
        log::set_logger(static_logger).map(|_| {
            log::set_max_level(logger.max_level());
            logger
        })
    }
    pub fn subscribe(&self) -> Receiver<LogEvent> {
        self.channel.subscribe()
    }
    fn max_level(&self) -> LevelFilter {
        self.target_levels
            .iter()
            .map(|(_, l)| l.to_level_filter())
            .chain(std::iter::once(self.current_level.to_level_filter()))
            .max()
            .unwrap_or(LevelFilter::Info)
    }
    fn timestamp(&self) -> OffsetDateTime {
        match self.timestamp_format {
            TimestampFormat::Local => match OffsetDateTime::now_local() {
                Ok(local) => local,
                Err(_) => {
                    if !self.printed_error.swap(true, Ordering::SeqCst) {
                        warn!("Failed to detect Local Offset, Defaulting to UTC")
                    }
                    OffsetDateTime::now_utc()
                }
            },
            _ => OffsetDateTime::now_utc(),
        }
    }
    fn format_timestamp(&self, timestamp: &OffsetDateTime) -> String {
        match self.timestamp_format {
            TimestampFormat::Local => timestamp.format(&TIMESTAMP_FORMAT_LOCAL),
            TimestampFormat::Utc => timestamp.format(&TIMESTAMP_FORMAT_UTC),
            TimestampFormat::Relative => {
                let duration = Instant::now().duration_since(self.start_instant);
                let total_seconds = duration.as_secs();
                return format!(
                    "{:02}:{:02}:{:02}.{:03}",
                    total_seconds / 3600,
                    (total_seconds % 3600) / 60,
                    total_seconds % 60,
                    duration.subsec_millis()
                );
            }
        }
        .unwrap_or_default()
    }
    #[cfg(feature = "color")]
    fn level_prefix(&self, level: Level) -> String {
        let level_str = format!("{:<5}", level.to_string());
        if self.use_colors {
            match level {
                Level::Error => level_str.red().to_string(),
                Level::Warn => level_str.yellow().to_string(),
                Level::Info => level_str.cyan().to_string(),
                Level::Debug => level_str.purple().to_string(),
                Level::Trace => level_str.magenta().to_string(),
            }
        } else {
            level_str
        }
    }
    #[cfg(not(feature = "color"))]
    fn level_prefix(&self, level: Level) -> String {
        format!("{:<5}", level.to_string())
    }
}

fn serialize_level<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&level.to_string().to_lowercase())
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "error" => Ok(Level::Error),
        "warn" | "warning" => Ok(Level::Warn),
        "info" => Ok(Level::Info),
        "debug" => Ok(Level::Debug),
        "trace" => Ok(Level::Trace),
        _ => Err(D::Error::custom(format!("Unknown log level: {}", s))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(
        serialize_with = "serialize_level",
        deserialize_with = "deserialize_level"
    )]
    pub level: Level,
    pub target: String,
    pub message: String,
    pub timestamp: OffsetDateTime,
}
impl LogEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

impl Log for NodeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self
            .target_levels
            .iter()
            .find(|(pattern, _)| metadata.target().starts_with(pattern))
        {
            Some((_, level)) => metadata.level() <= *level,
            None => metadata.level() <= self.current_level,
        }
    }

    fn log(&self, record: &Record) {
        let log_event = LogEvent {
            level: record.level(),
            target: if record.target().is_empty() {
                record.module_path().unwrap_or_default()
            } else {
                record.target()
            }
            .to_string(),
            message: record.args().to_string(),
            timestamp: self.timestamp(),
        };
        if self.enabled(record.metadata()) {
            match self.output {
                OutputFormat::Json => println!("{}", log_event.to_json()),
                OutputFormat::Text => println!(
                    "{} {}[{}] {}",
                    self.format_timestamp(&log_event.timestamp),
                    self.level_prefix(log_event.level),
                    log_event.target,
                    log_event.message
                ),
            }
        }
        let _ = self.channel.send(log_event);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_levels_prefer_longest_prefix() {
        let logger = NodeLogger::builder()
            .current_level(Level::Info)
            .with_target_level("dg_full_node", Level::Warn)
            .with_target_level("dg_full_node::mempool", Level::Trace)
            .build();
        let meta = |target: &'static str, level| Metadata::builder().target(target).level(level).build();
        assert!(logger.enabled(&meta("dg_full_node::mempool::manager", Level::Debug)));
        assert!(!logger.enabled(&meta("dg_full_node::blockchain", Level::Info)));
        assert!(logger.enabled(&meta("other", Level::Info)));
        assert!(!logger.enabled(&meta("other", Level::Debug)));
        assert_eq!(logger.max_level(), LevelFilter::Trace);
    }

    #[test]
    fn test_logging_config_from_json() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level":"debug","target_levels":[{"target":"sqlx","level":"warning"}]}"#,
        )
        .unwrap();
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.target_levels[0].level, Level::Warn);
        assert!(config.use_colors);
        assert_eq!(config.output, OutputFormat::Text);
    }
}
