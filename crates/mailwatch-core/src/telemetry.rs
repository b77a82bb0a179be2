use std::fmt as StdFmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::{DefaultFields, FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Install the global subscriber: `RUST_LOG`-driven filter, console output
/// and an append-only log file, both in the plain text format. Calling it
/// again is a no-op.
pub fn init_logging(logging: &LoggingConfig) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;

    let file_layer = match logging.file.as_deref() {
        Some(path) => Some(text_layer(Mutex::new(open_log_file(path)?))),
        None => None,
    };
    let console_layer = logging.console.then(|| text_layer(std::io::stdout));

    let subscriber = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;
    let _ = INSTALLED.set(());

    Ok(())
}

/// A `fmt` layer writing [`TextFormatter`] lines to `make_writer`.
pub fn text_layer<S, W>(make_writer: W) -> fmt::Layer<S, DefaultFields, TextFormatter, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer()
        .event_format(TextFormatter)
        .with_writer(make_writer)
}

fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    let to_err = |source| TelemetryError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_err)?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)
}

/// `2024-05-01 08:30:00,123 - INFO - message key=value`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl<S, N> FormatEvent<S, N> for TextFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> StdFmt::Result {
        let mut visitor = TextVisitor::default();
        event.record(&mut visitor);

        write!(
            writer,
            "{} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            event.metadata().level(),
            visitor.message
        )?;
        for (name, value) in &visitor.fields {
            write!(writer, " {name}={value}")?;
        }
        writer.write_str("\n")
    }
}

#[derive(Default)]
struct TextVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl TextVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl tracing_subscriber::field::Visit for TextVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn StdFmt::Debug) {
        self.push(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut locked = self.buf.lock().expect("lock buffer");
            locked.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let buffer = buffer.clone();
            move || BufferWriter {
                buf: buffer.clone(),
            }
        };

        let subscriber = Registry::default().with(text_layer(writer));
        tracing::subscriber::with_default(subscriber, f);

        String::from_utf8(buffer.lock().expect("lock buffer").clone()).expect("utf8 output")
    }

    #[test]
    fn text_formatter_writes_timestamp_level_and_message() {
        let output = capture(|| tracing::info!("Authenticated as: user@example.com"));
        let line = output.lines().next().expect("log line");

        let (timestamp, rest) = line.split_once(" - ").expect("separator");
        assert_eq!(rest, "INFO - Authenticated as: user@example.com");
        assert!(
            chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S,%3f").is_ok(),
            "timestamp should be local asctime, got {timestamp}"
        );
    }

    #[test]
    fn text_formatter_appends_extra_fields() {
        let output = capture(|| tracing::error!(status = 400, path = "x", "refresh rejected"));
        let line = output.lines().next().expect("log line");

        assert!(line.contains(" - ERROR - refresh rejected"));
        assert!(line.ends_with(" status=400 path=x"));
    }

    #[test]
    fn init_logging_is_idempotent_and_appends_to_file() {
        let dir = TempDir::new().expect("temp dir");
        let log_path = dir.path().join("logs/gmail_watch.log");
        fs::create_dir_all(log_path.parent().unwrap()).expect("create log dir");
        fs::write(&log_path, "previous run\n").expect("seed log");

        let logging = LoggingConfig {
            file: Some(log_path.clone()),
            console: false,
            level: "info".into(),
        };

        init_logging(&logging).expect("logging initializes");
        init_logging(&logging).expect("second init is a no-op");
        tracing::info!("written to file");

        let contents = fs::read_to_string(&log_path).expect("read log");
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains(" - INFO - written to file"));
    }
}
