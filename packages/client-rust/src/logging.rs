//! Subscriber installation for applications embedding the client.
//!
//! The library itself only emits `tracing` events and spans; nothing is
//! printed until the host installs a subscriber, either its own or the one
//! built here.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Output format of [`init_logging`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn subscriber<W>(format: LogFormat, filter: EnvFilter, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    match format {
        LogFormat::Pretty => Box::new(builder.with_target(false).finish()),
        LogFormat::Json => Box::new(builder.json().with_current_span(true).finish()),
    }
}

/// Installs a global `fmt` subscriber on stdout filtered by `RUST_LOG`,
/// defaulting to `info`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(subscriber(format, env_filter(), std::io::stdout))
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self {
            self.clone()
        }
    }

    #[test]
    fn json_lines_carry_fields_and_respect_filter() {
        let out = Captured::default();
        let subscriber = subscriber(LogFormat::Json, EnvFilter::new("info"), out.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(attempt = 2, "retrying operation");
            tracing::debug!("below the filter");
        });

        let text = out.text();
        assert_eq!(text.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "retrying operation");
        assert_eq!(line["fields"]["attempt"], 2);
        assert_eq!(line["level"], "INFO");
    }

    #[test]
    fn pretty_lines_omit_target() {
        let out = Captured::default();
        let subscriber = subscriber(LogFormat::Pretty, EnvFilter::new("warn"), out.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("durability floor applied");
            tracing::info!("below the filter");
        });

        let text = out.text();
        assert!(text.contains("durability floor applied"));
        assert!(!text.contains("below the filter"));
        assert!(!text.contains("docbridge_client"));
    }
}
