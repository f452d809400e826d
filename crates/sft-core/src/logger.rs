//! Process-wide logging for the `sft` binary and tests.
//!
//! [`init_logging`] is the single entry point. Without the `tracing` feature
//! records go to stderr as `LEVEL target: message`; with it a `RUST_LOG`
//! filtered subscriber is installed, optionally writing JSON lines.

use log::LevelFilter;

/// Warnings by default, then info, then debug for each repeated `-v`.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Install logging once; later calls leave the first setup in place.
///
/// `json` only takes effect with the `tracing` feature. There `RUST_LOG`
/// overrides `level` when set.
pub fn init_logging(level: LevelFilter, json: bool) {
    #[cfg(feature = "tracing")]
    subscriber::install(level, json);
    #[cfg(not(feature = "tracing"))]
    {
        let _ = json;
        stderr::install(level);
    }
}

#[cfg(not(feature = "tracing"))]
mod stderr {
    use std::io::Write;
    use std::sync::OnceLock;

    use log::{LevelFilter, Log, Metadata, Record};

    struct Sink(LevelFilter);

    impl Log for Sink {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.0
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let _ = writeln!(
                    std::io::stderr().lock(),
                    "{:<5} {}: {}",
                    record.level(),
                    record.target(),
                    record.args()
                );
            }
        }

        fn flush(&self) {
            let _ = std::io::stderr().flush();
        }
    }

    static SINK: OnceLock<Sink> = OnceLock::new();

    pub(super) fn install(level: LevelFilter) {
        let mut fresh = false;
        let sink = SINK.get_or_init(|| {
            fresh = true;
            Sink(level)
        });
        if fresh && log::set_logger(sink).is_ok() {
            log::set_max_level(level);
        }
    }
}

#[cfg(feature = "tracing")]
mod subscriber {
    use log::LevelFilter;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    pub(super) fn install(level: LevelFilter, json: bool) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_ascii_lowercase()));
        let builder = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr);
        let _ = if json {
            builder.json().flatten_event(true).finish().try_init()
        } else {
            builder.compact().finish().try_init()
        };
    }
}
