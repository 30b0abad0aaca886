use std::path::PathBuf;
use std::sync::Once;

use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

// Log targets
pub const DETECT: &str = "stencil::detect";
pub const TEXT_LAYER: &str = "stencil::text_layer";
pub const FORMS: &str = "stencil::forms";
pub const ANNOTATIONS: &str = "stencil::annotations";
pub const OCR: &str = "stencil::ocr";
pub const MERGE: &str = "stencil::merge";
pub const FONTS: &str = "stencil::fonts";
pub const FILL: &str = "stencil::fill";
pub const REDACT: &str = "stencil::redact";

const CONTENT_TARGETS: &[&str] = &[TEXT_LAYER, REDACT];

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: Level,
    /// Trace every content-stream decision of the extractor and redactor.
    pub debug_content: bool,
    /// `DEBUG_FONTS`: font resolution at debug level.
    pub debug_fonts: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            debug_content: false,
            debug_fonts: false,
            log_dir: None,
        }
    }
}

fn build_filter(options: &LogOptions) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(options.level.into())
        .from_env_lossy();

    if options.debug_fonts {
        if let Ok(directive) = format!("{}=debug", FONTS).parse() {
            filter = filter.add_directive(directive);
        }
    }
    if options.debug_content {
        for target in CONTENT_TARGETS {
            if let Ok(directive) = format!("{}=trace", target).parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Installs the global subscriber: stderr always, plus a non-blocking file
/// layer when `log_dir` is set. Keep the returned guard alive for the life
/// of the process or buffered file output is lost.
pub fn init_logging(options: &LogOptions) -> std::io::Result<Option<WorkerGuard>> {
    let mut guard = None;
    let file_layer = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::NEVER, dir, "stencil.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(writer)
                    .with_filter(build_filter(options)),
            )
        }
        None => None,
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(build_filter(options));

    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(guard)
}
