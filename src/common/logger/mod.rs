use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::*;
pub(crate) use writer::*;

use crate::configs::Config;

/// Builds the `EnvFilter` directive string from `[logging]`.
///
/// Websocket and TLS internals are kept at `warn` so handshake traces stay readable.
pub fn filter_directives(config: &Config) -> String {
    let level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");

    let filters = config
        .logging
        .as_ref()
        .and_then(|l| l.filters.as_deref())
        .unwrap_or("");

    let base = format!("{},tungstenite=warn,tokio_tungstenite=warn,rustls=warn", level);
    if filters.is_empty() {
        base
    } else {
        format!("{},{}", base, filters)
    }
}

pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(LineFormatter::new(true))
        .with_ansi(true);

    let file_layer = config
        .logging
        .as_ref()
        .and_then(|l| l.file.as_ref())
        .map(|file_config| {
            if let Some(parent) = Path::new(&file_config.path).parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!("Failed to create log directory: {}", e);
                }
            }

            fmt::layer()
                .with_writer(CircularFileWriter::new(
                    &file_config.path,
                    file_config.max_lines,
                ))
                .event_format(LineFormatter::new(false))
                .with_ansi(false)
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::LoggingConfig;

    #[test]
    fn directives_fall_back_to_info() {
        let config = Config::default();
        assert!(filter_directives(&config).starts_with("info,"));
    }

    #[test]
    fn directives_append_custom_filters() {
        let config = Config {
            logging: Some(LoggingConfig {
                level: Some("debug".into()),
                filters: Some("voxlink::gateway=trace".into()),
                file: None,
            }),
            ..Config::default()
        };
        let directives = filter_directives(&config);
        assert!(directives.starts_with("debug,"));
        assert!(directives.ends_with(",voxlink::gateway=trace"));
    }
}
