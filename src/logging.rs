use std::fmt::Display;

use log::LevelFilter;

/// Install the `env_logger` backend. `RUST_LOG` overrides `default_level`.
///
/// Returns `false` when a logger was already installed.
pub fn init_logging(default_level: LevelFilter) -> bool {
    let installed = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init()
        .is_ok();
    if !installed {
        eprintln!("Warning: Logging system already initialized");
    }
    installed
}

/// Parse a level name such as `"debug"`, falling back to `Info`.
pub fn level_from_name(name: &str) -> LevelFilter {
    name.parse().unwrap_or(LevelFilter::Info)
}

/// Log an error at error level, prefixed with `context` when given.
pub fn log_error_with_context(error: &dyn Display, context: Option<&str>) {
    match context {
        Some(ctx) => log::error!("{ctx}: {error}"),
        None => log::error!("{error}"),
    }
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_error_with_context(error, context);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    #[test]
    fn given_level_names_when_parsing_then_unknown_falls_back_to_info() {
        assert_eq!(level_from_name("debug"), LevelFilter::Debug);
        assert_eq!(level_from_name("WARN"), LevelFilter::Warn);
        assert_eq!(level_from_name("chatty"), LevelFilter::Info);
    }

    #[test]
    fn given_failed_result_when_logging_then_result_is_passed_through() {
        let result: Result<(), DecodeError> = Err(DecodeError::corrupt(4, "bad tag"));
        let logged = result.log_error(Some("decoding"));
        assert!(matches!(logged, Err(DecodeError::CorruptFormat { offset: 4, .. })));
    }
}
