use env_logger::{Builder, WriteStyle};
use log::{LevelFilter, SetLoggerError};

use std::io::Write;

pub const LOG_ENV: &str = "NEWENGINE_LOG";
pub const LOG_COLORS_ENV: &str = "NEWENGINE_LOG_COLORS";
pub const LOG_MODULE_ENV: &str = "NEWENGINE_LOG_MODULE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLoggerConfig {
    pub level: LevelFilter,
    /// Extra `env_logger` directives, e.g. `newengine_timeslicer=trace`.
    pub directives: Option<String>,
    pub colors: bool,
    pub include_module: bool,
}

impl ConsoleLoggerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `NEWENGINE_LOG` takes either a bare level (`debug`) or a directive list
    /// (`info,newengine_timeslicer=trace`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (level, directives) = match lookup(LOG_ENV) {
            Some(v) => match v.trim().parse::<LevelFilter>() {
                Ok(level) => (level, None),
                Err(_) if v.trim().is_empty() => (LevelFilter::Info, None),
                Err(_) => (LevelFilter::Info, Some(v.trim().to_owned())),
            },
            None => (LevelFilter::Info, None),
        };
        let colors = lookup(LOG_COLORS_ENV).map(|v| v != "0").unwrap_or(true);
        let include_module = lookup(LOG_MODULE_ENV).map(|v| v != "0").unwrap_or(true);

        Self {
            level,
            directives,
            colors,
            include_module,
        }
    }

    fn builder(&self) -> Builder {
        let mut builder = Builder::new();
        builder.filter_level(self.level);
        if let Some(directives) = &self.directives {
            builder.parse_filters(directives);
        }
        builder.write_style(if self.colors {
            WriteStyle::Auto
        } else {
            WriteStyle::Never
        });

        let include_module = self.include_module;
        builder.format(move |buf, record| {
            let style = buf.default_level_style(record.level());
            if include_module {
                writeln!(
                    buf,
                    "[{style}{:<5}{style:#}] {:<25} {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "[{style}{:<5}{style:#}] {}",
                    record.level(),
                    record.args()
                )
            }
        });
        builder
    }
}

impl Default for ConsoleLoggerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Installs the console logger as the process-wide `log` backend.
///
/// Fails if another logger is already installed; callers that may race (tests) can ignore it.
pub fn install_console_logger(config: &ConsoleLoggerConfig) -> Result<(), SetLoggerError> {
    config.builder().try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = ConsoleLoggerConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.level, LevelFilter::Info);
        assert!(cfg.directives.is_none());
        assert!(cfg.colors);
        assert!(cfg.include_module);
    }

    #[test]
    fn bare_level_and_switches() {
        let cfg = ConsoleLoggerConfig::from_lookup(lookup(&[
            (LOG_ENV, "debug"),
            (LOG_COLORS_ENV, "0"),
            (LOG_MODULE_ENV, "0"),
        ]));
        assert_eq!(cfg.level, LevelFilter::Debug);
        assert!(!cfg.colors);
        assert!(!cfg.include_module);
    }

    #[test]
    fn directive_list_is_kept_verbatim() {
        let cfg = ConsoleLoggerConfig::from_lookup(lookup(&[(
            LOG_ENV,
            "warn,newengine_timeslicer=trace",
        )]));
        assert_eq!(cfg.level, LevelFilter::Info);
        assert_eq!(
            cfg.directives.as_deref(),
            Some("warn,newengine_timeslicer=trace")
        );
    }

    #[test]
    fn second_install_fails() {
        let cfg = ConsoleLoggerConfig::from_lookup(lookup(&[(LOG_ENV, "off")]));
        let _ = install_console_logger(&cfg);
        assert!(install_console_logger(&cfg).is_err());
    }
}
