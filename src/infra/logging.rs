use std::io;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TAILBOARD_LOG";

/// Filter text from `TAILBOARD_LOG`, then `RUST_LOG`, then `info`.
pub fn log_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Logs go to stderr; stdout carries rendered rows.
pub fn init_tracing() {
    let directive = log_directive(|name| std::env::var(name).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_prefers_own_variable_then_rust_log() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |name: &str| {
                pairs
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.to_string())
            }
        };
        assert_eq!(log_directive(env(&[])), "info");
        assert_eq!(log_directive(env(&[("RUST_LOG", "warn")])), "warn");
        assert_eq!(
            log_directive(env(&[("RUST_LOG", "warn"), (LOG_ENV, "tailboard=debug")])),
            "tailboard=debug"
        );
        assert_eq!(log_directive(env(&[(LOG_ENV, " "), ("RUST_LOG", "error")])), "error");
    }
}
