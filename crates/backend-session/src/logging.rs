//! Tracing bootstrap for processes embedding the session layer.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,backend_session=debug";

/// Initialize the global tracing subscriber with severity gating from environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `CHATCORE_SESSION_LOG`
/// 3) `CHATCORE_LOG`
/// 4) internal default filter
///
/// A subscriber installed earlier wins; this call is then a no-op.
pub fn init() {
    let env_filter = filter_from_lookup(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_lookup<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    filter_directives(lookup)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// First non-blank, parseable directive string in precedence order.
fn filter_directives<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    [EnvFilter::DEFAULT_ENV, "CHATCORE_SESSION_LOG", "CHATCORE_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
        .find(|value| EnvFilter::try_new(value).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn rust_log_takes_precedence() {
        let lookup = lookup_from(&[
            ("RUST_LOG", "warn"),
            ("CHATCORE_SESSION_LOG", "trace"),
            ("CHATCORE_LOG", "debug"),
        ]);
        assert_eq!(filter_directives(lookup).as_deref(), Some("warn"));
    }

    #[test]
    fn falls_through_blank_values() {
        let lookup = lookup_from(&[("RUST_LOG", "  "), ("CHATCORE_LOG", "debug")]);
        assert_eq!(filter_directives(lookup).as_deref(), Some("debug"));

        let lookup = lookup_from(&[("CHATCORE_SESSION_LOG", "backend_session=trace")]);
        assert_eq!(
            filter_directives(lookup).as_deref(),
            Some("backend_session=trace")
        );
    }

    #[test]
    fn default_filter_when_nothing_usable() {
        assert_eq!(filter_directives(lookup_from(&[])), None);
        let filter = filter_from_lookup(lookup_from(&[]));
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }
}
