//! Logging initialization module

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Logging profile configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable progress lines
    Development,
    /// JSON structured output, one object per event
    Production,
}

const DEFAULT_FILTER: &str = "folio=info";

static INIT_ONCE: Once = Once::new();

/// Initialize the logging facility
///
/// Safe to call more than once; only the first call installs a subscriber.
/// Events go to stderr so that command output on stdout stays machine
/// readable. `RUST_LOG` overrides the default `folio=info` filter.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        match profile {
            Profile::Development => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .try_init()
                    .ok();
            }
            Profile::Production => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init()
                    .ok();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_equality() {
        assert_eq!(Profile::Development, Profile::Development);
        assert_ne!(Profile::Development, Profile::Production);
    }
}
