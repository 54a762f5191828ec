//! Tracing setup

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL` when set.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Plain => builder.try_init(),
    };

    if result.is_ok() {
        tracing::info!(level = %config.level, format = ?config.format, "tracing initialized");
    }
}

/// Card tokens and masks are only ever logged through this.
pub fn mask_card_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_last_four() {
        assert_eq!(mask_card_token("tok_1234567890"), "**********7890");
        assert_eq!(mask_card_token("1234"), "****");
        assert_eq!(mask_card_token(""), "");
    }

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Plain,
        };
        init_tracing(&config);
        init_tracing(&config);
    }
}
