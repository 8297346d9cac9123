use tracing::warn;

use crate::config;

/// Settings from disk, or defaults when the file is unreadable or invalid.
pub fn load_settings() -> config::Settings {
    match config::Settings::load() {
        Ok(s) => {
            if let Err(msg) = s.validate() {
                warn!(%msg, "invalid config, using defaults");
                config::Settings::default()
            } else {
                s
            }
        }
        Err(err) => {
            // Config is optional; failures should not prevent the player from starting.
            warn!(%err, "failed to load config, using defaults");
            config::Settings::default()
        }
    }
}
