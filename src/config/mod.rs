mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, PartialSettings, RateLimitSettings, ServerSettings, Settings, StorageSettings,
};

/// Loads the configuration from `config/default.*` and the environment.
///
/// A `.env` file is read first if present. Environment keys look like
/// `CHANHUB_SERVER__PORT` or `CHANHUB_RATE_LIMIT__BURST`; they override the
/// file, and anything left unset falls back to [`Settings::default`].
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CHANHUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merged(partial))
}
