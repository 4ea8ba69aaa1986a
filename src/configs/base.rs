use serde::{Deserialize, Serialize};

use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub voice: VoiceConfig,
  #[serde(default)]
  pub gateway: GatewayConfig,
  #[serde(default)]
  pub session: Option<SessionConfig>,
}

use crate::common::types::AnyResult;

impl Config {
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      "config.toml"
    } else if std::path::Path::new("config.default.toml").exists() {
      "config.default.toml"
    } else {
      return Err("config.toml or config.default.toml not found".into());
    };

    println!("Loading configuration from: {}", config_path);

    let config_str = std::fs::read_to_string(config_path)?;
    Self::parse(&config_str).map_err(|e| format!("{}: {}", config_path, e).into())
  }

  pub fn parse(config_str: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(config_str)?;
    config.voice.to_params()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.voice, VoiceConfig::default());
    assert_eq!(config.gateway, GatewayConfig::default());
    assert!(config.session.is_none());
  }

  #[test]
  fn sections_override_defaults() {
    let config = Config::parse(
      r#"
        [logging]
        level = "debug"

        [voice]
        frame_size = 480
        bitrate = 96000

        [gateway]
        discovery_attempts = 3

        [session]
        guild_id = "1"
        channel_id = "2"
        user_id = "3"
        session_id = "abc"
        token = "T"
        endpoint = "region.example.com:443"
      "#,
    )
    .unwrap();

    assert_eq!(config.voice.frame_size, 480);
    assert_eq!(config.voice.bitrate, 96_000);
    assert_eq!(config.gateway.discovery_attempts, 3);
    assert_eq!(config.gateway.frame_queue_capacity, 16);
    let session = config.session.unwrap();
    assert_eq!(session.endpoint, "region.example.com:443");
    assert_eq!(session.idle_leave_secs, 1);
  }

  #[test]
  fn unsupported_frame_size_is_rejected() {
    let err = Config::parse("[voice]\nframe_size = 1000\n").unwrap_err();
    assert!(err.to_string().contains("2.5ms, 5ms, 10ms, or 20ms"));
  }
}
