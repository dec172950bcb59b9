//! Configuration system
//!
//! [`NetworkSettings`] is the bundle a server pushes to every client during
//! the handshake; [`ReplicationConfig`] holds the manager-level attributes.
//! Both can be loaded from `.toml` or `.ron` files through [`Config`].

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Value out of range
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Replication settings shared by server and clients.
///
/// The server sends its copy inside the `Configure` handshake message, so a
/// client always runs with the server's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network frames per second
    pub update_frequency: u32,
    /// Seconds of object history kept by the server
    pub server_tracing_duration: f32,
    /// Seconds of object history kept by a client
    pub client_tracing_duration: f32,
    /// Frames the client input time runs ahead of the replica time
    pub input_delay_frames: u32,
    /// Seconds the replica time trails the latest server frame
    pub interpolation_delay: f32,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            update_frequency: 30,
            server_tracing_duration: 3.0,
            client_tracing_duration: 3.0,
            input_delay_frames: 0,
            interpolation_delay: 0.1,
        }
    }
}

impl NetworkSettings {
    /// Duration of one network frame in seconds
    pub fn frame_duration(&self) -> f32 {
        1.0 / self.update_frequency.max(1) as f32
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_frequency == 0 {
            return Err(ConfigError::Invalid("update_frequency must be at least 1".to_string()));
        }
        if self.server_tracing_duration < 0.0 || self.client_tracing_duration < 0.0 {
            return Err(ConfigError::Invalid("tracing durations cannot be negative".to_string()));
        }
        if self.interpolation_delay < 0.0 {
            return Err(ConfigError::Invalid("interpolation_delay cannot be negative".to_string()));
        }
        Ok(())
    }
}

impl Config for NetworkSettings {}

/// Attributes of a [`ReplicationManager`](crate::replication::ReplicationManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Server advances its clock only in whole fixed frames
    pub is_fixed_update_server: bool,
    /// Server broadcasts its clock even on ticks that advanced no frame
    pub allow_zero_updates_on_server: bool,
    /// Settings used when this process acts as server
    pub settings: NetworkSettings,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            is_fixed_update_server: false,
            allow_zero_updates_on_server: false,
            settings: NetworkSettings::default(),
        }
    }
}

impl Config for ReplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        let mut path = std::env::temp_dir();
        path.push(format!("replica_engine_{}_{}", std::process::id(), name));
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = NetworkSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.update_frequency, 30);
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let settings = NetworkSettings { update_frequency: 0, ..Default::default() };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
        // Never divides by zero
        assert!(settings.frame_duration().is_finite());
    }

    #[test]
    fn test_toml_file_round_trip() {
        let path = temp_path("replication.toml");
        let mut config = ReplicationConfig::default();
        config.allow_zero_updates_on_server = true;
        config.settings.update_frequency = 60;

        config.save_to_file(&path).unwrap();
        let loaded = ReplicationConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_partial_file_uses_defaults() {
        let path = temp_path("settings.ron");
        std::fs::write(&path, "(update_frequency: 20)").unwrap();
        let loaded = NetworkSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.update_frequency, 20);
        assert_eq!(loaded.client_tracing_duration, NetworkSettings::default().client_tracing_duration);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = NetworkSettings::default().save_to_file("settings.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
