use crate::overlay::FitPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LivescanConfig {
    pub camera: CameraConfig,
    pub sampling: SamplingConfig,
    pub encoder: EncoderConfig,
    pub client: ClientConfig,
    pub overlay: OverlayConfig,
    pub session: SessionConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Explicit device identifier; when unset the facing preference decides
    #[serde(default)]
    pub device_id: Option<String>,

    /// Preferred camera facing when no device id is given
    #[serde(default = "default_camera_facing")]
    pub facing: FacingMode,

    /// Ideal capture resolution (width, height); devices may deliver another size
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamplingConfig {
    /// Period between sampling ticks in milliseconds
    #[serde(default = "default_sampling_period_ms")]
    pub period_ms: u64,

    /// Start sampling as soon as the stream is live
    #[serde(default = "default_sampling_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    #[serde(default = "default_encoder_max_width")]
    pub max_width: u32,

    #[serde(default = "default_encoder_max_height")]
    pub max_height: u32,

    /// JPEG quality in (0, 1]
    #[serde(default = "default_encoder_quality")]
    pub quality: f32,

    /// Largest payload the endpoint accepts
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Classification endpoint URL
    #[serde(default = "default_client_endpoint")]
    pub endpoint: String,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first failed attempt of a tick
    #[serde(default = "default_client_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry
    #[serde(default = "default_client_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay
    #[serde(default = "default_client_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How confidence values in responses are scaled
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: ConfidenceScale,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OverlayConfig {
    /// How the stream is fit into the display surface
    #[serde(default = "default_overlay_fit")]
    pub fit: FitPolicy,

    /// Lower bound on box stroke width in display pixels
    #[serde(default = "default_min_stroke_width")]
    pub min_stroke_width: f64,

    /// Corner accent length as a fraction of the smaller box side
    #[serde(default = "default_corner_accent_ratio")]
    pub corner_accent_ratio: f64,

    /// Category to `#rrggbb` color overrides
    #[serde(default)]
    pub category_colors: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Number of outcomes kept in the rolling history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    Back,
    Front,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Back => "back",
            FacingMode::Front => "front",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// Values above 1.0 are read as percentages
    Auto,
    /// Values are already in 0.0..=1.0
    Unit,
    /// Values are in 0..=100
    Percent,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl SamplingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl LivescanConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("livescan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.facing", default_camera_facing().as_str())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("sampling.period_ms", default_sampling_period_ms())?
            .set_default("sampling.enabled", default_sampling_enabled())?
            .set_default("encoder.max_width", default_encoder_max_width())?
            .set_default("encoder.max_height", default_encoder_max_height())?
            .set_default("encoder.quality", default_encoder_quality() as f64)?
            .set_default(
                "encoder.max_payload_bytes",
                default_max_payload_bytes() as i64,
            )?
            .set_default("client.endpoint", default_client_endpoint())?
            .set_default("client.timeout_ms", default_client_timeout_ms())?
            .set_default("client.max_retries", default_client_max_retries())?
            .set_default("client.base_delay_ms", default_client_base_delay_ms())?
            .set_default("client.max_delay_ms", default_client_max_delay_ms())?
            .set_default("client.confidence_scale", "auto")?
            .set_default("overlay.fit", "crop_to_fill")?
            .set_default("overlay.min_stroke_width", default_min_stroke_width())?
            .set_default("overlay.corner_accent_ratio", default_corner_accent_ratio())?
            .set_default(
                "session.history_capacity",
                default_history_capacity() as i64,
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // LIVESCAN_CLIENT__MAX_RETRIES=1 style overrides
            .add_source(
                Environment::with_prefix("LIVESCAN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: LivescanConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.sampling.period_ms == 0 {
            return Err(ConfigError::Message(
                "Sampling period_ms must be greater than 0".to_string(),
            ));
        }

        if self.encoder.max_width == 0 || self.encoder.max_height == 0 {
            return Err(ConfigError::Message(
                "Encoder bounds must be greater than 0".to_string(),
            ));
        }

        if !(self.encoder.quality > 0.0 && self.encoder.quality <= 1.0) {
            return Err(ConfigError::Message(
                "Encoder quality must be in (0, 1]".to_string(),
            ));
        }

        if self.client.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Client timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.client.max_delay_ms < self.client.base_delay_ms {
            return Err(ConfigError::Message(
                "Client max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }

        if self.overlay.min_stroke_width <= 0.0 {
            return Err(ConfigError::Message(
                "Overlay min_stroke_width must be greater than 0".to_string(),
            ));
        }

        if self.session.history_capacity == 0 {
            return Err(ConfigError::Message(
                "Session history capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LivescanConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device_id: None,
                facing: default_camera_facing(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
            },
            sampling: SamplingConfig {
                period_ms: default_sampling_period_ms(),
                enabled: default_sampling_enabled(),
            },
            encoder: EncoderConfig {
                max_width: default_encoder_max_width(),
                max_height: default_encoder_max_height(),
                quality: default_encoder_quality(),
                max_payload_bytes: default_max_payload_bytes(),
            },
            client: ClientConfig {
                endpoint: default_client_endpoint(),
                timeout_ms: default_client_timeout_ms(),
                max_retries: default_client_max_retries(),
                base_delay_ms: default_client_base_delay_ms(),
                max_delay_ms: default_client_max_delay_ms(),
                confidence_scale: default_confidence_scale(),
            },
            overlay: OverlayConfig {
                fit: default_overlay_fit(),
                min_stroke_width: default_min_stroke_width(),
                corner_accent_ratio: default_corner_accent_ratio(),
                category_colors: HashMap::new(),
            },
            session: SessionConfig {
                history_capacity: default_history_capacity(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_facing() -> FacingMode {
    FacingMode::Back
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}

fn default_sampling_period_ms() -> u64 {
    1000
}
fn default_sampling_enabled() -> bool {
    true
}

fn default_encoder_max_width() -> u32 {
    1280
}
fn default_encoder_max_height() -> u32 {
    1280
}
fn default_encoder_quality() -> f32 {
    0.8
}
fn default_max_payload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_client_endpoint() -> String {
    "http://localhost:8000/api/classify-frame".to_string()
}
fn default_client_timeout_ms() -> u64 {
    10_000
}
fn default_client_max_retries() -> u32 {
    3
}
fn default_client_base_delay_ms() -> u64 {
    500
}
fn default_client_max_delay_ms() -> u64 {
    4_000
}
fn default_confidence_scale() -> ConfidenceScale {
    ConfidenceScale::Auto
}

fn default_overlay_fit() -> FitPolicy {
    FitPolicy::CropToFill
}
fn default_min_stroke_width() -> f64 {
    2.0
}
fn default_corner_accent_ratio() -> f64 {
    0.15
}

fn default_history_capacity() -> usize {
    50
}
fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LivescanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder.max_width, 1280);
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.session.history_capacity, 50);
        assert_eq!(config.overlay.fit, FitPolicy::CropToFill);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[client]
endpoint = "http://classifier.local/api/classify-frame"
max_retries = 1
max_delay_ms = 2000

[overlay]
fit = "letterbox_to_fit"

[camera]
facing = "front"
"#
        )
        .unwrap();

        let config = LivescanConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.client.max_retries, 1);
        assert_eq!(
            config.client.endpoint,
            "http://classifier.local/api/classify-frame"
        );
        assert_eq!(config.overlay.fit, FitPolicy::LetterboxToFit);
        assert_eq!(config.camera.facing, FacingMode::Front);
        // untouched sections keep their defaults
        assert_eq!(config.sampling.period_ms, 1000);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LivescanConfig::default();

        config.encoder.quality = 1.5;
        assert!(config.validate().is_err());
        config.encoder.quality = 0.8;

        config.client.base_delay_ms = 5_000;
        config.client.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
        config.client.max_delay_ms = 5_000;

        config.sampling.period_ms = 0;
        assert!(config.validate().is_err());
        config.sampling.period_ms = 500;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string(&LivescanConfig::default()).unwrap();
        assert!(rendered.contains("[client]"));
        assert!(rendered.contains("crop_to_fill"));
    }
}
