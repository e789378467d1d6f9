//! Service configuration module.
//!
//! Contains the runtime configuration for the stemsep daemon: the HTTP bind
//! address, the input allowlist, normalization targets, and model selection.
//! Configuration is fixed at process start.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Audio file extensions accepted by default.
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &[".wav", ".flac", ".mp3", ".ogg", ".m4a"];

/// Subdirectory (next to the source file) that receives separated stems.
pub const SEPARATED_SUBDIR: &str = "separated";

/// Sample rate of normalized audio in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 8_000;

/// Channel count of normalized audio.
pub const TARGET_CHANNELS: u16 = 1;

/// Normalized audio is truncated to this many seconds.
pub const MAX_DURATION_SECS: u32 = 10;

/// Pretrained configuration loaded when none is specified.
pub const DEFAULT_MODEL_CONFIG: &str = "mossformer2_librimix_2spk";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Execution device for ONNX inference.
///
/// Determines which hardware backend to use for model inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Automatically detect and use the best available device.
    /// Priority: CUDA > Metal/CoreML (macOS) > CPU
    #[default]
    Auto,

    /// Force CPU execution.
    Cpu,

    /// Use CUDA for NVIDIA GPU acceleration.
    Cuda,

    /// Use CoreML for Apple Silicon acceleration.
    Metal,
}

impl Device {
    /// Returns the string representation of the device.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Metal => "metal",
        }
    }

    /// Parses a device from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Device::Auto),
            "cpu" => Some(Device::Cpu),
            "cuda" | "gpu" => Some(Device::Cuda),
            "metal" | "coreml" => Some(Device::Metal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target parameters for the normalization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Longer sources are truncated to this many seconds; shorter ones are
    /// left as is.
    pub max_duration_secs: u32,
}

impl NormalizationConfig {
    /// Marker inserted into normalized file names, e.g. `mono8k`.
    pub fn marker(&self) -> String {
        let layout = match self.channels {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            n => format!("{}ch", n),
        };
        let rate = if self.sample_rate % 1000 == 0 {
            format!("{}k", self.sample_rate / 1000)
        } else {
            format!("{}hz", self.sample_rate)
        };
        format!("{}{}", layout, rate)
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: TARGET_CHANNELS,
            max_duration_secs: MAX_DURATION_SECS,
        }
    }
}

/// Runtime configuration for the service.
///
/// Loaded from environment variables at startup and then overridden by
/// command-line arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Interface to bind the HTTP server to.
    pub host: String,

    /// Port to bind the HTTP server to.
    pub port: u16,

    /// Accepted source extensions, lowercase with a leading dot.
    pub audio_extensions: Vec<String>,

    /// Name of the stems directory created next to each source file.
    pub separated_subdir: String,

    /// Normalization targets.
    pub normalization: NormalizationConfig,

    /// Path or name of the ffmpeg executable.
    pub ffmpeg_path: PathBuf,

    /// Registry name of the pretrained configuration to load.
    pub model_config: String,

    /// Directory containing the checkpoint.
    /// If None, uses the platform-specific default cache location.
    pub model_path: Option<PathBuf>,

    /// URL to fetch the checkpoint from when it is missing locally.
    pub model_url: Option<String>,

    /// Expected SHA-256 (hex) of the checkpoint file.
    pub model_sha256: Option<String>,

    /// Execution device for inference.
    pub device: Device,

    /// Number of threads for intra-op parallelism in ONNX Runtime.
    /// If None, uses ONNX Runtime's default (typically number of CPU cores).
    pub threads: Option<u32>,

    /// Defer loading the model until the first request.
    pub lazy_load: bool,
}

impl ServiceConfig {
    /// Creates a new ServiceConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ServiceConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `STEMSEP_HOST` - Interface to bind to
    /// - `STEMSEP_PORT` - Port to bind to
    /// - `STEMSEP_AUDIO_EXTS` - Comma-separated extension allowlist
    /// - `STEMSEP_FFMPEG` - ffmpeg executable
    /// - `STEMSEP_MODEL_CONFIG` - Pretrained configuration name
    /// - `STEMSEP_MODEL_PATH` - Checkpoint directory
    /// - `STEMSEP_MODEL_URL` - Checkpoint download URL
    /// - `STEMSEP_MODEL_SHA256` - Expected checkpoint digest
    /// - `STEMSEP_DEVICE` - Device selection (auto, cpu, cuda, metal)
    /// - `STEMSEP_THREADS` - Number of threads for CPU execution
    /// - `STEMSEP_LAZY_LOAD` - Load the model on first request (1/true)
    ///
    /// Falls back to defaults for unset or unparsable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("STEMSEP_HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }

        if let Ok(port_str) = std::env::var("STEMSEP_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                config.port = port;
            }
        }

        if let Ok(exts) = std::env::var("STEMSEP_AUDIO_EXTS") {
            let parsed = parse_extension_list(&exts);
            if !parsed.is_empty() {
                config.audio_extensions = parsed;
            }
        }

        if let Ok(path) = std::env::var("STEMSEP_FFMPEG") {
            config.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(name) = std::env::var("STEMSEP_MODEL_CONFIG") {
            config.model_config = name;
        }

        if let Ok(path) = std::env::var("STEMSEP_MODEL_PATH") {
            config.model_path = Some(PathBuf::from(path));
        }

        if let Ok(url) = std::env::var("STEMSEP_MODEL_URL") {
            config.model_url = Some(url);
        }

        if let Ok(digest) = std::env::var("STEMSEP_MODEL_SHA256") {
            config.model_sha256 = Some(digest.to_lowercase());
        }

        if let Ok(device_str) = std::env::var("STEMSEP_DEVICE") {
            if let Some(device) = Device::parse(&device_str) {
                config.device = device;
            }
        }

        if let Ok(threads_str) = std::env::var("STEMSEP_THREADS") {
            if let Ok(threads) = threads_str.parse::<u32>() {
                if threads > 0 {
                    config.threads = Some(threads);
                }
            }
        }

        if let Ok(lazy) = std::env::var("STEMSEP_LAZY_LOAD") {
            config.lazy_load = matches!(lazy.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Returns the effective checkpoint directory, using platform defaults if not specified.
    pub fn effective_model_path(&self) -> PathBuf {
        if let Some(ref path) = self.model_path {
            path.clone()
        } else {
            default_model_path(&self.model_config)
        }
    }

    /// Returns the `host:port` string to bind to.
    ///
    /// IPv6 literals are bracketed; host names are passed through.
    pub fn bind_addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if let Some(threads) = self.threads {
            if threads == 0 {
                return Some("threads must be > 0".to_string());
            }
            if threads > 256 {
                return Some(format!("threads too high: {} (max 256)", threads));
            }
        }

        if self.audio_extensions.is_empty() {
            return Some("audio extension allowlist is empty".to_string());
        }

        let subdir = self.separated_subdir.trim();
        if subdir.is_empty()
            || subdir == "."
            || subdir == ".."
            || subdir.contains('/')
            || subdir.contains(std::path::MAIN_SEPARATOR)
        {
            return Some(format!(
                "separated_subdir must be a single directory name, got '{}'",
                self.separated_subdir
            ));
        }

        if self.normalization.sample_rate == 0 {
            return Some("target sample rate must be > 0".to_string());
        }
        if self.normalization.channels == 0 {
            return Some("target channel count must be > 0".to_string());
        }
        if self.normalization.max_duration_secs == 0 {
            return Some("maximum duration must be > 0".to_string());
        }

        if let Some(ref digest) = self.model_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some("model_sha256 must be 64 hex characters".to_string());
            }
        }

        None
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            separated_subdir: SEPARATED_SUBDIR.to_string(),
            normalization: NormalizationConfig::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            model_config: DEFAULT_MODEL_CONFIG.to_string(),
            model_path: None,
            model_url: None,
            model_sha256: None,
            device: Device::Auto,
            threads: None,
            lazy_load: false,
        }
    }
}

/// Normalizes an extension to lowercase with a leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Parses a comma-separated extension list, skipping blanks.
pub fn parse_extension_list(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|e| !e.trim().is_empty())
        .map(normalize_extension)
        .collect()
}

/// Returns the platform-specific default checkpoint directory.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Caches/stemsep/models/<config>
/// - Linux: ~/.cache/stemsep/models/<config>
/// - Windows: C:\Users\<user>\AppData\Local\stemsep\cache\models\<config>
fn default_model_path(model_config: &str) -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "stemsep") {
        proj_dirs.cache_dir().join("models").join(model_config)
    } else {
        // Fallback to current directory
        PathBuf::from("./models").join(model_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_parsing() {
        assert_eq!(Device::parse("auto"), Some(Device::Auto));
        assert_eq!(Device::parse("CPU"), Some(Device::Cpu));
        assert_eq!(Device::parse("cuda"), Some(Device::Cuda));
        assert_eq!(Device::parse("metal"), Some(Device::Metal));
        assert_eq!(Device::parse("coreml"), Some(Device::Metal));
        assert_eq!(Device::parse("invalid"), None);
    }

    #[test]
    fn device_display() {
        assert_eq!(Device::Auto.to_string(), "auto");
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Metal.to_string(), "metal");
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = ServiceConfig::new();
        assert_eq!(config.normalization.sample_rate, 8000);
        assert_eq!(config.normalization.channels, 1);
        assert_eq!(config.normalization.max_duration_secs, 10);
        assert_eq!(config.separated_subdir, "separated");
        assert_eq!(config.model_config, "mossformer2_librimix_2spk");
        assert_eq!(
            config.audio_extensions,
            vec![".wav", ".flac", ".mp3", ".ogg", ".m4a"]
        );
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn normalization_marker() {
        assert_eq!(NormalizationConfig::default().marker(), "mono8k");
        let stereo = NormalizationConfig {
            sample_rate: 44_100,
            channels: 2,
            max_duration_secs: 10,
        };
        assert_eq!(stereo.marker(), "stereo44100hz");
    }

    #[test]
    fn config_validation() {
        let mut config = ServiceConfig::new();
        assert!(config.validate().is_none());

        config.threads = Some(0);
        assert!(config.validate().is_some());

        config.threads = Some(4);
        assert!(config.validate().is_none());

        config.audio_extensions.clear();
        assert!(config.validate().is_some());
    }

    #[test]
    fn config_validation_rejects_nested_subdir() {
        let mut config = ServiceConfig::new();
        config.separated_subdir = format!("a{}b", std::path::MAIN_SEPARATOR);
        assert!(config.validate().is_some());
    }

    #[test]
    fn config_validation_rejects_dot_subdirs() {
        let mut config = ServiceConfig::new();
        for subdir in [".", "..", " .. "] {
            config.separated_subdir = subdir.to_string();
            assert!(config.validate().is_some(), "accepted {:?}", subdir);
        }
        config.separated_subdir = "..stems".to_string();
        assert!(config.validate().is_none());
    }

    #[test]
    fn bind_addr_brackets_ipv6() {
        let mut config = ServiceConfig::new();
        config.host = "::".to_string();
        assert_eq!(config.bind_addr(), "[::]:8000");
        assert!(config.bind_addr().parse::<SocketAddr>().is_ok());

        config.host = "127.0.0.1".to_string();
        config.port = 9000;
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");

        config.host = "localhost".to_string();
        assert_eq!(config.bind_addr(), "localhost:9000");
    }

    #[test]
    fn config_validation_rejects_bad_digest() {
        let mut config = ServiceConfig::new();
        config.model_sha256 = Some("abc".to_string());
        assert!(config.validate().is_some());
        config.model_sha256 = Some("a".repeat(64));
        assert!(config.validate().is_none());
    }

    #[test]
    fn extension_list_parsing() {
        assert_eq!(
            parse_extension_list("wav, .FLAC,,mp3 "),
            vec![".wav", ".flac", ".mp3"]
        );
        assert_eq!(normalize_extension("WAV"), ".wav");
    }

    #[test]
    fn effective_model_path_uses_config_name() {
        let config = ServiceConfig::new();
        let path = config.effective_model_path();
        assert!(path.ends_with("mossformer2_librimix_2spk"));

        let config = ServiceConfig {
            model_path: Some(PathBuf::from("/models/custom")),
            ..ServiceConfig::default()
        };
        assert_eq!(config.effective_model_path(), PathBuf::from("/models/custom"));
    }
}
