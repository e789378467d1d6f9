//! CLI argument parser.
//!
//! Every flag is optional and overrides the matching environment variable
//! read by [`ServiceConfig::from_env`].

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{parse_extension_list, Device, ServiceConfig};

/// Execution device selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    /// Pick the best available accelerator, falling back to CPU
    #[default]
    Auto,
    /// Force CPU execution
    Cpu,
    /// NVIDIA GPU via CUDA
    Cuda,
    /// Apple Silicon via CoreML
    Metal,
}

impl From<DeviceArg> for Device {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Auto => Device::Auto,
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Cuda => Device::Cuda,
            DeviceArg::Metal => Device::Metal,
        }
    }
}

/// stemsep-daemon: HTTP service that splits an audio file into speaker stems
#[derive(Parser, Debug, Default)]
#[command(name = "stemsep-daemon")]
#[command(about = "HTTP service that separates a mixed audio file into per-speaker stems")]
#[command(version)]
pub struct Cli {
    /// Interface to bind to (default 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default 8000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Allowed source extension; repeat or comma-separate to allow several
    #[arg(long = "audio-ext", value_name = "EXT")]
    pub audio_ext: Vec<String>,

    /// Name of the stems directory created next to each source file
    #[arg(long)]
    pub separated_subdir: Option<String>,

    /// Path to the ffmpeg executable
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// Pretrained separation configuration to load
    #[arg(long)]
    pub model_config: Option<String>,

    /// Directory containing the ONNX checkpoint
    #[arg(short, long)]
    pub model_dir: Option<PathBuf>,

    /// URL to download the checkpoint from when it is missing
    #[arg(long)]
    pub model_url: Option<String>,

    /// Execution device
    #[arg(short, long, value_enum)]
    pub device: Option<DeviceArg>,

    /// Intra-op thread count for ONNX Runtime
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub threads: Option<u32>,

    /// Load the model on the first request instead of at startup
    #[arg(long)]
    pub lazy_load: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.audio_ext.is_empty() {
            let exts: Vec<String> = self
                .audio_ext
                .iter()
                .flat_map(|e| parse_extension_list(e))
                .collect();
            if !exts.is_empty() {
                config.audio_extensions = exts;
            }
        }
        if let Some(ref subdir) = self.separated_subdir {
            config.separated_subdir = subdir.clone();
        }
        if let Some(ref ffmpeg) = self.ffmpeg {
            config.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(ref name) = self.model_config {
            config.model_config = name.clone();
        }
        if let Some(ref dir) = self.model_dir {
            config.model_path = Some(dir.clone());
        }
        if let Some(ref url) = self.model_url {
            config.model_url = Some(url.clone());
        }
        if let Some(device) = self.device {
            config.device = device.into();
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }
        if self.lazy_load {
            config.lazy_load = true;
        }
    }
}
