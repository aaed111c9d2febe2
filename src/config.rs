use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "sandbox-scorer", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Start even if the container runtime does not answer at startup
    #[arg(long = "skip-preflight", default_value_t = false)]
    pub skip_preflight: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or fall back to defaults
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let Some(path) = &self.config_path else {
            return Ok(Config::default());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("unable to open config file {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).with_context(|| format!("invalid config file {path}"))
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

/// Fixed operational parameters of the sandbox. None of these are per-request.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container runtime client invocation, e.g. `["docker"]` or `["podman"]`
    pub runtime: Vec<String>,
    /// Image holding the interpreter and GNU time
    pub image: String,
    /// Fractional CPU share handed to `--cpus`
    pub cpus: f64,
    pub pids_limit: u32,
    pub default_time_limit: Second,
    pub default_memory_limit: MegaByte,
    /// Parent directory for workspaces; the system temp dir when unset
    pub workspace_root: Option<PathBuf>,
    /// Upper bound on containers running at once across all batches
    pub max_parallel: Option<usize>,
    /// Program stdout and stderr are each cut off after this much
    pub output_limit: MegaByte,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: vec!["docker".to_string()],
            image: "python-with-time".to_string(),
            cpus: 0.5,
            pids_limit: 64,
            default_time_limit: Second(10.0),
            default_memory_limit: MegaByte(128),
            workspace_root: None,
            max_parallel: None,
            output_limit: MegaByte(8),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Second(pub f64);

impl Second {
    /// Converts to a duration, rejecting negative, zero and non-finite values
    pub fn to_duration(self) -> Option<Duration> {
        if self.0.is_finite() && self.0 > 0.0 {
            Duration::try_from_secs_f64(self.0).ok()
        } else {
            None
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MegaByte(pub u64);

impl MegaByte {
    pub fn to_bytes(self) -> u64 {
        self.0.saturating_mul(1024 * 1024)
    }
}
