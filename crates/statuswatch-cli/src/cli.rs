use clap::{
    Parser,
    ValueEnum,
};

/// Sidecar that watches pod lifecycle events in a namespace and forwards a
/// consolidated per-release app status to a remote HTTP API (spec §6).
#[derive(Parser, Debug)]
#[command(name = "statuswatch", version, about)]
pub struct Cli {
    /// Namespace to watch for workload pods.
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Label selector applied to the pod watch/list.
    #[arg(long, default_value = "type=app")]
    pub label_selector: String,

    /// Operating mode: run the sidecar, dump effective config, or exercise
    /// the availability prober against a single URL.
    #[arg(long, value_enum, default_value = "normal")]
    pub mode: Mode,

    /// URL to probe; required when `--mode=probetest`.
    #[arg(long, value_name = "URL")]
    pub probe_url: Option<String>,

    /// Skip TLS certificate verification for the probetest request.
    #[arg(long)]
    pub probe_insecure: bool,

    /// Connect timeout in seconds for the probetest request.
    #[arg(long, default_value_t = 0.5)]
    pub probe_connect_timeout: f64,

    /// Read timeout in seconds for the probetest request.
    #[arg(long, default_value_t = 1.5)]
    pub probe_read_timeout: f64,

    /// Tracing verbosity; `DEBUG=true` in the environment overrides this to `debug`.
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Normal,
    Diagnostics,
    Probetest,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Cli {
    /// Validates mode-specific requirements that clap's declarative
    /// attributes cannot express (spec §6: `--probe-url` is required iff
    /// `--mode=probetest`).
    pub fn validate(&self) -> Result<(), String> {
        if self.mode == Mode::Probetest && self.probe_url.is_none() {
            return Err("--probe-url is required when --mode=probetest".to_string());
        }
        Ok(())
    }
}
