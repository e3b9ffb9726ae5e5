//! Node log output.
//!
//! A [`LogProfile`] picks the baseline; the environment then overrides it:
//! `RUST_LOG` (filter directives), `LOG_FORMAT` (`json`, `pretty`, `compact`),
//! `LOG_FILE` (append there instead of stdout), `LOG_ANSI` and `LOG_SPANS`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Which kind of run the node is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProfile {
    /// Long-running node: one line per event, RPC transport quietened
    Node,
    /// Local devnet: pipeline and submission internals visible
    Devnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives
    pub directives: String,
    pub format: LogFormat,
    pub ansi: bool,
    pub file: Option<PathBuf>,
    /// Emit span open/close events
    pub spans: bool,
    /// Include source file and line
    pub location: bool,
}

impl LogConfig {
    pub fn for_profile(profile: LogProfile) -> Self {
        match profile {
            LogProfile::Node => Self {
                directives: "info,jsonrpc_http_server=warn,hyper=warn".to_string(),
                format: LogFormat::Compact,
                ansi: true,
                file: None,
                spans: false,
                location: false,
            },
            LogProfile::Devnet => Self {
                directives: "debug,meridian_sequencer=debug,meridian_api=debug,hyper=info"
                    .to_string(),
                format: LogFormat::Pretty,
                ansi: true,
                file: None,
                spans: false,
                location: true,
            },
        }
    }

    /// Apply overrides from `vars` (normally `std::env::var`)
    pub fn overridden_by<F>(mut self, vars: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(directives) = vars("RUST_LOG").filter(|d| !d.trim().is_empty()) {
            self.directives = directives;
        }
        if let Some(format) = vars("LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring LOG_FORMAT: {}", e),
            }
        }
        if let Some(path) = vars("LOG_FILE") {
            self.file = Some(PathBuf::from(path));
        }
        if let Some(ansi) = vars("LOG_ANSI") {
            self.ansi = ansi.eq_ignore_ascii_case("true");
        }
        if let Some(spans) = vars("LOG_SPANS") {
            self.spans = spans.eq_ignore_ascii_case("true");
        }
        // Files and aggregators never want escape codes
        if self.file.is_some() || self.format == LogFormat::Json {
            self.ansi = false;
        }
        self
    }

    pub fn from_env(profile: LogProfile) -> Self {
        Self::for_profile(profile).overridden_by(|key| std::env::var(key).ok())
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        EnvFilter::try_new(&self.directives)
            .map_err(|e| anyhow::anyhow!("Bad log directives '{}': {}", self.directives, e))
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = config.filter()?;

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let spans = if config.spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(config.ansi)
        .with_file(config.location)
        .with_line_number(config.location)
        .with_span_events(spans);

    let layer = match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))
}

pub mod formats {
    use meridian_consensus::types::Block;
    use meridian_sequencer::PipelinePolicy;

    /// One line per imported block
    pub fn block_produced(block: &Block, policy: PipelinePolicy, coinbase_value: u128) -> String {
        format!(
            "height={} hash={} tx_count={} policy={} coinbase_value={}",
            block.number(),
            block.hash(),
            block.transactions.len(),
            policy,
            coinbase_value
        )
    }
}
