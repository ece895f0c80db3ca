use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::gate::{Admission, Gate};
use tollgate::ratelimit::{PrincipalKey, Sweeper, TokenBucketLimiter};

/// Probe a token bucket limiter with `key [cost]` lines read from stdin.
///
/// One JSON decision is written to stdout per input line.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Treat each key as a caller id within this tenant
    #[arg(long)]
    tenant: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// One line of probe output.
#[derive(Debug, Serialize)]
struct ProbeRecord<'a> {
    key: &'a str,
    allowed: bool,
    retry_after_secs: u64,
    limit: Option<u64>,
    remaining: Option<u64>,
}

impl<'a> ProbeRecord<'a> {
    fn new(key: &'a str, admission: &Admission) -> Self {
        match admission {
            Admission::Allowed { quota } => Self {
                key,
                allowed: true,
                retry_after_secs: 0,
                limit: quota.map(|q| q.limit),
                remaining: quota.map(|q| q.remaining),
            },
            Admission::Rejected {
                retry_after_secs,
                quota,
            } => Self {
                key,
                allowed: false,
                retry_after_secs: *retry_after_secs,
                limit: Some(quota.limit),
                remaining: Some(quota.remaining),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Tollgate probe");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref())?;
    info!(
        rate_per_second = config.limiter.rate_per_second,
        capacity = config.limiter.capacity,
        ttl_secs = config.limiter.ttl_secs,
        sweep_interval_secs = config.limiter.sweep_interval_secs,
        "Configuration loaded"
    );

    let limiter = Arc::new(TokenBucketLimiter::new(config.limiter.clone())?);
    info!("Rate limiter initialized");

    let sweeper = config
        .sweeper
        .enabled
        .then(|| Sweeper::spawn(Arc::clone(&limiter), config.sweeper.period()));

    let gate = Gate::new(limiter);
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut buf = Vec::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let result: std::io::Result<()> = loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    info!("Input closed");
                    break Ok(());
                }
                Ok(_) => {
                    if let Some(output) = process_line(&gate, cli.tenant.as_deref(), &buf) {
                        if let Err(e) = write_line(&mut stdout, &output).await {
                            break Err(e);
                        }
                    }
                    buf.clear();
                }
                Err(e) => break Err(e),
            },
            _ = &mut shutdown => break Ok(()),
        }
    };

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    info!(live_buckets = gate.backend().len(), "Tollgate probe stopped");
    result?;
    Ok(())
}

/// Turn one raw input line into a JSON decision.
///
/// Lines that are not UTF-8 or not `key [cost]` are logged and skipped.
fn process_line(
    gate: &Gate<TokenBucketLimiter>,
    tenant: Option<&str>,
    raw: &[u8],
) -> Option<String> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Skipping line that is not valid UTF-8");
            return None;
        }
    };

    let (key, cost) = parse_line(line)?;
    let key = match tenant {
        Some(tenant) => PrincipalKey::new(tenant, key).to_limiter_key(),
        None => key.to_string(),
    };

    let admission = gate.admit_key(&key, cost);
    match serde_json::to_string(&ProbeRecord::new(&key, &admission)) {
        Ok(output) => Some(output),
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to encode decision");
            None
        }
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, output: &str) -> std::io::Result<()> {
    stdout.write_all(output.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

/// Initialize the global subscriber. Logs go to stderr; stdout carries decisions.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Parse a `key [cost]` line. Blank lines and malformed input yield `None`.
fn parse_line(line: &str) -> Option<(&str, f64)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;

    let cost = match parts.next() {
        None => 1.0,
        Some(raw) => match raw.parse::<f64>() {
            Ok(cost) => cost,
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping line with unparsable cost");
                return None;
            }
        },
    };

    if parts.next().is_some() {
        warn!(line = %line, "Skipping line with trailing input");
        return None;
    }

    Some((key, cost))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate::config::LimiterConfig;
    use tollgate::gate::Quota;

    fn create_gate(capacity: f64) -> Gate<TokenBucketLimiter> {
        let limiter = TokenBucketLimiter::new(LimiterConfig::new(0.0, capacity)).unwrap();
        Gate::new(Arc::new(limiter))
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let gate = create_gate(2.0);

        let first = process_line(&gate, None, b"a\n").unwrap();
        assert!(first.contains("\"allowed\":true"));

        assert_eq!(process_line(&gate, None, b"\xff\xfe bad\n"), None);

        // Input after the bad line is still handled
        let next: serde_json::Value =
            serde_json::from_str(&process_line(&gate, None, b"b 2\n").unwrap()).unwrap();
        assert_eq!(next["key"], "b");
        assert_eq!(next["allowed"], true);
        assert_eq!(next["remaining"], 0);
        assert_eq!(gate.backend().len(), 2);
    }

    #[test]
    fn test_process_line_with_tenant() {
        let gate = create_gate(1.0);

        let output: serde_json::Value =
            serde_json::from_str(&process_line(&gate, Some("7"), b"caller\n").unwrap()).unwrap();
        assert_eq!(output["key"], "org:7:key:caller");

        let output: serde_json::Value =
            serde_json::from_str(&process_line(&gate, Some("7"), b"caller\n").unwrap()).unwrap();
        assert_eq!(output["allowed"], false);
        assert_eq!(output["retry_after_secs"], 60);
    }

    #[test]
    fn test_blank_and_malformed_lines_produce_nothing() {
        let gate = create_gate(1.0);

        assert_eq!(process_line(&gate, None, b"\n"), None);
        assert_eq!(process_line(&gate, None, b"k notanumber\n"), None);
        assert!(gate.backend().is_empty());
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("org:1:key:a"), Some(("org:1:key:a", 1.0)));
        assert_eq!(parse_line("  client  2.5 "), Some(("client", 2.5)));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("client lots"), None);
        assert_eq!(parse_line("client 1 2"), None);
    }

    #[test]
    fn test_probe_record_for_rejection() {
        let admission = Admission::Rejected {
            retry_after_secs: 3,
            quota: Quota {
                limit: 10,
                remaining: 0,
            },
        };

        let json = serde_json::to_value(ProbeRecord::new("k", &admission)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "key": "k",
                "allowed": false,
                "retry_after_secs": 3,
                "limit": 10,
                "remaining": 0
            })
        );
    }

    #[test]
    fn test_probe_record_for_fail_open() {
        let admission = Admission::Allowed { quota: None };
        let record = ProbeRecord::new("k", &admission);

        assert!(record.allowed);
        assert_eq!(record.limit, None);
        assert_eq!(record.remaining, None);
    }
}
