use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use gridlink_client::{ClientConfig, TaskConfiguration, config};
use std::collections::HashMap;

/// Command-line and environment options of the demo.
///
/// Every flag falls back to a `GRIDLINK_*` variable, and a `.env` file in the
/// working directory is loaded before parsing.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Cluster endpoint.
    #[arg(long, env = "GRIDLINK_ENDPOINT", default_value = "http://127.0.0.1:5001")]
    pub endpoint: String,

    /// Number of HTTP/2 channels opened to the cluster.
    #[arg(long, env = "GRIDLINK_POOL_SIZE", default_value_t = config::DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Calls allowed in flight at once.
    #[arg(long, env = "GRIDLINK_MAX_CONCURRENT_CALLS", default_value_t = config::DEFAULT_MAX_CONCURRENT_CALLS)]
    pub max_concurrent_calls: usize,

    /// Blobs created concurrently by one fan-out.
    #[arg(long, env = "GRIDLINK_MAX_CONCURRENT_CREATIONS", default_value_t = config::DEFAULT_MAX_CONCURRENT_CREATIONS)]
    pub max_concurrent_creations: usize,

    /// Frames buffered ahead of an upload stream.
    #[arg(long, env = "GRIDLINK_STREAM_BUFFER_SIZE", default_value_t = config::DEFAULT_STREAM_BUFFER_SIZE)]
    pub stream_buffer_size: usize,

    /// Connection timeout in milliseconds. Unset means no timeout.
    #[arg(long, env = "GRIDLINK_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Per-request timeout in milliseconds. Unset means no timeout.
    #[arg(long, env = "GRIDLINK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Partition the session and its tasks run on.
    #[arg(long, env = "GRIDLINK_PARTITION", default_value = "subtasking")]
    pub partition: String,

    #[arg(long, env = "GRIDLINK_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: i32,

    #[arg(long, env = "GRIDLINK_PRIORITY", default_value_t = 1)]
    pub priority: i32,

    /// Longest a task may run, in seconds.
    #[arg(long, env = "GRIDLINK_MAX_DURATION_SECS", default_value_t = 3600)]
    pub max_duration_secs: u64,

    /// Free-form task options as `key=value`, repeatable.
    #[arg(long = "option", value_name = "KEY=VALUE", env = "GRIDLINK_OPTIONS", value_delimiter = ',')]
    pub options: Vec<String>,

    /// Text written into the task payload.
    #[arg(long, env = "GRIDLINK_PAYLOAD", default_value = "Hello")]
    pub payload: String,

    /// Optional inline dependency attached to the task as `name=text`.
    #[arg(long, env = "GRIDLINK_DEPENDENCY", value_name = "NAME=TEXT")]
    pub dependency: Option<String>,
}

/// Validated demo configuration.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub client: ClientConfig,
    pub task_defaults: TaskConfiguration,
    pub payload: String,
    pub dependency: Option<(String, String)>,
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.partition.is_empty() {
            bail!("partition must not be empty");
        }
        if args.max_retries < 0 {
            bail!("max_retries must not be negative");
        }
        if args.max_duration_secs == 0 {
            bail!("max_duration_secs must be greater than 0");
        }

        let client = ClientConfig {
            pool_size: args.pool_size,
            max_concurrent_calls: args.max_concurrent_calls,
            max_concurrent_creations: args.max_concurrent_creations,
            stream_buffer_size: args.stream_buffer_size,
            connect_timeout: args.connect_timeout_ms.map(Duration::from_millis),
            request_timeout: args.request_timeout_ms.map(Duration::from_millis),
            ..ClientConfig::new(args.endpoint)
        };
        client.validate().context("invalid client configuration")?;

        let options = args
            .options
            .iter()
            .map(|raw| split_pair(raw, "option"))
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        let dependency = args
            .dependency
            .as_deref()
            .map(|raw| split_pair(raw, "dependency"))
            .transpose()?;

        Ok(Self {
            client,
            task_defaults: TaskConfiguration {
                max_retries: args.max_retries,
                priority: args.priority,
                partition_id: args.partition,
                max_duration: Duration::from_secs(args.max_duration_secs),
                options,
            },
            payload: args.payload,
            dependency,
        })
    }
}

fn split_pair(raw: &str, what: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("{what} `{raw}` is not of the form KEY=VALUE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<DemoConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("gridlink-demo").chain(args.iter().copied()))?;
        DemoConfig::try_from(args)
    }

    #[test]
    fn options_and_dependency_are_split() {
        let config = parse(&[
            "--option",
            "mode=fast",
            "--option",
            "level=3",
            "--dependency",
            "config.json={}",
        ])
        .unwrap();

        assert_eq!(config.task_defaults.options["mode"], "fast");
        assert_eq!(config.task_defaults.options["level"], "3");
        assert_eq!(
            config.dependency,
            Some(("config.json".to_string(), "{}".to_string()))
        );
    }

    #[test]
    fn malformed_option_is_rejected() {
        assert!(parse(&["--option", "=value"]).is_err());
        assert!(parse(&["--option", "novalue"]).is_err());
    }

    #[test]
    fn client_limits_are_validated() {
        assert!(parse(&["--pool-size", "0"]).is_err());
        assert!(parse(&["--max-concurrent-calls", "2", "--max-concurrent-creations", "4"]).is_err());
    }

    #[test]
    fn timeouts_are_optional() {
        let config = parse(&["--request-timeout-ms", "1500"]).unwrap();
        assert_eq!(config.client.connect_timeout, None);
        assert_eq!(config.client.request_timeout, Some(Duration::from_millis(1500)));
    }
}
