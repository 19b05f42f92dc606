//! Node configuration.
//!
//! Every option can be given as a CLI flag or through its `LYRA_*`
//! environment variable. Secrets are moved into [`SecretString`] as soon as
//! they are parsed.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use secrecy::{ExposeSecret, SecretString};

use crate::rotation::DEFAULT_MIN_PASSWORD_LENGTH;

/// Which API surface this node serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NodeRole {
    /// Control plane: owns the records and routes work to workers.
    Host,
    /// Remote execution domain serving `/api/worker/*`.
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Raw options as parsed by clap.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    #[arg(long, env = "LYRA_NODE_ROLE", value_enum, default_value_t = NodeRole::Host)]
    pub role: NodeRole,

    /// Master key for credential encryption (at least 32 bytes)
    #[arg(long, env = "LYRA_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Bearer token shared between the host and its workers
    #[arg(long, env = "LYRA_WORKER_API_TOKEN", hide_env_values = true)]
    pub worker_api_token: Option<String>,

    #[arg(long, env = "LYRA_PASSWORD_MIN_LENGTH", default_value_t = DEFAULT_MIN_PASSWORD_LENGTH)]
    pub password_min_length: usize,

    #[arg(long, env = "LYRA_WORKER_TIMEOUT_SECS", default_value_t = 30)]
    pub worker_timeout_secs: u64,

    #[arg(long, env = "LYRA_WORKER_HEALTH_TIMEOUT_SECS", default_value_t = 5)]
    pub worker_health_timeout_secs: u64,

    /// Docker socket path (platform default when unset)
    #[arg(long, env = "LYRA_DOCKER_SOCKET")]
    pub docker_socket: Option<String>,

    /// Fixed GPU count instead of probing nvidia-smi
    #[arg(long, env = "LYRA_GPU_COUNT")]
    pub gpu_count: Option<u32>,

    /// Base URL used for service links of host-local environments
    #[arg(long, env = "LYRA_PUBLIC_BASE_URL", default_value = "http://localhost")]
    pub public_base_url: String,
}

/// Validated node configuration.
#[derive(Clone)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub secret_key: SecretString,
    pub worker_api_token: Option<SecretString>,
    pub password_min_length: usize,
    pub worker_timeout: Duration,
    pub worker_health_timeout: Duration,
    pub docker_socket: Option<String>,
    pub gpu_count: Option<u32>,
    pub public_base_url: String,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("role", &self.role)
            .field("secret_key", &"[REDACTED]")
            .field("worker_api_token", &self.worker_api_token.as_ref().map(|_| "[REDACTED]"))
            .field("password_min_length", &self.password_min_length)
            .field("worker_timeout", &self.worker_timeout)
            .field("worker_health_timeout", &self.worker_health_timeout)
            .field("docker_socket", &self.docker_socket)
            .field("gpu_count", &self.gpu_count)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl TryFrom<NodeArgs> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: NodeArgs) -> Result<Self> {
        let secret_key = SecretString::from(
            args.secret_key
                .context("LYRA_SECRET_KEY is required")?,
        );
        if secret_key.expose_secret().len() < 32 {
            bail!("LYRA_SECRET_KEY must be at least 32 bytes");
        }

        let worker_api_token = args
            .worker_api_token
            .filter(|token| !token.trim().is_empty())
            .map(SecretString::from);
        if args.role == NodeRole::Worker && worker_api_token.is_none() {
            bail!("LYRA_WORKER_API_TOKEN is required when running as a worker");
        }

        if args.password_min_length == 0 {
            bail!("LYRA_PASSWORD_MIN_LENGTH must be at least 1");
        }

        url::Url::parse(&args.public_base_url)
            .with_context(|| format!("Invalid LYRA_PUBLIC_BASE_URL: {}", args.public_base_url))?;

        Ok(Self {
            role: args.role,
            secret_key,
            worker_api_token,
            password_min_length: args.password_min_length,
            worker_timeout: Duration::from_secs(args.worker_timeout_secs),
            worker_health_timeout: Duration::from_secs(args.worker_health_timeout_secs),
            docker_socket: args.docker_socket,
            gpu_count: args.gpu_count,
            public_base_url: args.public_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        node: NodeArgs,
    }

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn parse(args: &[&str]) -> Result<NodeConfig> {
        let mut argv = vec!["lyra"];
        argv.extend_from_slice(args);
        NodeConfig::try_from(TestCli::try_parse_from(argv)?.node)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--secret-key", KEY]).unwrap();
        assert_eq!(config.role, NodeRole::Host);
        assert_eq!(config.password_min_length, 8);
        assert_eq!(config.worker_timeout, Duration::from_secs(30));
        assert_eq!(config.worker_health_timeout, Duration::from_secs(5));
        assert_eq!(config.public_base_url, "http://localhost");
        assert!(config.gpu_count.is_none());
    }

    #[test]
    fn test_short_secret_key_is_rejected() {
        assert!(parse(&["--secret-key", "too-short"]).is_err());
    }

    #[test]
    fn test_worker_role_requires_token() {
        assert!(parse(&["--secret-key", KEY, "--role", "worker"]).is_err());

        let args = ["--secret-key", KEY, "--role", "worker", "--worker-api-token", "t0ken"];
        let config = parse(&args).unwrap();
        assert_eq!(config.role, NodeRole::Worker);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = parse(&["--secret-key", KEY, "--worker-api-token", "t0ken"]).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains(KEY));
        assert!(!rendered.contains("t0ken"));
    }
}
