//! Configuration for Lintel
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::controller::ControllerConfig;
use crate::directory::http::HttpDirectoryConfig;
use crate::reconciler::{ReconcilerConfig, RetryPolicy};
use crate::types::DirectoryId;

/// Lintel - keeps inherited permissions in step with the directory tree
#[derive(Parser, Debug, Clone)]
#[command(name = "lintel")]
#[command(about = "Hierarchical permission reconciler for directory trees")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Subject carrying directory lifecycle events
    #[arg(long, env = "DIRECTORY_SUBJECT", default_value = "events.directories")]
    pub directory_subject: String,

    /// Base URL of the directory service
    #[arg(long, env = "DIRECTORY_URL", default_value = "http://localhost:8080")]
    pub directory_url: String,

    /// Root of the subtree managed by this instance (optional)
    #[arg(long, env = "BASE_DIRECTORY_ID")]
    pub base_directory_id: Option<DirectoryId>,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "lintel.db")]
    pub database_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Number of reconciliation workers
    #[arg(long, env = "WORKER_COUNT", default_value = "4")]
    pub worker_count: usize,

    /// Bounded queue size per worker
    #[arg(long, env = "QUEUE_SIZE", default_value = "256")]
    pub queue_size: usize,

    /// Seconds between full resyncs
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value = "300")]
    pub resync_interval_secs: u64,

    /// Deadline for each directory call and store transaction, in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "5000")]
    pub request_timeout_ms: u64,

    /// Attempts per event before deferring it to the next resync
    #[arg(long, env = "MAX_RETRIES", default_value = "5")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt)
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "100")]
    pub retry_base_delay_ms: u64,

    /// Consecutive failed re-subscriptions before the controller gives up
    #[arg(long, env = "MAX_RESUBSCRIBE_ATTEMPTS", default_value = "10")]
    pub max_resubscribe_attempts: u32,
}

/// Subcommands; `serve` is the default
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the reconciliation controller
    Serve,
    /// Apply the database schema and exit
    Migrate,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// NATS nkey seed (optional)
    #[arg(long, env = "NATS_NKEY")]
    pub nats_nkey: Option<String>,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn directory_config(&self) -> HttpDirectoryConfig {
        HttpDirectoryConfig {
            base_url: self.directory_url.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                ..Default::default()
            },
            call_timeout: self.request_timeout(),
            base_directory: self.base_directory_id,
            ..Default::default()
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            subject: self.directory_subject.clone(),
            worker_count: self.worker_count,
            queue_size: self.queue_size,
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            max_resubscribe_attempts: self.max_resubscribe_attempts,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }
        if self.queue_size == 0 {
            return Err("QUEUE_SIZE must be at least 1".to_string());
        }
        if self.resync_interval_secs == 0 {
            return Err("RESYNC_INTERVAL_SECS must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.max_retries == 0 {
            return Err("MAX_RETRIES must be at least 1".to_string());
        }
        if self.nats.nats_user.is_some() != self.nats.nats_password.is_some() {
            return Err("NATS_USER and NATS_PASSWORD must be set together".to_string());
        }
        if self.directory_subject.trim().is_empty() {
            return Err("DIRECTORY_SUBJECT must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["lintel"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.command(), Command::Serve);
        assert_eq!(args.directory_subject, "events.directories");
        assert_eq!(args.worker_count, 4);
        assert_eq!(args.queue_size, 256);
        assert!(args.base_directory_id.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_migrate_subcommand() {
        let args = parse(&["--database-path", "/tmp/perms.db", "migrate"]);
        assert_eq!(args.command(), Command::Migrate);
        assert_eq!(args.database_path, PathBuf::from("/tmp/perms.db"));
    }

    #[test]
    fn test_base_directory_parse() {
        let args = parse(&["--base-directory-id", "00000000-0000-0000-0000-000000000007"]);
        assert_eq!(args.base_directory_id, Some(DirectoryId::from_u128(7)));
        assert_eq!(
            args.reconciler_config().base_directory,
            Some(DirectoryId::from_u128(7))
        );
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let args = parse(&["--worker-count", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_user_without_password() {
        let args = parse(&["--nats-user", "lintel"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_component_configs() {
        let args = parse(&["--request-timeout-ms", "750", "--max-retries", "3"]);
        let reconciler = args.reconciler_config();
        assert_eq!(reconciler.call_timeout, Duration::from_millis(750));
        assert_eq!(reconciler.retry.max_attempts, 3);
        assert_eq!(args.directory_config().request_timeout, Duration::from_millis(750));
        assert_eq!(args.controller_config().subject, "events.directories");
    }
}
