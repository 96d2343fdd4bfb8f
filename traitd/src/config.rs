// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::supervisor::RestartPolicy;
use crate::worker_pool::PoolConfig;

/// MQTT quality of service used for subscriptions and publishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")] // AtLeastOnce becomes "at-least-once"
pub enum QosLevel {
    /// Fire and forget
    AtMostOnce,
    #[default]
    /// Default: acknowledged delivery
    AtLeastOnce,
    /// Four-way handshake
    ExactlyOnce,
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Broker host name or address
    #[arg(long, default_value = "localhost")]
    pub broker_host: String,

    /// Broker TCP port
    #[arg(long, default_value_t = 1883)]
    pub broker_port: u16,

    /// Client id prefix; "-sub" and "-pub" are appended per connection
    #[arg(long, default_value = "traitd")]
    pub client_id: String,

    /// Topic filter to subscribe to. May be given multiple times.
    #[arg(long = "subscribe", value_name = "TOPIC", required = true)]
    pub topics: Vec<String>,

    #[arg(long, value_enum, default_value_t)]
    pub qos: QosLevel,

    /// MQTT keep-alive interval in seconds
    #[arg(long, default_value_t = 30)]
    pub keep_alive_secs: u64,

    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub publish_timeout_ms: u64,

    /// Capacity of the inbound queue; 0 means unbounded
    #[arg(long, default_value_t = 0)]
    pub inbound_capacity: usize,

    /// Capacity of each outbound queue; 0 means unbounded
    #[arg(long, default_value_t = 1024)]
    pub outbound_capacity: usize,

    /// Larger payloads are dropped by the listener
    #[arg(long, default_value_t = 256 * 1024)]
    pub max_payload_bytes: usize,

    /// Maximum number of handlers running at the same time
    #[arg(long, default_value_t = 68)]
    pub workers: usize,

    /// Submissions waiting for a free worker; 0 means unbounded
    #[arg(long, default_value_t = 1024)]
    pub submission_capacity: usize,

    /// How long a submission may wait for room in the submission queue
    #[arg(long, default_value_t = 1000)]
    pub submit_timeout_ms: u64,

    /// Bounded wait of the dispatcher and the drain loops
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 500)]
    pub restart_initial_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub restart_max_ms: u64,

    #[arg(long, default_value_t = 2.0)]
    pub restart_multiplier: f64,

    /// Consecutive failed restarts before a persistent thread is given up on
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Grace period for draining handlers and joining threads on shutdown
    #[arg(long, default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("--workers must be at least 1")]
    NoWorkers,
    #[error("--poll-interval-ms must be at least 1")]
    ZeroPollInterval,
    #[error("--subscribe must name at least one topic")]
    NoTopics,
    #[error("topic filter {0:?} is empty or contains a NUL character")]
    InvalidTopic(String),
    #[error("--client-id must not be empty or start with a space")]
    InvalidClientId,
    #[error("--keep-alive-secs must be 0 or between 5 and 65535, got {0}")]
    KeepAlive(u64),
    #[error("--restart-initial-ms ({initial}) must be positive and not exceed --restart-max-ms ({max})")]
    RestartBounds { initial: u64, max: u64 },
    #[error("--restart-multiplier must be a finite number >= 1.0, got {0}")]
    RestartMultiplier(f64),
    #[error("--max-payload-bytes must be at least 1")]
    ZeroPayloadLimit,
    #[error("--shutdown-timeout-secs must not exceed {MAX_SHUTDOWN_TIMEOUT_SECS}, got {0}")]
    ShutdownTimeout(u64),
}

/// One day.
const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topics: Vec<String>,
    pub qos: QosLevel,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "traitd".into(),
            topics: Vec::new(),
            qos: QosLevel::default(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Validated configuration, passed explicitly to every component.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub pool: PoolConfig,
    pub restart: RestartPolicy,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub max_payload_bytes: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            pool: PoolConfig::default(),
            restart: RestartPolicy::default(),
            inbound_capacity: 0,
            outbound_capacity: 1024,
            max_payload_bytes: 256 * 1024,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if let Some(topic) = self
            .topics
            .iter()
            .find(|t| t.is_empty() || t.contains('\0'))
        {
            return Err(ConfigError::InvalidTopic(topic.clone()));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(ConfigError::InvalidClientId);
        }
        // 0 disables keep-alive; the CONNECT packet carries it as u16
        if self.keep_alive_secs != 0
            && !(5..=u64::from(u16::MAX)).contains(&self.keep_alive_secs)
        {
            return Err(ConfigError::KeepAlive(self.keep_alive_secs));
        }
        if self.restart_initial_ms == 0 || self.restart_initial_ms > self.restart_max_ms {
            return Err(ConfigError::RestartBounds {
                initial: self.restart_initial_ms,
                max: self.restart_max_ms,
            });
        }
        if !self.restart_multiplier.is_finite() || self.restart_multiplier < 1.0 {
            return Err(ConfigError::RestartMultiplier(self.restart_multiplier));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::ZeroPayloadLimit);
        }
        if self.shutdown_timeout_secs > MAX_SHUTDOWN_TIMEOUT_SECS {
            return Err(ConfigError::ShutdownTimeout(self.shutdown_timeout_secs));
        }

        Ok(Config {
            broker: BrokerConfig {
                host: self.broker_host,
                port: self.broker_port,
                client_id: self.client_id,
                topics: self.topics,
                qos: self.qos,
                keep_alive: Duration::from_secs(self.keep_alive_secs),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            },
            pool: PoolConfig {
                workers: self.workers,
                submission_capacity: self.submission_capacity,
                submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            },
            restart: RestartPolicy {
                initial_delay: Duration::from_millis(self.restart_initial_ms),
                max_delay: Duration::from_millis(self.restart_max_ms),
                multiplier: self.restart_multiplier,
                max_restarts: self.max_restarts,
            },
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
            max_payload_bytes: self.max_payload_bytes,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        })
    }
}
