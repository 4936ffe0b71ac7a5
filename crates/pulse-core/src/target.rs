use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::labels::{Labels, INSTANCE_LABEL};

/// 目标缺省参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDefaults {
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub scrape_timeout: Duration,
    pub metrics_path: String,
    pub scheme: String,
}

impl Default for TargetDefaults {
    fn default() -> Self {
        Self {
            scrape_interval: Duration::from_secs(15),
            scrape_timeout: Duration::from_secs(10),
            metrics_path: "/metrics".to_string(),
            scheme: "http".to_string(),
        }
    }
}

/// 抓取目标，以 `host:port` 为标识
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub scrape_timeout: Duration,
    pub metrics_path: String,
    pub scheme: String,
    #[serde(default)]
    pub labels: Labels,
}

impl Target {
    /// 解析 `host:port`，使用缺省参数
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        Self::parse_with(address, &TargetDefaults::default())
    }

    pub fn parse_with(address: &str, defaults: &TargetDefaults) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
            return Err(invalid("host must not contain a scheme, path or whitespace"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;

        let target = Self {
            host: host.to_string(),
            port,
            scrape_interval: defaults.scrape_interval,
            scrape_timeout: defaults.scrape_timeout,
            metrics_path: defaults.metrics_path.clone(),
            scheme: defaults.scheme.clone(),
            labels: Labels::new(),
        };
        target.validate()?;
        Ok(target)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.scrape_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = timeout;
        self
    }

    pub fn with_metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = path.into();
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        let raw = format!(
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, self.metrics_path
        );
        Url::parse(&raw).map_err(|e| ConfigError::InvalidTarget {
            address: self.address(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            address: self.address(),
            reason,
        };

        if self.port == 0 {
            return Err(invalid("port must be non-zero".into()));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(invalid(format!("unsupported scheme '{}'", self.scheme)));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(invalid("metrics path must start with '/'".into()));
        }
        if self.scrape_interval.is_zero() {
            return Err(invalid("scrape interval must be positive".into()));
        }
        if self.scrape_timeout.is_zero() || self.scrape_timeout > self.scrape_interval {
            return Err(invalid(
                "scrape timeout must be positive and not exceed the interval".into(),
            ));
        }
        self.labels.validate()?;
        self.url().map(|_| ())
    }

    /// 附加到每个样本上的标签：目标标签加 `instance`
    pub fn instance_labels(&self) -> Labels {
        let mut labels = self.labels.clone();
        labels.insert(INSTANCE_LABEL, self.address());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let target = Target::parse("node-1:9100").unwrap();
        assert_eq!(target.host, "node-1");
        assert_eq!(target.port, 9100);
        assert_eq!(target.address(), "node-1:9100");
        assert_eq!(target.url().unwrap().as_str(), "http://node-1:9100/metrics");
    }

    #[test]
    fn test_malformed_addresses() {
        for address in ["", "node", ":9100", "node:abc", "node:0", "http://node:9100", "no de:1"] {
            assert!(
                matches!(Target::parse(address), Err(ConfigError::InvalidTarget { .. })),
                "{address} should be rejected"
            );
        }
    }

    #[test]
    fn test_timeout_must_fit_interval() {
        let target = Target::parse("node:9100")
            .unwrap()
            .with_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(6));
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_instance_label_attached() {
        let target = Target::parse("node:9100")
            .unwrap()
            .with_labels(Labels::from_pairs([("job", "node")]).unwrap());
        let labels = target.instance_labels();
        assert_eq!(labels.get("instance"), Some("node:9100"));
        assert_eq!(labels.get("job"), Some("node"));
    }
}
