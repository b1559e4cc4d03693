use crate::core::{MigrateError, Result};
use crate::index::VersionIndex;

/// Retry behaviour for revision conflicts on a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRetryPolicy {
    /// Total write attempts per document, including the first.
    pub max_attempts: usize,
    /// Base duration in milliseconds for backoff calculation.
    pub base_backoff_ms: u64,
    /// Maximum duration in milliseconds for backoff.
    pub max_backoff_ms: u64,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

impl ConflictRetryPolicy {
    /// Never retries; the first conflict is recorded as a failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Exponential backoff in milliseconds before retry number `attempt`.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }
}

/// Runner tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Documents processed concurrently within one pass.
    pub concurrency: usize,
    /// Upper bound on passes over a partition when running a chain.
    pub max_passes: usize,
    /// Stop a chain when a step leaves failed documents in its source partition.
    pub stop_chain_on_failure: bool,
    pub conflict_retry: ConflictRetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_passes: 3,
            stop_chain_on_failure: true,
            conflict_retry: ConflictRetryPolicy::default(),
        }
    }
}

impl RunnerConfig {
    /// Set the documents processed concurrently
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the pass limit per step
    pub fn max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Set whether a chain stops on failures
    pub fn stop_chain_on_failure(mut self, stop: bool) -> Self {
        self.stop_chain_on_failure = stop;
        self
    }

    /// Set the conflict retry policy
    pub fn conflict_retry(mut self, policy: ConflictRetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(MigrateError::InvalidConfig(
                "concurrency must be > 0".to_string(),
            ));
        }
        if self.max_passes == 0 {
            return Err(MigrateError::InvalidConfig(
                "max_passes must be > 0".to_string(),
            ));
        }
        if self.conflict_retry.max_attempts == 0 {
            return Err(MigrateError::InvalidConfig(
                "conflict_retry.max_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the store lives and what to migrate.
///
/// Similar to a database connection string; the defaults point at a local
/// document store and the `player` documents with versions 1 to 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Kind tag of the documents being migrated.
    pub kind: String,
    /// Schema versions with a partition.
    pub versions: Vec<u32>,
    pub runner: RunnerConfig,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5984,
            database: "migration".to_string(),
            kind: "player".to_string(),
            versions: vec![1, 2, 3],
            runner: RunnerConfig::default(),
        }
    }
}

impl MigrateConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the document kind
    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    /// Set the tracked versions
    pub fn versions(mut self, versions: impl IntoIterator<Item = u32>) -> Self {
        self.versions = versions.into_iter().collect();
        self
    }

    /// Set the runner tuning
    pub fn runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// Parse from connection string
    ///
    /// Format: `docmigrate://host:port/database?kind=player&versions=1,2,3&concurrency=4&max_attempts=3`
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("docmigrate://").ok_or_else(|| {
            MigrateError::InvalidConfig("URL must start with 'docmigrate://'".to_string())
        })?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (host_port, database) = location.split_once('/').ok_or_else(|| {
            MigrateError::InvalidConfig("Invalid host/database format".to_string())
        })?;

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| MigrateError::InvalidConfig(format!("Invalid port '{port}'")))?,
            ),
            None => (host_port, 5984),
        };

        let mut config = Self::new().host(host).port(port).database(database);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                MigrateError::InvalidConfig(format!("Invalid query parameter '{pair}'"))
            })?;
            match key {
                "kind" => config.kind = value.to_string(),
                "versions" => {
                    config.versions = value
                        .split(',')
                        .map(|v| parse_number(key, v))
                        .collect::<Result<Vec<u32>>>()?;
                }
                "concurrency" => config.runner.concurrency = parse_number(key, value)?,
                "max_passes" => config.runner.max_passes = parse_number(key, value)?,
                "max_attempts" => {
                    config.runner.conflict_retry.max_attempts = parse_number(key, value)?
                }
                other => {
                    return Err(MigrateError::InvalidConfig(format!(
                        "Unknown query parameter '{other}'"
                    )));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert to connection string
    ///
    /// Runner settings appear only when they differ from the defaults.
    pub fn to_url(&self) -> String {
        let versions = self
            .versions
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut url = format!(
            "docmigrate://{}:{}/{}?kind={}&versions={}",
            self.host, self.port, self.database, self.kind, versions
        );

        let defaults = RunnerConfig::default();
        if self.runner.concurrency != defaults.concurrency {
            url.push_str(&format!("&concurrency={}", self.runner.concurrency));
        }
        if self.runner.max_passes != defaults.max_passes {
            url.push_str(&format!("&max_passes={}", self.runner.max_passes));
        }
        if self.runner.conflict_retry.max_attempts != defaults.conflict_retry.max_attempts {
            url.push_str(&format!(
                "&max_attempts={}",
                self.runner.conflict_retry.max_attempts
            ));
        }
        url
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(MigrateError::InvalidConfig("Host cannot be empty".to_string()));
        }
        if self.database.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "Database cannot be empty".to_string(),
            ));
        }
        self.runner.validate()?;
        self.version_index().map(|_| ())
    }

    /// Builds the version partitions described by this configuration.
    pub fn version_index(&self) -> Result<VersionIndex> {
        VersionIndex::new(self.kind.clone(), self.versions.iter().copied())
            .map_err(|err| MigrateError::InvalidConfig(err.to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MigrateError::InvalidConfig(format!("Invalid value '{value}' for '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ConflictRetryPolicy {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 35,
        };
        assert_eq!(policy.backoff_ms(1), 10);
        assert_eq!(policy.backoff_ms(2), 20);
        assert_eq!(policy.backoff_ms(3), 35);
        assert_eq!(policy.backoff_ms(10), 35);
    }

    #[test]
    fn retry_budget_counts_first_attempt() {
        let policy = ConflictRetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!ConflictRetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn parses_connection_string() {
        let config = MigrateConfig::from_url(
            "docmigrate://db.local:6000/game?kind=npc&versions=1,2&concurrency=4&max_attempts=5",
        )
        .unwrap();
        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, 6000);
        assert_eq!(config.database, "game");
        assert_eq!(config.kind, "npc");
        assert_eq!(config.versions, vec![1, 2]);
        assert_eq!(config.runner.concurrency, 4);
        assert_eq!(config.runner.conflict_retry.max_attempts, 5);
        assert_eq!(config.version_index().unwrap().partition_name(2), "npc_v2");
    }

    #[test]
    fn url_defaults_and_round_trip() {
        let config = MigrateConfig::from_url("docmigrate://localhost/migration").unwrap();
        assert_eq!(config, MigrateConfig::default());
        assert_eq!(
            config.to_url(),
            "docmigrate://localhost:5984/migration?kind=player&versions=1,2,3"
        );
        assert_eq!(MigrateConfig::from_url(&config.to_url()).unwrap(), config);
    }

    #[test]
    fn url_keeps_runner_settings() {
        let runner = RunnerConfig::default()
            .concurrency(8)
            .max_passes(5)
            .conflict_retry(ConflictRetryPolicy {
                max_attempts: 6,
                ..ConflictRetryPolicy::default()
            });
        let config = MigrateConfig::new()
            .host("db.local")
            .kind("npc")
            .versions([1, 2])
            .runner(runner);

        assert_eq!(
            config.to_url(),
            "docmigrate://db.local:5984/migration?kind=npc&versions=1,2&concurrency=8&max_passes=5&max_attempts=6"
        );
        assert_eq!(MigrateConfig::from_url(&config.to_url()).unwrap(), config);
    }

    #[test]
    fn rejects_bad_urls_and_settings() {
        assert!(MigrateConfig::from_url("http://localhost:5984/migration").is_err());
        assert!(MigrateConfig::from_url("docmigrate://localhost:abc/migration").is_err());
        assert!(MigrateConfig::from_url("docmigrate://localhost").is_err());
        assert!(MigrateConfig::from_url("docmigrate://localhost/m?versions=0,1").is_err());
        assert!(MigrateConfig::from_url("docmigrate://localhost/m?concurrency=0").is_err());
        assert!(MigrateConfig::from_url("docmigrate://localhost/m?colour=blue").is_err());
        assert!(MigrateConfig::new().versions(Vec::<u32>::new()).validate().is_err());
    }
}
