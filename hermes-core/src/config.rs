use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HermesConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log_sink: LogSinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Downstream services keyed by service id.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Gateway listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_alive_path")]
    pub alive_path: String,
}

/// Settings shared by the gateway's own HTTP client and the caller-side client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client version this gateway expects callers to run.
    #[serde(default = "default_client_version")]
    pub version: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Response cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Milliseconds, or `"infinite"`.
    #[serde(default = "default_lifetime")]
    pub lifetime: CacheLifetime,
    /// 0 disables the background prune.
    #[serde(default = "default_prune_interval")]
    pub prune_interval_ms: u64,
}

/// How long a cached response stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLifetime {
    Infinite,
    #[serde(untagged)]
    Millis(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSinkConfig {
    #[serde(default)]
    pub kind: LogSinkKind,
    #[serde(default = "default_log_file")]
    pub file_path: PathBuf,
    /// Bounded queue between the pipeline and the file writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    #[default]
    Tracing,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// When false, no prometheus counters are updated on the hot path.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// One downstream service the gateway relays to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL, e.g. `http://distantworld:8081`.
    pub url: String,
    /// Application name reported for callers connecting from this service's host.
    #[serde(default)]
    pub name: Option<String>,
    /// Per-service override of the top-level cache settings.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// A gateway path relayed to a downstream path template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Gateway path in axum syntax, e.g. `/distantworld/test/{id}`.
    pub path: String,
    /// Downstream path template appended to the service URL, e.g. `/test/{id}`.
    ///
    /// Placeholders are filled by position, not by name: the first gateway
    /// path variable fills the first `{..}` here. `/a/{x}/{y}` relayed to
    /// `/b/{y}/{x}` sends the value of `x` into the `{y}` slot.
    pub target: String,
    #[serde(default)]
    pub method: RouteMethod,
    #[serde(default)]
    pub cacheable: bool,
    /// Payload kind discriminator used in cache keys.
    #[serde(default = "default_payload")]
    pub payload: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    #[default]
    Get,
    Post,
}

// ── Defaults ──────────────────────────────────────────────────

const ONE_HOUR_MS: u64 = 60 * 60 * 1000;

fn default_server_addr() -> String { "0.0.0.0:8080".into() }
fn default_alive_path() -> String { "/hermes/alive".into() }
fn default_client_version() -> String { env!("CARGO_PKG_VERSION").into() }
fn default_connect_timeout() -> u64 { 2000 }
fn default_read_timeout() -> u64 { 5000 }
fn default_lifetime() -> CacheLifetime { CacheLifetime::Millis(ONE_HOUR_MS) }
fn default_prune_interval() -> u64 { ONE_HOUR_MS }
fn default_log_file() -> PathBuf { PathBuf::from("logs/hermes-calls.log") }
fn default_channel_capacity() -> usize { 10_000 }
fn default_metrics_path() -> String { "/metrics".into() }
fn default_payload() -> String { "json".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            alive_path: default_alive_path(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: default_client_version(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifetime: default_lifetime(),
            prune_interval_ms: default_prune_interval(),
        }
    }
}

impl CacheConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl CacheLifetime {
    /// `None` for an infinite lifetime.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            CacheLifetime::Infinite => None,
            CacheLifetime::Millis(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            kind: LogSinkKind::Tracing,
            file_path: default_log_file(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl ServiceConfig {
    /// Cache settings for this service, falling back to the gateway defaults.
    pub fn effective_cache(&self, defaults: &CacheConfig) -> CacheConfig {
        self.cache.unwrap_or(*defaults)
    }
}

impl HermesConfig {
    /// Load configuration from YAML file + env overrides.
    ///
    /// Environment keys use `__` as the nesting separator so that field names
    /// keep their underscores: `HERMES_CLIENT__READ_TIMEOUT_MS=800`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: HermesConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("HERMES_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── Default values ────────────────────────────────────────────

    #[test]
    fn default_server_config_has_expected_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.addr, "0.0.0.0:8080");
        assert_eq!(cfg.alive_path, "/hermes/alive");
    }

    #[test]
    fn default_client_config_uses_crate_version() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(cfg.connect_timeout(), Duration::from_millis(2000));
        assert_eq!(cfg.read_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn default_cache_is_one_hour_both_ways() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.lifetime.as_duration(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.prune_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn default_sink_is_tracing_and_metrics_disabled() {
        let cfg = HermesConfig::default();
        assert_eq!(cfg.log_sink.kind, LogSinkKind::Tracing);
        assert_eq!(cfg.log_sink.channel_capacity, 10_000);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.metrics.path, "/metrics");
        assert!(cfg.services.is_empty());
    }

    // ── CacheLifetime serde ───────────────────────────────────────

    #[test]
    fn lifetime_parses_infinite_keyword() {
        let lifetime: CacheLifetime = serde_json::from_str("\"infinite\"").unwrap();
        assert_eq!(lifetime, CacheLifetime::Infinite);
        assert!(lifetime.as_duration().is_none());
    }

    #[test]
    fn lifetime_parses_plain_millis() {
        let lifetime: CacheLifetime = serde_json::from_str("1500").unwrap();
        assert_eq!(lifetime, CacheLifetime::Millis(1500));
        assert_eq!(lifetime.as_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn lifetime_serializes_back_to_same_shape() {
        assert_eq!(serde_json::to_string(&CacheLifetime::Infinite).unwrap(), "\"infinite\"");
        assert_eq!(serde_json::to_string(&CacheLifetime::Millis(10)).unwrap(), "10");
    }

    // ── Service cache override ────────────────────────────────────

    #[test]
    fn effective_cache_prefers_service_override() {
        let defaults = CacheConfig::default();
        let mut svc = ServiceConfig {
            url: "http://svc:8081".into(),
            name: None,
            cache: None,
            routes: vec![],
        };
        assert_eq!(svc.effective_cache(&defaults), defaults);

        let custom = CacheConfig { lifetime: CacheLifetime::Infinite, prune_interval_ms: 10 };
        svc.cache = Some(custom);
        assert_eq!(svc.effective_cache(&defaults), custom);
    }

    // ── HermesConfig::load() ──────────────────────────────────────

    #[test]
    fn load_from_valid_yaml_overrides_defaults() {
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "server:\n  addr: \"127.0.0.1:9999\"\nclient:\n  version: \"2.0\"\n").unwrap();
        let cfg = HermesConfig::load(tmpfile.path()).unwrap();
        assert_eq!(cfg.server.addr, "127.0.0.1:9999");
        assert_eq!(cfg.client.version, "2.0");
        // Defaults still apply for unspecified fields
        assert_eq!(cfg.server.alive_path, "/hermes/alive");
        assert_eq!(cfg.client.read_timeout_ms, 5000);
    }

    #[test]
    fn load_yaml_with_services_and_routes() {
        let yaml = r#"
cache:
  lifetime: infinite
  prune_interval_ms: 500
services:
  distantworld:
    url: "http://distantworld:8081"
    name: "DistantWorld"
    cache:
      lifetime: 1000
      prune_interval_ms: 250
    routes:
      - path: "/distantworld/test/{id}"
        target: "/test/{id}"
        cacheable: true
        payload: "DistantWorld"
      - path: "/distantworld/echo"
        target: "/echo"
        method: post
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "{yaml}").unwrap();
        let cfg = HermesConfig::load(tmpfile.path()).unwrap();
        assert_eq!(cfg.cache.lifetime, CacheLifetime::Infinite);
        assert_eq!(cfg.cache.prune_interval_ms, 500);

        let svc = &cfg.services["distantworld"];
        assert_eq!(svc.name.as_deref(), Some("DistantWorld"));
        let cache = svc.effective_cache(&cfg.cache);
        assert_eq!(cache.lifetime, CacheLifetime::Millis(1000));
        assert_eq!(cache.prune_interval_ms, 250);

        assert_eq!(svc.routes.len(), 2);
        assert_eq!(svc.routes[0].method, RouteMethod::Get);
        assert!(svc.routes[0].cacheable);
        assert_eq!(svc.routes[0].payload, "DistantWorld");
        assert_eq!(svc.routes[1].method, RouteMethod::Post);
        assert!(!svc.routes[1].cacheable);
        assert_eq!(svc.routes[1].payload, "json");
    }

    #[test]
    fn load_yaml_with_file_sink() {
        let yaml = r#"
log_sink:
  kind: file
  file_path: "/tmp/hermes/calls.log"
  channel_capacity: 64
metrics:
  enabled: true
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "{yaml}").unwrap();
        let cfg = HermesConfig::load(tmpfile.path()).unwrap();
        assert_eq!(cfg.log_sink.kind, LogSinkKind::File);
        assert_eq!(cfg.log_sink.file_path, PathBuf::from("/tmp/hermes/calls.log"));
        assert_eq!(cfg.log_sink.channel_capacity, 64);
        assert!(cfg.metrics.enabled);
    }
}
