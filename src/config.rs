use crate::duration;
use crate::error::ConfigError;
use crate::probe::default_probe_timeout;
use crate::service::ServiceDescriptor;
use crate::strategy::{BlockingSpec, GroupSpec, WaitMode};
use hyper::Uri;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the gate
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Fallback settings for every gate
    #[serde(default)]
    pub defaults: GateDefaults,

    /// Gates keyed by the virtual host they serve
    #[serde(default)]
    pub gates: HashMap<String, GateConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 80)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Port for the internal admin API, bound to localhost
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Maximum idle upstream connections per host (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle upstream connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Max time to wait for an upstream response once forwarded (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            admin_port: default_admin_port(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Settings shared by all gates unless a gate overrides them
#[derive(Debug, Deserialize, Clone)]
pub struct GateDefaults {
    /// Orchestrator wake/status endpoint
    pub serviceurl: Option<String>,

    /// Inactivity timeout sent to the orchestrator (default: "1m")
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Wait in the browser (true, default) or on the server (false)
    #[serde(default = "default_waitui")]
    pub waitui: bool,

    /// Maximum server-side wait (default: "1m")
    #[serde(default = "default_blockdelay")]
    pub blockdelay: String,

    /// Poll cadence for server-side waits (default: "1s")
    #[serde(default = "default_block_check_interval")]
    pub block_check_interval: String,

    /// Per wake call timeout (default: the gate timeout, at most 10s)
    pub probe_timeout: Option<String>,

    /// Override template for the error page
    pub errorpage: Option<String>,

    /// Override template for the loading page
    pub loadingpage: Option<String>,
}

impl Default for GateDefaults {
    fn default() -> Self {
        Self {
            serviceurl: None,
            timeout: default_timeout(),
            waitui: default_waitui(),
            blockdelay: default_blockdelay(),
            block_check_interval: default_block_check_interval(),
            probe_timeout: None,
            errorpage: None,
            loadingpage: None,
        }
    }
}

/// Configuration of one gate: a group of services behind a virtual host
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    /// Label shown on pages and in logs (default: the host)
    pub group: Option<String>,

    /// Single service name (exclusive with `names`)
    pub name: Option<String>,

    /// Service names gated together (exclusive with `name`)
    #[serde(default)]
    pub names: Vec<String>,

    /// Where ready requests are forwarded, e.g. "http://127.0.0.1:3000"
    #[serde(default)]
    pub upstream: String,

    pub serviceurl: Option<String>,
    pub timeout: Option<String>,
    pub waitui: Option<bool>,
    pub blockdelay: Option<String>,
    pub block_check_interval: Option<String>,
    pub probe_timeout: Option<String>,
    pub errorpage: Option<String>,
    pub loadingpage: Option<String>,
}

/// A gate's validated, fully resolved settings
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub host: String,
    pub group: GroupSpec,
    pub mode: WaitMode,
    pub upstream: Uri,
    pub probe_timeout: Duration,
    pub loading_page: Option<PathBuf>,
    pub error_page: Option<PathBuf>,
}

impl GateConfig {
    /// Create a gate for a single service
    pub fn single(name: &str, upstream: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            upstream: upstream.to_string(),
            ..Self::default()
        }
    }

    /// Create a gate for several services woken together
    pub fn multi(names: &[&str], upstream: &str) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            upstream: upstream.to_string(),
            ..Self::default()
        }
    }

    /// Set the orchestrator endpoint (builder pattern)
    pub fn with_serviceurl(mut self, url: &str) -> Self {
        self.serviceurl = Some(url.to_string());
        self
    }

    /// Wait on the server instead of the browser (builder pattern)
    pub fn blocking(mut self, blockdelay: &str) -> Self {
        self.waitui = Some(false);
        self.blockdelay = Some(blockdelay.to_string());
        self
    }

    pub fn serviceurl<'a>(&'a self, defaults: &'a GateDefaults) -> Option<&'a str> {
        self.serviceurl
            .as_deref()
            .or(defaults.serviceurl.as_deref())
    }

    pub fn waitui(&self, defaults: &GateDefaults) -> bool {
        self.waitui.unwrap_or(defaults.waitui)
    }

    /// Validate the gate and resolve it against the defaults
    pub fn resolve(&self, host: &str, defaults: &GateDefaults) -> Result<GateSettings, ConfigError> {
        let gate = || host.to_string();

        let service_url = self
            .serviceurl(defaults)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ConfigError::MissingServiceUrl { gate: gate() })?;

        let single = self.name.as_deref().filter(|n| !n.is_empty());
        let names: Vec<&str> = match (single, self.names.is_empty()) {
            (Some(_), false) => return Err(ConfigError::ConflictingNames { gate: gate() }),
            (None, true) => return Err(ConfigError::MissingNames { gate: gate() }),
            (Some(name), true) => vec![name],
            (None, false) => self.names.iter().map(String::as_str).collect(),
        };
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::EmptyServiceName { gate: gate() });
        }

        let timeout = parse_field(host, "timeout", self.timeout.as_deref().unwrap_or(&defaults.timeout))?;

        let mode = if self.waitui(defaults) {
            WaitMode::Dynamic
        } else {
            let block_delay = parse_field(
                host,
                "blockdelay",
                self.blockdelay.as_deref().unwrap_or(&defaults.blockdelay),
            )?;
            let check_interval = parse_field(
                host,
                "block_check_interval",
                self.block_check_interval
                    .as_deref()
                    .unwrap_or(&defaults.block_check_interval),
            )?;
            let spec = BlockingSpec::new(block_delay, check_interval).ok_or_else(|| {
                ConfigError::ZeroDuration {
                    gate: gate(),
                    field: "block_check_interval",
                }
            })?;
            WaitMode::Blocking(spec)
        };

        let probe_timeout = match self.probe_timeout.as_deref().or(defaults.probe_timeout.as_deref()) {
            Some(value) => {
                let parsed = parse_field(host, "probe_timeout", value)?;
                if parsed.is_zero() {
                    return Err(ConfigError::ZeroDuration {
                        gate: gate(),
                        field: "probe_timeout",
                    });
                }
                parsed
            }
            None => default_probe_timeout(timeout),
        };

        let upstream = parse_upstream(host, &self.upstream)?;

        let services = names
            .iter()
            .map(|name| ServiceDescriptor::new(service_url, name, timeout))
            .collect();

        Ok(GateSettings {
            host: host.to_string(),
            group: GroupSpec {
                name: self.group.clone().unwrap_or_else(gate),
                timeout,
                services,
            },
            mode,
            upstream,
            probe_timeout,
            loading_page: page_path(self.loadingpage.as_ref().or(defaults.loadingpage.as_ref())),
            error_page: page_path(self.errorpage.as_ref().or(defaults.errorpage.as_ref())),
        })
    }
}

fn parse_field(host: &str, field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    duration::parse(value).map_err(|source| ConfigError::InvalidDuration {
        gate: host.to_string(),
        field,
        value: value.to_string(),
        source,
    })
}

fn parse_upstream(host: &str, value: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUpstream {
        gate: host.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.trim().is_empty() {
        return Err(invalid("upstream is required"));
    }
    let uri: Uri = value.trim().parse().map_err(|e: hyper::http::uri::InvalidUri| invalid(&e.to_string()))?;
    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http:// upstreams are supported"));
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(uri)
}

fn page_path(value: Option<&String>) -> Option<PathBuf> {
    value.filter(|p| !p.is_empty()).map(PathBuf::from)
}

// Default value functions
fn default_listen_port() -> u16 {
    80
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_admin_port() -> u16 {
    9999
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_request_timeout() -> u64 {
    30
}

fn default_timeout() -> String {
    "1m".to_string()
}

fn default_waitui() -> bool {
    true
}

fn default_blockdelay() -> String {
    "1m".to_string()
}

fn default_block_check_interval() -> String {
    "1s".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.resolve_gates().map(|_| ())
    }

    /// Resolve every gate, sorted by host, reporting all invalid gates at once
    pub fn resolve_gates(&self) -> anyhow::Result<Vec<GateSettings>> {
        let mut hosts: Vec<&String> = self.gates.keys().collect();
        hosts.sort();

        let mut errors = Vec::new();
        let mut settings = Vec::with_capacity(hosts.len());

        let mut seen: HashMap<String, &str> = HashMap::new();

        for host in hosts {
            if let Some(other) = seen.insert(host.to_lowercase(), host) {
                errors.push(
                    ConfigError::DuplicateHost {
                        gate: host.clone(),
                        other: other.to_string(),
                    }
                    .to_string(),
                );
                continue;
            }
            match self.gates[host].resolve(host, &self.defaults) {
                Ok(resolved) => settings.push(resolved),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(settings)
    }
}
