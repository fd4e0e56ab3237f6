use std::str::FromStr;
use std::time;

use config_check::CheckSettings;
use envconfig::Envconfig;
use operator_common::kube::{DEFAULT_API_URL, DEFAULT_CA_PATH, DEFAULT_TOKEN_PATH};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "LOG_FORMAT", default = "text")]
    pub log_format: LogFormat,

    #[envconfig(default = "https://kubernetes.default.svc")]
    pub kube_api_url: String,

    #[envconfig(default = "/var/run/secrets/kubernetes.io/serviceaccount/token")]
    pub kube_token_path: String,

    #[envconfig(default = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")]
    pub kube_ca_path: String,

    #[envconfig(default = "false")]
    pub kube_insecure_tls: bool,

    #[envconfig(default = "vector")]
    pub operator_namespace: String,

    #[envconfig(default = "30000")]
    pub resync_interval: EnvMsDuration,

    #[envconfig(default = "4")]
    pub max_concurrent_reconciles: usize,

    #[envconfig(default = "5000")]
    pub retry_backoff: EnvMsDuration,

    #[envconfig(nested = true)]
    pub config_check: ConfigCheckConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            log_format: LogFormat::Text,
            kube_api_url: DEFAULT_API_URL.to_owned(),
            kube_token_path: DEFAULT_TOKEN_PATH.to_owned(),
            kube_ca_path: DEFAULT_CA_PATH.to_owned(),
            kube_insecure_tls: false,
            operator_namespace: "vector".to_owned(),
            resync_interval: EnvMsDuration(time::Duration::from_secs(30)),
            max_concurrent_reconciles: 4,
            retry_backoff: EnvMsDuration(time::Duration::from_secs(5)),
            config_check: ConfigCheckConfig::default(),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct ConfigCheckConfig {
    #[envconfig(from = "CONFIG_CHECK_TIMEOUT", default = "300000")]
    pub timeout: EnvMsDuration,

    #[envconfig(from = "CONFIG_CHECK_POLL_INTERVAL", default = "5000")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(
        from = "CONFIG_CHECK_IMAGE",
        default = "timberio/vector:0.28.1-distroless-libc"
    )]
    pub image: String,

    #[envconfig(from = "CONFIG_CHECK_UNPACK_IMAGE", default = "busybox:1.36")]
    pub unpack_image: String,
}

impl ConfigCheckConfig {
    pub fn settings(&self) -> CheckSettings {
        CheckSettings {
            timeout: self.timeout.0,
            poll_interval: self.poll_interval.0,
            image: self.image.clone(),
            unpack_image: self.unpack_image.clone(),
        }
    }
}

impl Default for ConfigCheckConfig {
    fn default() -> Self {
        let settings = CheckSettings::default();
        Self {
            timeout: EnvMsDuration(settings.timeout),
            poll_interval: EnvMsDuration(settings.poll_interval),
            image: settings.image,
            unpack_image: settings.unpack_image,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLogFormatError(pub String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ParseLogFormatError(other.to_owned())),
        }
    }
}
