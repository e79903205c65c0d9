#![deny(unsafe_code)]

//! Layered configuration for mqrpc processes
//!
//! Sources, later ones override earlier ones:
//! 1. `/etc/mqrpc/mqrpc.toml`
//! 2. `./mqrpc.toml`
//! 3. the file named by [`Options::cfg_name`]
//! 4. environment variables prefixed with `MQRPC_`, nested keys separated by `__`
//!    (`MQRPC_RPC__REQUEST_TIMEOUT=10s`)
//! 5. [`Options`] fields set by the embedding process

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use mqrpc_codec::QoS;
use mqrpc_utils::deserialize_duration;

use self::logging::Log;

pub use self::options::Options;

pub mod logging;
pub mod options;

pub type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub agent: Agent,
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/mqrpc/mqrpc").required(false))
            .add_source(File::with_name("mqrpc").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("mqrpc").prefix_separator("_").separator("__").try_parsing(true),
        );

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Options override file and environment configuration
        if let Some(id) = opts.agent_id.as_ref() {
            inner.agent.id.clone_from(id);
        }
        if let Some(app_name) = opts.app_name.as_ref() {
            inner.agent.app_name.clone_from(app_name);
        }
        if let Some(timeout) = opts.request_timeout {
            inner.rpc.request_timeout = timeout;
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn try_instance() -> Option<&'static Self> {
        SETTINGS.get()
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("agent is {:?}, app is {:?}, api version {}", self.agent.id, self.agent.app_name, self.agent.api_version);
        log::info!("rpc config is: {:?}", self.rpc);
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

/// Identity used to build the agent topics
#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default = "Agent::api_version_default")]
    pub api_version: String,
}

impl Default for Agent {
    #[inline]
    fn default() -> Self {
        Self { id: String::new(), app_name: String::new(), api_version: Self::api_version_default() }
    }
}

impl Agent {
    fn api_version_default() -> String {
        "v1".into()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rpc {
    #[serde(default = "Rpc::publish_qos_default", deserialize_with = "Rpc::deserialize_qos")]
    pub publish_qos: QoS,

    //Default bound for the timeout race helper.
    #[serde(default = "Rpc::request_timeout_default", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    //Maximum number of remembered request ids, 0 is unbounded.
    #[serde(default = "Rpc::dedup_capacity_default")]
    pub dedup_capacity: usize,
}

impl Default for Rpc {
    #[inline]
    fn default() -> Self {
        Self {
            publish_qos: Self::publish_qos_default(),
            request_timeout: Self::request_timeout_default(),
            dedup_capacity: Self::dedup_capacity_default(),
        }
    }
}

impl Rpc {
    fn publish_qos_default() -> QoS {
        QoS::AtLeastOnce
    }

    fn request_timeout_default() -> Duration {
        Duration::from_millis(5000)
    }

    fn dedup_capacity_default() -> usize {
        100_000
    }

    fn deserialize_qos<'de, D>(deserializer: D) -> std::result::Result<QoS, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = u8::deserialize(deserializer)?;
        QoS::try_from(v).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cfg(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert_eq!(settings.agent.api_version, "v1");
        assert_eq!(settings.rpc.publish_qos, QoS::AtLeastOnce);
        assert_eq!(settings.rpc.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.rpc.dedup_capacity, 100_000);
        assert!(settings.log.to.console());
    }

    #[test]
    fn test_file_and_options() {
        let cfg = write_cfg(
            "mqrpc-conf-file",
            r#"
[agent]
id = "agent-1"
app_name = "conference"

[rpc]
publish_qos = 2
request_timeout = "1m30s"
dedup_capacity = 0

[log]
to = "off"
level = "debug"
"#,
        );
        let opts = Options { cfg_name: Some(cfg.clone()), ..Default::default() };
        let settings = Settings::new(opts).expect("Settings creation failed");
        assert_eq!(settings.agent.id, "agent-1");
        assert_eq!(settings.agent.app_name, "conference");
        assert_eq!(settings.rpc.publish_qos, QoS::ExactlyOnce);
        assert_eq!(settings.rpc.request_timeout, Duration::from_secs(90));
        assert_eq!(settings.rpc.dedup_capacity, 0);
        assert!(settings.log.to.off());
        assert_eq!(settings.log.level.inner(), slog::Level::Debug);

        let opts = Options {
            cfg_name: Some(cfg.clone()),
            agent_id: Some("agent-2".into()),
            request_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let settings = Settings::new(opts).expect("Settings creation failed");
        assert_eq!(settings.agent.id, "agent-2");
        assert_eq!(settings.agent.app_name, "conference");
        assert_eq!(settings.rpc.request_timeout, Duration::from_millis(50));

        let _ = std::fs::remove_file(cfg);
    }

    #[test]
    fn test_invalid_qos() {
        let cfg = write_cfg("mqrpc-conf-qos", "[rpc]\npublish_qos = 3\n");
        let opts = Options { cfg_name: Some(cfg.clone()), ..Default::default() };
        assert!(Settings::new(opts).is_err());
        let _ = std::fs::remove_file(cfg);
    }
}
