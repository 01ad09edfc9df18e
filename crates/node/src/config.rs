//! YAML configuration of the node daemon.
use std::fs;
use std::io;

use chordring_core::config::VnodeConfig;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::logging::LogLevel;
use crate::util::ensure_parent_dir;
use crate::util::expand_home;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:50000";
pub const DEFAULT_CONFIG_PATH: &str = "~/.chordring/config.yaml";
pub const DEFAULT_STATS_INTERVAL: u64 = 60;

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_stats_interval() -> u64 {
    DEFAULT_STATS_INTERVAL
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Address the TCP listener binds.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Address peers reach this node at, and the address its id derives from.
    /// Defaults to the bound address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_addr: Option<String>,
    #[serde(default)]
    pub vnode_num: u32,
    /// Address of a ring member to join through. A node without one starts a new ring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introducer: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Seconds between two stats reports.
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    /// Ring tunables, inlined at the top level of the file. Each missing field
    /// takes its default.
    #[serde(flatten)]
    pub vnode: VnodeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            external_addr: None,
            vnode_num: 0,
            introducer: None,
            log_level: LogLevel::default(),
            stats_interval: default_stats_interval(),
            vnode: VnodeConfig::default(),
        }
    }
}

impl Config {
    pub fn write_fs<P>(&self, path: P) -> Result<String>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        ensure_parent_dir(&path)?;
        let f =
            fs::File::create(path.as_path()).map_err(|e| Error::CreateFileError(e.to_string()))?;
        let f_writer = io::BufWriter::new(f);
        serde_yaml::to_writer(f_writer, self)?;
        Ok(path.to_string_lossy().to_string())
    }

    pub fn read_fs<P>(path: P) -> Result<Config>
    where P: AsRef<std::path::Path> {
        let path = expand_home(path)?;
        tracing::debug!("Read config from: {:?}", path);
        let f = fs::File::open(path).map_err(|e| Error::OpenFileError(e.to_string()))?;
        let f_rdr = io::BufReader::new(f);
        Ok(serde_yaml::from_reader(f_rdr)?)
    }
}

#[cfg(test)]
mod tests {
    use chordring_core::config::FingerStrategy;
    use chordring_core::config::RouteStrategy;

    use super::*;

    #[test]
    fn test_deserialization_with_missed_field() {
        let yaml = r#"
bind_addr: 0.0.0.0:4000
introducer: 10.0.0.1:4000
route_strategy: accordion
nsucc: 8
continuous:
  init_ms: 500
  base_ms: 500
  max_ms: 5000
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:4000");
        assert_eq!(cfg.introducer.as_deref(), Some("10.0.0.1:4000"));
        assert_eq!(cfg.external_addr, None);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.vnode.route_strategy, RouteStrategy::Accordion);
        assert_eq!(cfg.vnode.finger_strategy, FingerStrategy::Basic);
        assert_eq!(cfg.vnode.nsucc, 8);
        assert_eq!(cfg.vnode.continuous.max_ms, 5000);
        assert_eq!(cfg.vnode.backoff, VnodeConfig::default().backoff);
        assert!(cfg.vnode.verify_ids);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_write_then_read() {
        let path = std::env::temp_dir()
            .join(format!("chordring-{}", std::process::id()))
            .join("config.yaml");
        let mut cfg = Config::default();
        cfg.introducer = Some("127.0.0.1:50001".to_string());
        cfg.vnode.shave = true;
        cfg.log_level = LogLevel::Debug;

        let written = cfg.write_fs(&path).unwrap();
        let back = Config::read_fs(&written).unwrap();
        assert_eq!(back, cfg);
        let _ = fs::remove_file(&path);
    }
}
