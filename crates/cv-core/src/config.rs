use crate::model::{Family, TableName};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/chainview/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub iptables: PathBuf,
    pub ip6tables: PathBuf,
    pub restart: RestartCommand,
    pub poll_interval_secs: u64,
    pub highlight_secs: u64,
    pub tables: Vec<TableName>,
    pub hide_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for RestartCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/etc/init.d/firewall"),
            args: vec!["restart".to_string()],
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            iptables: PathBuf::from("/usr/sbin/iptables"),
            ip6tables: PathBuf::from("/usr/sbin/ip6tables"),
            restart: RestartCommand::default(),
            poll_interval_secs: 5,
            highlight_secs: 2,
            tables: TableName::ALL.to_vec(),
            hide_empty: false,
        }
    }
}

impl ViewerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ViewerConfig =
            serde_yaml::from_str(yaml).context("Failed to parse viewer config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read viewer config from {:?}", path))?;
        Self::from_yaml(&content)
    }

    /// Explicit path wins; otherwise the system-wide file if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.tables.is_empty() {
            anyhow::bail!("at least one table must be enabled");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn highlight_duration(&self) -> Duration {
        Duration::from_secs(self.highlight_secs)
    }

    pub fn binary(&self, family: Family) -> &Path {
        match family {
            Family::V4 => &self.iptables,
            Family::V6 => &self.ip6tables,
        }
    }
}
