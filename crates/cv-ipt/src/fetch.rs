use cv_core::{CommandError, Family, TableKey, TableName, ViewerConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Anything that can produce the raw rule dump for one (family, table)
pub trait DumpSource: Send + Sync + 'static {
    fn fetch(&self, key: TableKey) -> impl Future<Output = Result<String, CommandError>> + Send;

    /// Families this source can serve for the whole session
    fn families(&self) -> Vec<Family>;
}

/// Runs `iptables`/`ip6tables` to list one table at a time
pub struct IptablesFetcher {
    iptables: PathBuf,
    ip6tables: Option<PathBuf>,
}

impl IptablesFetcher {
    /// Probes for the IPv6 binary once; without it v6 stays disabled
    pub fn new(config: &ViewerConfig) -> Self {
        let ip6tables = if config.ip6tables.exists() {
            Some(config.ip6tables.clone())
        } else {
            info!(
                "{} not present, IPv6 tables disabled",
                config.ip6tables.display()
            );
            None
        };

        Self::with_binaries(config.iptables.clone(), ip6tables)
    }

    pub fn with_binaries(iptables: PathBuf, ip6tables: Option<PathBuf>) -> Self {
        Self {
            iptables,
            ip6tables,
        }
    }

    pub fn has_ipv6(&self) -> bool {
        self.ip6tables.is_some()
    }

    pub fn binary(&self, family: Family) -> Option<&Path> {
        match family {
            Family::V4 => Some(self.iptables.as_path()),
            Family::V6 => self.ip6tables.as_deref(),
        }
    }

    pub async fn fetch_table(&self, key: TableKey) -> Result<String, CommandError> {
        let program = self.binary(key.family).ok_or_else(|| CommandError::NotFound {
            program: key.family.tool().to_string(),
        })?;

        run_command(program, &dump_args(key.table)).await
    }
}

impl DumpSource for IptablesFetcher {
    fn fetch(&self, key: TableKey) -> impl Future<Output = Result<String, CommandError>> + Send {
        self.fetch_table(key)
    }

    fn families(&self) -> Vec<Family> {
        Family::ALL
            .into_iter()
            .filter(|family| self.binary(*family).is_some())
            .collect()
    }
}

/// Numeric addresses, exact counters, line numbers, wait for the xtables lock
pub fn dump_args(table: TableName) -> [&'static str; 5] {
    ["--line-numbers", "-w", "-nvxL", "-t", table.as_arg()]
}

/// Fetch every key concurrently and join; failures stay attached to their key
pub async fn fetch_all<S: DumpSource>(
    source: &S,
    keys: &[TableKey],
) -> Vec<(TableKey, Result<String, CommandError>)> {
    let fetches = keys.iter().map(|key| async move {
        let result = source.fetch(*key).await;
        if let Err(err) = &result {
            debug!("fetch {} failed: {}", key, err);
        }
        (*key, result)
    });

    futures::future::join_all(fetches).await
}

pub(crate) async fn run_command(program: &Path, args: &[&str]) -> Result<String, CommandError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandError::from_io(program.display().to_string(), e))?;

    if !output.status.success() {
        return Err(CommandError::Exit {
            program: program.display().to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
