use crate::fetch::{IptablesFetcher, run_command};
use cv_core::{CommandError, Family, RestartCommand, ViewerConfig};
use std::path::PathBuf;
use tracing::{info, warn};

/// The two side-effecting commands the viewer may issue.
/// Output is discarded; only success or failure is reported.
pub struct FirewallActions {
    binaries: Vec<(Family, PathBuf)>,
    restart: RestartCommand,
}

impl FirewallActions {
    pub fn new(fetcher: &IptablesFetcher, config: &ViewerConfig) -> Self {
        let binaries = Family::ALL
            .into_iter()
            .filter_map(|family| {
                fetcher
                    .binary(family)
                    .map(|path| (family, path.to_path_buf()))
            })
            .collect();

        Self {
            binaries,
            restart: config.restart.clone(),
        }
    }

    pub fn families(&self) -> Vec<Family> {
        self.binaries.iter().map(|(family, _)| *family).collect()
    }

    /// `-Z` for every enabled family, issued concurrently
    pub async fn zero_counters(&self) -> Vec<(Family, Result<(), CommandError>)> {
        let resets = self.binaries.iter().map(|(family, binary)| async move {
            let result = run_command(binary, &["-Z"]).await.map(|_| ());
            match &result {
                Ok(()) => info!("Reset {} counters", family.tool()),
                Err(e) => warn!("Unable to reset {} counters: {}", family.tool(), e),
            }
            (*family, result)
        });

        futures::future::join_all(resets).await
    }

    pub async fn restart(&self) -> Result<(), CommandError> {
        let args: Vec<&str> = self.restart.args.iter().map(String::as_str).collect();
        let result = run_command(&self.restart.program, &args).await.map(|_| ());

        match &result {
            Ok(()) => info!("Restarted firewall via {}", self.restart.program.display()),
            Err(e) => warn!("Unable to restart firewall: {}", e),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn actions(iptables: &str, ip6tables: Option<&str>, restart: &str) -> FirewallActions {
        let fetcher =
            IptablesFetcher::with_binaries(PathBuf::from(iptables), ip6tables.map(PathBuf::from));
        let config = ViewerConfig {
            restart: RestartCommand {
                program: PathBuf::from(restart),
                args: vec![],
            },
            ..ViewerConfig::default()
        };
        FirewallActions::new(&fetcher, &config)
    }

    #[test]
    fn only_enabled_families_are_reset() {
        let actions = actions("/usr/sbin/iptables", None, "/etc/init.d/firewall");
        assert_eq!(actions.families(), vec![Family::V4]);
    }

    #[tokio::test]
    async fn each_family_reports_its_own_failure() {
        let actions = actions(
            "/nonexistent/chainview-iptables",
            Some("/nonexistent/chainview-ip6tables"),
            "/nonexistent/firewall",
        );

        let results = actions.zero_counters().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Family::V4);
        assert_eq!(results[1].0, Family::V6);
        assert!(results.iter().all(|(_, r)| r.is_err()));
    }

    #[tokio::test]
    async fn restart_failure_is_returned() {
        let actions = actions("/usr/sbin/iptables", None, "/nonexistent/firewall");
        let err = actions.restart().await.unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[tokio::test]
    async fn successful_command_reports_ok() {
        if !Path::new("/bin/true").exists() {
            return;
        }
        let actions = actions("/bin/true", None, "/bin/true");

        assert!(actions.restart().await.is_ok());
        assert!(actions.zero_counters().await[0].1.is_ok());
    }
}
