//! Recently used targets
//!
//! Stored as a JSON array under the platform data directory. The store is a
//! convenience only, so every I/O or parse failure is logged and ignored.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum remembered hosts
pub const MAX_RECENT_HOSTS: usize = 20;

/// Most-recent-first list of targets
#[derive(Debug, Clone)]
pub struct RecentHosts {
    path: PathBuf,
}

impl RecentHosts {
    /// Store at `<data dir>/mtroute/history.json`
    ///
    /// `None` when the platform has no data directory.
    pub fn open() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::at(dir.join("mtroute").join("history.json")))
    }

    /// Store at an explicit file path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the list, empty when missing or unreadable
    pub fn load(&self) -> Vec<String> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No recent hosts at {}: {e}", self.path.display());
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&contents) {
            Ok(mut hosts) => {
                hosts.truncate(MAX_RECENT_HOSTS);
                hosts
            }
            Err(e) => {
                debug!("Ignoring malformed recent hosts file: {e}");
                Vec::new()
            }
        }
    }

    /// Move `host` to the front and persist
    ///
    /// Returns the updated list.
    pub fn save(&self, host: &str) -> Vec<String> {
        let host = host.trim();
        let mut hosts = self.load();
        if host.is_empty() {
            return hosts;
        }
        hosts.retain(|h| !h.eq_ignore_ascii_case(host));
        hosts.insert(0, host.to_string());
        hosts.truncate(MAX_RECENT_HOSTS);

        if let Err(e) = self.write(&hosts) {
            debug!("Could not save recent hosts to {}: {e}", self.path.display());
        }
        hosts
    }

    fn write(&self, hosts: &[String]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(hosts)?;
        fs::write(&self.path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RecentHosts {
        let dir = std::env::temp_dir().join(format!(
            "mtroute-history-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        RecentHosts::at(dir.join("nested").join("history.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        assert!(store().load().is_empty());
    }

    #[test]
    fn test_save_orders_and_dedups() {
        let hosts = store();
        hosts.save("example.com");
        hosts.save("8.8.8.8");
        let list = hosts.save("EXAMPLE.com");
        assert_eq!(list, vec!["EXAMPLE.com", "8.8.8.8"]);
        assert_eq!(hosts.load(), list);
        let _ = fs::remove_dir_all(hosts.path().parent().unwrap().parent().unwrap());
    }

    #[test]
    fn test_caps_at_twenty() {
        let hosts = store();
        for i in 0..25 {
            hosts.save(&format!("host{i}.example"));
        }
        let list = hosts.load();
        assert_eq!(list.len(), MAX_RECENT_HOSTS);
        assert_eq!(list[0], "host24.example");
        assert_eq!(list[19], "host5.example");
        let _ = fs::remove_dir_all(hosts.path().parent().unwrap().parent().unwrap());
    }

    #[test]
    fn test_malformed_file_ignored() {
        let hosts = store();
        fs::create_dir_all(hosts.path().parent().unwrap()).unwrap();
        fs::write(hosts.path(), "{not json").unwrap();
        assert!(hosts.load().is_empty());
        assert_eq!(hosts.save("a.example"), vec!["a.example"]);
        let _ = fs::remove_dir_all(hosts.path().parent().unwrap().parent().unwrap());
    }

    #[test]
    fn test_blank_host_not_saved() {
        let hosts = store();
        assert!(hosts.save("   ").is_empty());
        assert!(!hosts.path().exists());
    }
}
