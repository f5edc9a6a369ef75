//! Configuration file support.
//!
//! Supports `.ktree.yaml` files placed anywhere in the directory hierarchy;
//! the nearest one from the working directory upward wins.

use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
	client::KubeconfigSource,
	reauth::{CommandReauthenticator, NoReauth, Reauthenticator},
	watch::{WatchOptions, MAX_EVENT_BUFFER},
};

/// The name of the config file looked for
pub const CONFIG_FILE_NAME: &str = ".ktree.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("`{field}` {reason}")]
	Invalid {
		field: &'static str,
		reason: String,
	},
}

/// Root configuration structure for `.ktree.yaml`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ExplorerConfig {
	/// Kubeconfig file to use instead of `$KUBECONFIG` / `~/.kube/config`.
	pub kubeconfig: Option<PathBuf>,

	/// Contexts queried when none are given. Empty means the current context.
	pub contexts: Vec<String>,

	pub sync_timeout_seconds: u64,
	pub stop_timeout_seconds: u64,
	pub event_buffer: usize,
	pub request_timeout_seconds: u64,

	/// Command run to refresh credentials after an authentication failure,
	/// e.g. `["gcloud-login", "--context", "{context}"]`.
	pub reauth_command: Vec<String>,
}

impl Default for ExplorerConfig {
	fn default() -> Self {
		Self {
			kubeconfig: None,
			contexts: Vec::new(),
			sync_timeout_seconds: 30,
			stop_timeout_seconds: 5,
			event_buffer: 1024,
			request_timeout_seconds: 30,
			reauth_command: Vec::new(),
		}
	}
}

impl ExplorerConfig {
	/// Load config by searching from the given directory upward.
	/// Defaults apply when no file is found.
	pub fn load_from_directory(start_dir: &Path) -> Result<Self, ConfigError> {
		match find_config_file(start_dir) {
			Some(path) => Self::load_from_file(&path),
			None => Ok(Self::default()),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let timeouts = [
			("syncTimeoutSeconds", self.sync_timeout_seconds),
			("stopTimeoutSeconds", self.stop_timeout_seconds),
			("requestTimeoutSeconds", self.request_timeout_seconds),
		];
		if let Some((field, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
			return Err(ConfigError::Invalid {
				field: *field,
				reason: "must be greater than zero".to_string(),
			});
		}
		if !(1..=MAX_EVENT_BUFFER).contains(&self.event_buffer) {
			return Err(ConfigError::Invalid {
				field: "eventBuffer",
				reason: format!("must be between 1 and {MAX_EVENT_BUFFER}"),
			});
		}
		Ok(())
	}

	pub fn kubeconfig_source(&self) -> KubeconfigSource {
		match &self.kubeconfig {
			Some(path) => KubeconfigSource::Path(path.clone()),
			None => KubeconfigSource::Default,
		}
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_seconds)
	}

	pub fn watch_options(&self) -> WatchOptions {
		WatchOptions {
			sync_timeout: Duration::from_secs(self.sync_timeout_seconds),
			stop_timeout: Duration::from_secs(self.stop_timeout_seconds),
			event_buffer: self.event_buffer,
			namespace: None,
		}
	}

	pub fn reauthenticator(&self) -> Arc<dyn Reauthenticator> {
		match CommandReauthenticator::new(self.reauth_command.clone()) {
			Some(command) => Arc::new(command),
			None => Arc::new(NoReauth),
		}
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.is_file() {
			return Some(config_path);
		}
		if !current.pop() {
			return None;
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;

	fn write_config(dir: &Path, content: &str) -> PathBuf {
		let path = dir.join(CONFIG_FILE_NAME);
		fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_find_config_in_parent_dir() {
		let temp = TempDir::new().unwrap();
		let config_path = write_config(temp.path(), "eventBuffer: 64\n");
		let subdir = temp.path().join("a").join("b");
		fs::create_dir_all(&subdir).unwrap();

		let found = find_config_file(&subdir).unwrap();
		// Compare file names only to avoid canonicalization issues on macOS
		assert_eq!(found.file_name(), config_path.file_name());
	}

	#[test]
	fn test_missing_file_gives_defaults() {
		let temp = TempDir::new().unwrap();
		let config = ExplorerConfig::load_from_directory(temp.path()).unwrap();
		assert_eq!(config.sync_timeout_seconds, 30);
		assert_eq!(config.stop_timeout_seconds, 5);
		assert_eq!(config.event_buffer, 1024);
		assert!(config.contexts.is_empty());
		assert_matches!(config.kubeconfig_source(), KubeconfigSource::Default);
	}

	#[test]
	fn test_load_full_config() {
		let temp = TempDir::new().unwrap();
		let path = write_config(
			temp.path(),
			indoc! {"
				kubeconfig: /etc/ktree/kubeconfig
				contexts: [prod-eu, prod-us]
				syncTimeoutSeconds: 10
				stopTimeoutSeconds: 2
				eventBuffer: 256
				requestTimeoutSeconds: 15
				reauthCommand: [sso-login, --context, '{context}']
			"},
		);

		let config = ExplorerConfig::load_from_file(&path).unwrap();
		assert_eq!(config.contexts, vec!["prod-eu", "prod-us"]);
		assert_matches!(
			config.kubeconfig_source(),
			KubeconfigSource::Path(p) if p == Path::new("/etc/ktree/kubeconfig")
		);
		let options = config.watch_options();
		assert_eq!(options.sync_timeout, Duration::from_secs(10));
		assert_eq!(options.stop_timeout, Duration::from_secs(2));
		assert_eq!(options.event_buffer, 256);
		assert_eq!(config.request_timeout(), Duration::from_secs(15));
		assert_eq!(config.reauth_command[2], "{context}");
	}

	#[test]
	fn test_unknown_key_is_rejected() {
		let temp = TempDir::new().unwrap();
		let path = write_config(temp.path(), "syncTimeout: 10\n");
		assert_matches!(
			ExplorerConfig::load_from_file(&path),
			Err(ConfigError::Parse { .. })
		);
	}

	#[rstest]
	#[case("eventBuffer: 0\n", "eventBuffer")]
	#[case("stopTimeoutSeconds: 0\n", "stopTimeoutSeconds")]
	#[case("requestTimeoutSeconds: 0\n", "requestTimeoutSeconds")]
	fn test_zero_values_are_rejected(#[case] content: &str, #[case] expected: &str) {
		let temp = TempDir::new().unwrap();
		let path = write_config(temp.path(), content);
		assert_matches!(
			ExplorerConfig::load_from_file(&path),
			Err(ConfigError::Invalid { field, .. }) if field == expected
		);
	}

	#[test]
	fn test_oversized_event_buffer_is_rejected() {
		let temp = TempDir::new().unwrap();
		let path = write_config(temp.path(), &format!("eventBuffer: {}\n", usize::MAX));
		assert_matches!(
			ExplorerConfig::load_from_file(&path),
			Err(ConfigError::Invalid { field: "eventBuffer", reason }) if reason.contains("65536")
		);

		let path = write_config(temp.path(), &format!("eventBuffer: {MAX_EVENT_BUFFER}\n"));
		assert_eq!(
			ExplorerConfig::load_from_file(&path).unwrap().event_buffer,
			MAX_EVENT_BUFFER
		);
	}

	#[test]
	fn test_large_timeouts_are_not_truncated() {
		let temp = TempDir::new().unwrap();
		let path = write_config(temp.path(), "syncTimeoutSeconds: 4294967296\n");
		let config = ExplorerConfig::load_from_file(&path).unwrap();
		assert_eq!(config.watch_options().sync_timeout, Duration::from_secs(1 << 32));
	}
}
