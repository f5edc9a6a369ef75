//! Recovery from expired or rejected cluster credentials.

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Placeholder substituted with the context name in a re-login command.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Classifies errors that an external re-login can fix.
pub trait AuthFailure {
	fn is_auth_failure(&self) -> bool;
}

impl AuthFailure for kube::Error {
	fn is_auth_failure(&self) -> bool {
		match self {
			kube::Error::Api(response) => response.code == 401,
			kube::Error::Auth(_) => true,
			_ => false,
		}
	}
}

impl AuthFailure for kube::runtime::watcher::Error {
	fn is_auth_failure(&self) -> bool {
		match self {
			Self::InitialListFailed(e) | Self::WatchStartFailed(e) | Self::WatchFailed(e) => {
				e.is_auth_failure()
			}
			_ => false,
		}
	}
}

#[derive(Debug, Error)]
pub enum ReauthError {
	#[error("no re-login command is configured")]
	NotConfigured,

	#[error("running re-login command `{program}`")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("re-login command `{program}` exited with {status}")]
	Failed {
		program: String,
		status: std::process::ExitStatus,
	},
}

/// Refreshes the credentials of one context out-of-band.
pub trait Reauthenticator: Send + Sync {
	fn reauthenticate<'a>(&'a self, context: &'a str)
		-> BoxFuture<'a, Result<(), ReauthError>>;
}

/// Used when nothing is configured; every auth failure stays final.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReauth;

impl Reauthenticator for NoReauth {
	fn reauthenticate<'a>(
		&'a self,
		_context: &'a str,
	) -> BoxFuture<'a, Result<(), ReauthError>> {
		Box::pin(async { Err(ReauthError::NotConfigured) })
	}
}

/// Runs an external login command, e.g. `["tsh", "kube", "login", "{context}"]`.
#[derive(Debug, Clone)]
pub struct CommandReauthenticator {
	argv: Vec<String>,
}

impl CommandReauthenticator {
	/// Returns `None` for an empty command line.
	pub fn new(argv: Vec<String>) -> Option<Self> {
		if argv.is_empty() {
			None
		} else {
			Some(Self { argv })
		}
	}

	fn command_for(&self, context: &str) -> Vec<String> {
		self.argv
			.iter()
			.map(|arg| arg.replace(CONTEXT_PLACEHOLDER, context))
			.collect()
	}
}

impl Reauthenticator for CommandReauthenticator {
	#[instrument(skip(self))]
	fn reauthenticate<'a>(&'a self, context: &'a str) -> BoxFuture<'a, Result<(), ReauthError>> {
		Box::pin(async move {
			let argv = self.command_for(context);
			let (program, args) = argv.split_first().ok_or(ReauthError::NotConfigured)?;

			debug!(program = %program, "running re-login command");
			let status = Command::new(program)
				.args(args)
				.status()
				.await
				.map_err(|source| ReauthError::Spawn {
					program: program.clone(),
					source,
				})?;

			if status.success() {
				Ok(())
			} else {
				Err(ReauthError::Failed {
					program: program.clone(),
					status,
				})
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_context_placeholder_substituted() {
		let reauth = CommandReauthenticator::new(vec![
			"login".into(),
			"--context={context}".into(),
			"{context}".into(),
		])
		.unwrap();

		assert_eq!(
			reauth.command_for("prod"),
			vec!["login", "--context=prod", "prod"]
		);
	}

	#[test]
	fn test_empty_command_is_rejected() {
		assert!(CommandReauthenticator::new(vec![]).is_none());
	}

	#[tokio::test]
	async fn test_no_reauth_always_fails() {
		assert_matches!(
			NoReauth.reauthenticate("any").await,
			Err(ReauthError::NotConfigured)
		);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_command_exit_status_is_checked() {
		let ok = CommandReauthenticator::new(vec!["true".into()]).unwrap();
		assert_matches!(ok.reauthenticate("dev").await, Ok(()));

		let failing = CommandReauthenticator::new(vec!["false".into()]).unwrap();
		assert_matches!(
			failing.reauthenticate("dev").await,
			Err(ReauthError::Failed { program, .. }) if program == "false"
		);
	}
}
