use std::process::Command;

fn main() {
	println!("cargo:rerun-if-changed=.git/HEAD");
	println!("cargo:rerun-if-changed=.git/refs/");
	println!("cargo:rustc-env=KTREE_VERSION={}", version());
}

/// Release builds carry their version in Cargo.toml; dev builds describe
/// the checkout (`0.3.1`, `0.3.1-4-gabc1234`, or a bare commit).
fn version() -> String {
	let cargo_version = env!("CARGO_PKG_VERSION");
	if cargo_version != "0.1.0" {
		return cargo_version.to_string();
	}

	git(&["describe", "--tags", "--always"])
		.map(|described| described.strip_prefix('v').unwrap_or(&described).to_string())
		.unwrap_or_else(|| cargo_version.to_string())
}

fn git(args: &[&str]) -> Option<String> {
	let output = Command::new("git").args(args).output().ok()?;
	if !output.status.success() {
		return None;
	}
	let text = String::from_utf8(output.stdout).ok()?;
	Some(text.trim().to_string()).filter(|s| !s.is_empty())
}
