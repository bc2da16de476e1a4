//! Bundle-to-APK conversion through bundletool

use crate::config::{Config, SigningConfig, ToolConfig};
use crate::runner::{CommandRunner, CommandSpec, RunError};
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Inputs for one conversion
#[derive(Debug, Clone, Copy)]
pub struct PackageJob<'a> {
    pub bundle: &'a Path,
    pub output: &'a Path,
    pub signing: &'a SigningConfig,
    pub work_dir: &'a Path,
}

/// Turns an `.aab` into a signed `.apks` container at `job.output`.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn convert(&self, job: &PackageJob<'_>) -> Result<(), RunError>;
}

/// Runs `bundletool build-apks --mode=universal`.
#[derive(Debug, Clone)]
pub struct BundletoolPackager {
    tool: ToolConfig,
    timeout: Duration,
    runner: CommandRunner,
}

impl BundletoolPackager {
    pub fn new(tool: ToolConfig, timeout: Duration) -> Self {
        Self {
            tool,
            timeout,
            runner: CommandRunner::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tool.clone(), config.tool_timeout())
    }

    pub fn command(&self, job: &PackageJob<'_>) -> CommandSpec {
        let launcher = if self.tool.is_jar() {
            CommandSpec::new(&self.tool.java)
                .arg("-jar")
                .arg(&self.tool.bundletool)
        } else {
            CommandSpec::new(&self.tool.bundletool)
        };

        launcher
            .arg("build-apks")
            .arg(flag("--bundle=", job.bundle))
            .arg(flag("--output=", job.output))
            .arg("--mode=universal")
            .arg(flag("--ks=", &job.signing.keystore))
            .arg(flag("--ks-pass=pass:", &job.signing.keystore_pass))
            .arg(flag("--ks-key-alias=", &job.signing.key_alias))
            .arg(flag("--key-pass=pass:", &job.signing.key_pass))
    }
}

fn flag(name: &str, value: impl AsRef<OsStr>) -> OsString {
    let mut arg = OsString::from(name);
    arg.push(value);
    arg
}

#[async_trait]
impl Packager for BundletoolPackager {
    async fn convert(&self, job: &PackageJob<'_>) -> Result<(), RunError> {
        let command = self.command(job);
        info!(command = %command.display_redacted(), "running bundletool");

        let output = self.runner.run(&command, job.work_dir, self.timeout).await?;

        debug!(stdout = %output.stdout, stderr = %output.stderr, "bundletool finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn signing() -> SigningConfig {
        SigningConfig {
            keystore: PathBuf::from("/keys/release.jks"),
            keystore_pass: "store-secret".to_string(),
            key_alias: "release".to_string(),
            key_pass: "key-secret".to_string(),
        }
    }

    fn args(spec: &CommandSpec) -> Vec<String> {
        spec.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_jar_is_launched_through_java() {
        let packager = BundletoolPackager::new(
            ToolConfig {
                bundletool: PathBuf::from("/opt/bundletool-all-1.18.2.jar"),
                java: PathBuf::from("/usr/bin/java"),
            },
            Duration::from_secs(60),
        );
        let signing = signing();
        let job = PackageJob {
            bundle: Path::new("/work/upload.aab"),
            output: Path::new("/work/output.apks"),
            signing: &signing,
            work_dir: Path::new("/work"),
        };

        let spec = packager.command(&job);

        assert_eq!(spec.program, PathBuf::from("/usr/bin/java"));
        assert_eq!(
            args(&spec),
            vec![
                "-jar",
                "/opt/bundletool-all-1.18.2.jar",
                "build-apks",
                "--bundle=/work/upload.aab",
                "--output=/work/output.apks",
                "--mode=universal",
                "--ks=/keys/release.jks",
                "--ks-pass=pass:store-secret",
                "--ks-key-alias=release",
                "--key-pass=pass:key-secret",
            ]
        );
    }

    #[test]
    fn test_wrapper_is_invoked_directly() {
        let packager = BundletoolPackager::new(
            ToolConfig {
                bundletool: PathBuf::from("/usr/local/bin/bundletool"),
                java: PathBuf::from("java"),
            },
            Duration::from_secs(60),
        );
        let signing = signing();
        let job = PackageJob {
            bundle: Path::new("in.aab"),
            output: Path::new("out.apks"),
            signing: &signing,
            work_dir: Path::new("."),
        };

        let spec = packager.command(&job);

        assert_eq!(spec.program, PathBuf::from("/usr/local/bin/bundletool"));
        assert_eq!(args(&spec)[0], "build-apks");
        assert!(!spec.display_redacted().contains("secret"));
    }
}
