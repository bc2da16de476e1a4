//! Shared fixtures for apkforge integration tests

#![allow(dead_code)]

use apkforge::config::{Config, SigningConfig, ToolConfig};
use apkforge::packager::{PackageJob, Packager};
use apkforge::runner::RunError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use zip::write::FileOptions;
use zip::ZipWriter;

pub const BOUNDARY: &str = "apkforge-test-boundary";

pub fn test_config(tmp_root: &Path) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        tool: ToolConfig {
            bundletool: PathBuf::from("/opt/bundletool-all-1.18.2.jar"),
            java: PathBuf::from("java"),
        },
        signing: SigningConfig {
            keystore: PathBuf::from("/keys/release.jks"),
            keystore_pass: "store-secret".to_string(),
            key_alias: "release".to_string(),
            key_pass: "key-secret".to_string(),
        },
        max_upload_bytes: 1024 * 1024,
        tool_timeout_secs: 30,
        tmp_root: Some(tmp_root.to_path_buf()),
        cors_allow_origin: vec!["*".to_string()],
        log_json: false,
    }
}

/// What the fake bundletool leaves at the output path.
#[derive(Debug, Clone)]
pub enum ToolBehavior {
    Archive(Vec<(String, Vec<u8>)>),
    Garbage,
    NoOutput,
    Fail,
    Timeout,
}

pub fn archive(entries: &[(&str, &[u8])]) -> ToolBehavior {
    ToolBehavior::Archive(
        entries
            .iter()
            .map(|(name, contents)| (name.to_string(), contents.to_vec()))
            .collect(),
    )
}

/// What the fake observed when it was invoked.
#[derive(Debug, Clone)]
pub struct SeenJob {
    pub work_dir: PathBuf,
    pub bundle: Vec<u8>,
    pub key_alias: String,
}

pub struct FakePackager {
    behavior: ToolBehavior,
    delay: Option<Duration>,
    seen: Mutex<Option<SeenJob>>,
    finished: AtomicBool,
}

impl FakePackager {
    pub fn new(behavior: ToolBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            seen: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn seen(&self) -> Option<SeenJob> {
        self.seen.lock().unwrap().clone()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Packager for FakePackager {
    async fn convert(&self, job: &PackageJob<'_>) -> Result<(), RunError> {
        *self.seen.lock().unwrap() = Some(SeenJob {
            work_dir: job.work_dir.to_path_buf(),
            bundle: std::fs::read(job.bundle).unwrap_or_default(),
            key_alias: job.signing.key_alias.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match &self.behavior {
            ToolBehavior::Archive(entries) => {
                write_zip(job.output, entries);
                Ok(())
            }
            ToolBehavior::Garbage => {
                std::fs::write(job.output, b"definitely not a zip archive").unwrap();
                Ok(())
            }
            ToolBehavior::NoOutput => Ok(()),
            ToolBehavior::Fail => Err(RunError::Process {
                program: "bundletool".to_string(),
                code: Some(1),
                stdout: String::new(),
                stderr: "Keystore was tampered with, or password was incorrect".to_string(),
            }),
            ToolBehavior::Timeout => Err(RunError::Timeout {
                program: "java".to_string(),
                timeout: Duration::from_secs(30),
            }),
        };

        self.finished.store(true, Ordering::SeqCst);
        result
    }
}

pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, contents) in entries {
        zip.start_file(name.as_str(), FileOptions::default())
            .unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
}

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// Poll until `dir` has no entries; cleanup after a response can lag the
/// client by a scheduler tick.
pub async fn wait_until_empty(dir: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if dir_entries(dir).is_empty() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
