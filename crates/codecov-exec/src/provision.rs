//! Uploader binary provisioning
//!
//! Resolves the platform, downloads the uploader for the requested version,
//! checks it against the published SHA-256 sum and marks it executable.

use crate::error::CodecovError;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Default location the uploader is published under.
pub const DEFAULT_BASE_URL: &str = "https://cli.codecov.io";

/// Platforms the uploader is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Aarch64,
    Alpine,
    Linux,
    LinuxArm64,
    Macos,
    Windows,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Aarch64,
        Platform::Alpine,
        Platform::Linux,
        Platform::LinuxArm64,
        Platform::Macos,
        Platform::Windows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Aarch64 => "aarch64",
            Platform::Alpine => "alpine",
            Platform::Linux => "linux",
            Platform::LinuxArm64 => "linux-arm64",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let lowered = name.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| CodecovError::UnsupportedPlatform(name.to_string()))
    }

    /// Explicit `os` input if valid, otherwise the host platform.
    pub fn resolve(os: Option<&str>) -> Self {
        if let Some(os) = os {
            match Self::parse(os) {
                Ok(platform) => return platform,
                Err(e) => warn!("{}, detecting platform from host", e),
            }
        }
        Self::from_host(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_host(os: &str, arch: &str) -> Self {
        match (os, arch) {
            ("linux", "aarch64") => Platform::LinuxArm64,
            ("linux", _) => Platform::Linux,
            ("macos", _) => Platform::Macos,
            ("windows", _) => Platform::Windows,
            (other, _) => {
                warn!("Could not detect platform for {}, defaulting to linux", other);
                Platform::Linux
            }
        }
    }

    /// File name of the uploader on this platform.
    pub fn uploader_name(&self) -> &'static str {
        match self {
            Platform::Windows => "codecov.exe",
            _ => "codecov",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetches the uploader and makes it ready to execute.
///
/// Any error is fatal to the pipeline; no stage runs without a verified binary.
#[async_trait]
pub trait BinaryProvisioner: Send + Sync {
    /// Returns the path of the executable uploader.
    async fn provision(&self, platform: Platform, version: &str) -> Result<PathBuf>;
}

/// Provisioner downloading from the public uploader bucket over HTTPS.
pub struct HttpProvisioner {
    base_url: String,
    install_dir: PathBuf,
    skip_validation: bool,
    http_client: reqwest::Client,
}

impl HttpProvisioner {
    pub fn new(install_dir: impl Into<PathBuf>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("codecov-exec/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            install_dir: install_dir.into(),
            skip_validation: false,
            http_client,
        })
    }

    /// Download from a mirror instead of the public bucket.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Skip the checksum comparison.
    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// `<base>/<version>/<platform>/<name>`
    pub fn download_url(&self, platform: Platform, version: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            version,
            platform,
            platform.uploader_name()
        )
    }

    /// Deterministic local path of the uploader.
    pub fn local_path(&self, platform: Platform) -> PathBuf {
        self.install_dir.join(platform.uploader_name())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CodecovError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        debug!(bytes = written, path = %dest.display(), "Uploader downloaded");
        Ok(())
    }

    async fn fetch_checksum(&self, url: &str) -> Result<String> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CodecovError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let body = response.text().await?;
        parse_checksum(&body).ok_or_else(|| CodecovError::MissingChecksum(url.to_string()))
    }
}

#[async_trait]
impl BinaryProvisioner for HttpProvisioner {
    async fn provision(&self, platform: Platform, version: &str) -> Result<PathBuf> {
        let url = self.download_url(platform, version);
        let path = self.local_path(platform);
        info!(%platform, version, url = %url, "Downloading uploader");

        tokio::fs::create_dir_all(&self.install_dir).await?;
        if let Err(e) = self.download(&url, &path).await {
            discard(&path).await;
            return Err(e);
        }

        if self.skip_validation {
            warn!("Skipping uploader checksum validation");
        } else {
            let expected = self.fetch_checksum(&format!("{}.SHA256SUM", url)).await;
            verify_or_discard(&path, expected).await?;
            info!("Uploader checksum verified");
        }

        make_executable(&path).await?;
        info!(path = %path.display(), "Uploader ready");
        Ok(path)
    }
}

/// First token of a `sha256sum`-style line, lowercased.
pub fn parse_checksum(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .filter(|token| token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_lowercase)
}

/// Compare the SHA-256 of `path` with `expected` (hex).
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = hex::encode(hasher.finalize());

    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(CodecovError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Verify `path` against `expected`; the file is deleted unless it matches.
async fn verify_or_discard(path: &Path, expected: Result<String>) -> Result<()> {
    let verified = match expected {
        Ok(expected) => verify_checksum(path, &expected).await,
        Err(e) => Err(e),
    };
    if verified.is_err() {
        discard(path).await;
    }
    verified
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!(path = %path.display(), "Removed unverified uploader"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %path.display(),
            "Could not remove unverified uploader: {}", e
        ),
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
