use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for container-based code execution.
///
/// Every submission runs in a fresh container with:
/// - Network isolation (disabled by default)
/// - Dropped capabilities and no privilege escalation
/// - A memory ceiling and a relative CPU weight
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container runtime CLI (e.g. "docker" or "podman")
    pub runtime: String,
    /// Global arguments placed before the subcommand (e.g. `--context remote`)
    pub runtime_args: Vec<String>,
    /// Image that provides the Python interpreter and data libraries
    pub image: String,
    /// Disable network access in container
    pub network_disabled: bool,
    /// Memory limit (e.g., "512m")
    pub memory_limit: String,
    /// Relative CPU weight passed as `--cpu-shares`
    pub cpu_shares: u32,
    /// Containers are named `<prefix>-<job id>` so they can be killed by name
    pub container_prefix: String,
    /// How long to wait for a killed process to be confirmed gone
    pub kill_grace: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            runtime_args: Vec::new(),
            image: "python-sandbox".to_string(),
            network_disabled: true,
            memory_limit: "512m".to_string(),
            cpu_shares: 512,
            container_prefix: "file-processor".to_string(),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// On-disk layout for job artifacts.
///
/// None of these directories should be served over HTTP directly.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("file_processor"))
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join("code")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    /// Create all artifact directories if missing.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.uploads_dir(), self.code_dir(), self.results_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Limits applied to uploaded files.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_upload_bytes: usize,
    /// Lowercase extensions without the dot
    pub allowed_extensions: Vec<String>,
}

impl UploadLimits {
    /// Message returned for an upload over `max_upload_bytes`.
    pub fn too_large_message(&self) -> String {
        format!(
            "File too large. Maximum size: {}MB",
            self.max_upload_bytes / (1024 * 1024)
        )
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            allowed_extensions: vec!["csv".to_string(), "xls".to_string(), "xlsx".to_string()],
        }
    }
}

impl UploadLimits {
    pub fn allows(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

/// How long finished jobs and their files are kept.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub max_execution_time: Duration,
    pub registry_capacity: usize,
    pub storage: StorageConfig,
    pub sandbox: SandboxConfig,
    pub limits: UploadLimits,
    pub retention: RetentionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_execution_time: Duration::from_secs(120),
            registry_capacity: 10_000,
            storage: StorageConfig::default(),
            sandbox: SandboxConfig::default(),
            limits: UploadLimits::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new(listen_addr: SocketAddr, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            storage: StorageConfig::new(data_dir),
            ..Default::default()
        }
    }
}
