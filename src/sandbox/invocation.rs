use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::config::SandboxConfig;

pub const SANDBOX_CODE_PATH: &str = "/data/process.py";
pub const SANDBOX_OUTPUT_DIR: &str = "/data/output";
const SANDBOX_INPUT_STEM: &str = "/data/input_file";
const SANDBOX_ENTRYPOINT: &str = "cd /data && python -m process";

/// One job's worth of execution input.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: Uuid,
    pub input_path: PathBuf,
    pub code_path: PathBuf,
    pub result_dir: PathBuf,
    pub timeout: Duration,
}

/// Host path syntax, as expected by the container runtime's volume flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Posix,
    /// Windows hosts: backslashes and drive letters must be rewritten into
    /// the `/c/Users/...` form the runtime accepts in `-v` specs.
    Windows,
}

impl PathStyle {
    pub fn normalize(self, path: &Path) -> String {
        let raw = path.to_string_lossy();
        match self {
            PathStyle::Posix => raw.into_owned(),
            PathStyle::Windows => {
                let trimmed = raw.strip_prefix(r"\\?\").unwrap_or(&raw);
                let slashed = trimmed.replace('\\', "/");
                let bytes = slashed.as_bytes();
                if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
                    let drive = (bytes[0] as char).to_ascii_lowercase();
                    format!("/{}{}", drive, &slashed[2..])
                } else {
                    slashed
                }
            }
        }
    }
}

/// In-sandbox location of the input file. The extension is preserved so the
/// user's code can tell CSV from Excel input.
pub fn sandbox_input_path(input: &Path) -> String {
    match input.extension() {
        Some(ext) => format!(
            "{}.{}",
            SANDBOX_INPUT_STEM,
            ext.to_string_lossy().to_ascii_lowercase()
        ),
        None => SANDBOX_INPUT_STEM.to_string(),
    }
}

/// A fully built runtime command line for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub container_name: String,
    global_args: Vec<String>,
}

impl SandboxInvocation {
    pub fn build(config: &SandboxConfig, request: &ExecutionRequest, style: PathStyle) -> Self {
        let container_name = format!("{}-{}", config.container_prefix, request.job_id);
        let input = style.normalize(&request.input_path);
        let code = style.normalize(&request.code_path);
        let output = style.normalize(&request.result_dir);

        let mut args = config.runtime_args.clone();
        args.extend([
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.clone(),
        ]);

        if config.network_disabled {
            args.push("--network=none".to_string());
        }

        // Resource ceilings
        args.push(format!("--memory={}", config.memory_limit));
        args.push(format!("--cpu-shares={}", config.cpu_shares));

        // Runtime-side backstop; the host-side deadline is authoritative.
        args.push("--stop-timeout".to_string());
        args.push(stop_timeout_secs(request.timeout).to_string());

        args.push("--cap-drop=ALL".to_string());
        args.push("--security-opt=no-new-privileges".to_string());

        args.push("-v".to_string());
        args.push(format!("{}:{}:ro", input, sandbox_input_path(&request.input_path)));
        args.push("-v".to_string());
        args.push(format!("{}:{}:ro", code, SANDBOX_CODE_PATH));
        args.push("-v".to_string());
        args.push(format!("{}:{}:rw", output, SANDBOX_OUTPUT_DIR));

        args.push(config.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(SANDBOX_ENTRYPOINT.to_string());

        Self {
            program: config.runtime.clone(),
            args,
            container_name,
            global_args: config.runtime_args.clone(),
        }
    }

    /// Arguments that ask the runtime to kill this invocation's container.
    pub fn kill_args(&self) -> Vec<String> {
        let mut args = self.global_args.clone();
        args.push("kill".to_string());
        args.push(self.container_name.clone());
        args
    }

    /// Single-line rendering for logs and the job record.
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|arg| {
                if arg.contains(char::is_whitespace) {
                    format!("\"{}\"", arg)
                } else {
                    arg.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn stop_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}
