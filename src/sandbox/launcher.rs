use std::io;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};

use crate::sandbox::invocation::PathStyle;

/// Host-specific process control for the container runtime CLI.
///
/// Implementations differ in how the runtime is spawned and how a spawned
/// process is forcibly stopped. The timeout and kill sequencing lives in the
/// executor and is the same for every host.
pub trait ProcessLauncher: Send + Sync + std::fmt::Debug {
    /// Path syntax the runtime expects for host paths on this platform.
    fn path_style(&self) -> PathStyle;

    /// Spawn `program` with stdin closed and stdout/stderr piped.
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Child>;

    /// Send a forcible stop to `child`. Does not wait for it to exit.
    fn terminate(&self, child: &mut Child) -> io::Result<()>;
}

fn base_command(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Unix hosts: the runtime CLI gets its own process group so a kill reaches
/// every process it started, not just the launcher.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixLauncher;

#[cfg(unix)]
impl ProcessLauncher for UnixLauncher {
    fn path_style(&self) -> PathStyle {
        PathStyle::Posix
    }

    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Child> {
        let mut cmd = base_command(program, args);
        cmd.process_group(0);
        cmd.spawn()
    }

    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => {
                tracing::warn!(pid, error = %errno, "killpg failed, killing launcher only");
                child.start_kill()
            }
        }
    }
}

/// Windows hosts: no process groups to signal, so the launcher handle is
/// terminated directly and the container is stopped through the runtime.
#[cfg(not(unix))]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsLauncher;

#[cfg(not(unix))]
impl ProcessLauncher for WindowsLauncher {
    fn path_style(&self) -> PathStyle {
        PathStyle::Windows
    }

    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Child> {
        let mut cmd = base_command(program, args);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd.spawn()
    }

    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        match child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

/// The launcher for the platform this binary was built for.
pub fn host_launcher() -> Arc<dyn ProcessLauncher> {
    #[cfg(unix)]
    {
        Arc::new(UnixLauncher)
    }
    #[cfg(not(unix))]
    {
        Arc::new(WindowsLauncher)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn host_launcher_uses_posix_paths() {
        assert_eq!(host_launcher().path_style(), PathStyle::Posix);
    }

    #[tokio::test]
    async fn spawn_pipes_output_separately() {
        let launcher = UnixLauncher;
        let child = launcher
            .spawn(
                "sh",
                &["-c".to_string(), "echo out; echo err >&2".to_string()],
            )
            .unwrap();
        let output = child.wait_with_output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
    }

    #[tokio::test]
    async fn terminate_stops_the_process_group() {
        let launcher = UnixLauncher;
        let mut child = launcher
            .spawn("sh", &["-c".to_string(), "sleep 30 & wait".to_string()])
            .unwrap();

        launcher.terminate(&mut child).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("process should exit after SIGKILL")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn terminate_after_exit_is_harmless() {
        let launcher = UnixLauncher;
        let mut child = launcher.spawn("true", &[]).unwrap();
        child.wait().await.unwrap();
        assert!(launcher.terminate(&mut child).is_ok());
    }
}
