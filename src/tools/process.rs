//! 外部进程句柄
//!
//! ChildProcess 包装 tokio::process::Child：stdout / stderr 由后台任务持续读取，避免管道写满阻塞子进程；
//! kill() 发送 SIGKILL 并回收进程。句柄销毁时中止读取任务，任何子任务都不会比句柄活得更久。

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::tools::{ProcessHandle, ToolResult};

/// 单路输出最多保留的字节数
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// 已启动的子进程
pub struct ChildProcess {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    status: Option<ExitStatus>,
    killed: bool,
}

impl ChildProcess {
    /// 通过 `sh -c`（Windows 下 `cmd /C`）启动命令
    pub fn spawn_shell(command: &str, cwd: Option<&Path>) -> Result<Self, String> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| format!("Execution failed: {e}"))?;
        let stdout = child.stdout.take().map(|out| tokio::spawn(drain(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(drain(err)));

        Ok(Self {
            child,
            stdout,
            stderr,
            status: None,
            killed: false,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// 读到 EOF；超出上限的部分丢弃但继续读，保证子进程不会因管道写满而卡住
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).to_string()
}

async fn collect(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    async fn wait(&mut self) -> Result<(), String> {
        if self.status.is_none() {
            let status = self
                .child
                .wait()
                .await
                .map_err(|e| format!("Wait failed: {e}"))?;
            self.status = Some(status);
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), String> {
        self.killed = true;
        if self.status.is_some() {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| format!("Kill failed: {e}"))?;
        self.status = self.child.try_wait().ok().flatten();
        Ok(())
    }

    async fn result(&mut self) -> ToolResult {
        if let Err(e) = self.wait().await {
            return ToolResult::failure(e);
        }
        let stdout = collect(self.stdout.take()).await;
        let stderr = collect(self.stderr.take()).await;
        let code = self.status.and_then(|s| s.code());

        if self.killed {
            return ToolResult::failure("Process was killed")
                .with_meta("stdout", stdout)
                .with_meta("stderr", stderr);
        }
        let success = self.status.map(|s| s.success()).unwrap_or(false);
        let result = if success {
            ToolResult::success(if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{}\nstderr: {}", stdout.trim(), stderr.trim())
            })
        } else {
            ToolResult::failure(format!(
                "Exit {}\nstderr: {}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                stderr.trim()
            ))
            .with_meta("stdout", stdout)
        };
        match code {
            Some(c) => result.with_meta("exit_code", c),
            None => result,
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Some(h) = self.stdout.take() {
            h.abort();
        }
        if let Some(h) = self.stderr.take() {
            h.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let mut p = ChildProcess::spawn_shell("echo hello", None).unwrap();
        p.wait().await.unwrap();
        assert!(!p.is_running());
        let r = p.result().await;
        assert!(r.success);
        assert_eq!(r.output.trim(), "hello");
        assert_eq!(r.metadata["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let mut p = ChildProcess::spawn_shell("echo oops >&2; exit 3", None).unwrap();
        let r = p.result().await;
        assert!(!r.success);
        let err = r.error.unwrap();
        assert!(err.contains("Exit 3"));
        assert!(err.contains("oops"));
    }

    #[tokio::test]
    async fn test_kill_terminates_long_process() {
        let mut p = ChildProcess::spawn_shell("sleep 5", None).unwrap();
        assert!(p.is_running());
        let start = Instant::now();
        p.kill().await.unwrap();
        assert!(!p.is_running());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
