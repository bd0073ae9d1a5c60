//! The `Executor` trait and its `Local`/`Remote` implementations (spec
//! §4.1). Grounded line-for-line in
//! `examples/original_source/cdist/execution.py`'s `Local`/`Remote` classes:
//! both join their command into a single string and hand it to a shell
//! (`asyncio.create_subprocess_shell`); `Remote` prepends the configured
//! `remote-exec`/`remote-copy` transport script and linearizes `env` as
//! `KEY=VALUE` words ahead of the command, since there is no way to pass an
//! environment across an ssh invocation directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_lock::SemaphoreGuardArc;
use async_trait::async_trait;
use cdist_core::error::{CdistError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::semaphore::ExecSemaphores;

fn shell_from_env(var: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| "/bin/sh".to_string())
}

/// A spawned child process together with the semaphore permit that gates it.
/// The permit is released when `Spawned` is dropped, i.e. once the caller is
/// done waiting on or reading from the child — this is what turns the
/// semaphore into a true concurrency bound on *running* processes rather
/// than just on the moment of spawning.
pub struct Spawned {
    child: Child,
    _permit: SemaphoreGuardArc,
}

impl Spawned {
    pub async fn wait(&mut self, cmd: &[String]) -> Result<i32> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| CdistError::io(PathBuf::from(cmd.join(" ")), e))?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Kills the child and awaits its reap (spec §4.1: "on timeout kills and
    /// awaits reap"; §5 Cancellation: "killed then wait"). Best-effort: a
    /// child that has already exited is not an error.
    pub async fn kill_and_wait(&mut self) -> Result<()> {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        Ok(())
    }

    /// Reads stdout to EOF. Used where no timeout is in play; callers that
    /// need a timeout use `drain_stdout` instead, since this one can't
    /// surface a partial buffer once cancelled mid-read.
    pub async fn read_stdout_to_end(&mut self) -> Result<Vec<u8>> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .expect("exec() always pipes stdout");
        let mut buf = Vec::new();
        stdout
            .read_to_end(&mut buf)
            .await
            .map_err(|e| CdistError::io(PathBuf::from("<stdout>"), e))?;
        Ok(buf)
    }

    /// Reads stdout incrementally up to `deadline`, returning whatever was
    /// read so far and whether the deadline was hit before EOF. Reading in
    /// chunks (rather than `read_to_end` under one `tokio::time::timeout`)
    /// is what lets a timed-out `check_output` still carry the partial
    /// stdout the spec requires (§4.1, §7 `TimeoutExpired`).
    pub async fn drain_stdout(&mut self, deadline: Option<tokio::time::Instant>) -> (Vec<u8>, bool) {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .expect("exec() always pipes stdout");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let read = stdout.read(&mut chunk);
            let n = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(_)) => 0,
                    Err(_) => return (buf, true),
                },
                None => read.await.unwrap_or(0),
            };
            if n == 0 {
                return (buf, false);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn write_stdin(&mut self, input: &[u8]) -> Result<()> {
        if let Some(mut stdin) = self.child.stdin.take() {
            stdin
                .write_all(input)
                .await
                .map_err(|e| CdistError::io(PathBuf::from("<stdin>"), e))?;
        }
        Ok(())
    }
}

/// A command execution backend: either the local shell, or a remote target
/// reached through its `remote-exec`/`remote-copy` transport scripts.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Spawns `command` (joined into one shell invocation, as the original
    /// does) with `env` merged on top of the base environment. Stdout is
    /// piped; stderr is inherited. `stdin` is piped and written if present,
    /// else the child's stdin is closed.
    async fn exec(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
        stdin: Option<&[u8]>,
    ) -> Result<Spawned>;

    async fn mkdir(&self, path: &str) -> Result<()>;
    async fn rmdir(&self, path: &str) -> Result<()>;

    /// Copies a single file or directory entry `source` to `destination`.
    /// Directory recursion lives in `transfer`, matching the original, which
    /// fans `copy` out over a directory's direct children in parallel.
    async fn copy(&self, source: &Path, destination: &str) -> Result<()>;

    /// Awaits exit; on `timeout` expiry, kills the child, awaits reap, and
    /// raises `TimeoutExpired` (spec §4.1 `call`).
    async fn call(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut spawned = self.exec(command, env, None).await?;
        match timeout {
            None => spawned.wait(command).await,
            Some(timeout) => match tokio::time::timeout(timeout, spawned.wait(command)).await {
                Ok(result) => result,
                Err(_) => {
                    spawned.kill_and_wait().await?;
                    Err(CdistError::TimeoutExpired {
                        cmd: command.to_vec(),
                        timeout_secs: timeout.as_secs(),
                        partial_stdout: Vec::new(),
                    })
                }
            },
        }
    }

    /// `call` then fails with `ExecFailed` if the exit code is nonzero (spec
    /// §4.1 `check_call`).
    async fn check_call(&self, command: &[String], env: Option<&BTreeMap<String, String>>) -> Result<()> {
        let code = self.call(command, env, None).await?;
        if code != 0 {
            return Err(CdistError::ExecFailed {
                cmd: command.to_vec(),
                code: Some(code),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    /// Captures stdout; fails with `ExecFailed` on nonzero exit, or
    /// `TimeoutExpired` (carrying whatever stdout was read so far) if
    /// `timeout` elapses first (spec §4.1 `check_output`).
    async fn check_output_full(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let mut spawned = self.exec(command, env, input).await?;
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        let (stdout, timed_out) = spawned.drain_stdout(deadline).await;
        if timed_out {
            spawned.kill_and_wait().await?;
            return Err(CdistError::TimeoutExpired {
                cmd: command.to_vec(),
                timeout_secs: timeout.expect("deadline only set from a timeout").as_secs(),
                partial_stdout: stdout,
            });
        }
        let code = spawned.wait(command).await?;
        if code != 0 {
            return Err(CdistError::ExecFailed {
                cmd: command.to_vec(),
                code: Some(code),
                stderr: String::new(),
            });
        }
        Ok(stdout)
    }

    /// `check_output_full` with no stdin and no timeout — the common case
    /// every explorer/gencode invocation uses.
    async fn check_output(&self, command: &[String], env: Option<&BTreeMap<String, String>>) -> Result<Vec<u8>> {
        self.check_output_full(command, env, None, None).await
    }

    /// Replaces `destination` with a copy of `source` (spec §4.1 transfer):
    /// removes any existing `destination`, then recreates it, copying a
    /// directory's direct children concurrently.
    async fn transfer(&self, source: &Path, destination: &str) -> Result<()> {
        let _ = self.rmdir(destination).await;
        if source.is_dir() {
            self.mkdir(destination).await?;
            let mut entries = tokio::fs::read_dir(source)
                .await
                .map_err(|e| CdistError::io(source, e))?;
            let mut children = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CdistError::io(source, e))?
            {
                children.push(entry.path());
            }
            let mut pending = Vec::new();
            for child in children {
                let file_name = child
                    .file_name()
                    .expect("read_dir entries always have a file name")
                    .to_string_lossy()
                    .into_owned();
                let child_destination = format!("{destination}/{file_name}");
                pending.push(self.copy(&child, &child_destination));
            }
            for result in futures::future::join_all(pending).await {
                result?;
            }
        } else {
            self.copy(source, destination).await?;
        }
        Ok(())
    }
}

/// Runs commands on the machine cdist-ng itself runs on.
pub struct LocalExecutor {
    shell_path: String,
    semaphores: ExecSemaphores,
    base_env: BTreeMap<String, String>,
}

impl LocalExecutor {
    pub fn new(base_env: BTreeMap<String, String>) -> LocalExecutor {
        LocalExecutor {
            shell_path: shell_from_env("CDIST_LOCAL_SHELL"),
            semaphores: ExecSemaphores::local(),
            base_env,
        }
    }

    fn spawn_command(&self, joined: &str, env: Option<&BTreeMap<String, String>>, stdin: Option<&[u8]>) -> Command {
        let mut cmd = Command::new(&self.shell_path);
        cmd.arg("-e").arg("-c").arg(joined);
        for (k, v) in &self.base_env {
            cmd.env(k, v);
        }
        if let Some(env) = env {
            for (k, v) in env {
                cmd.env(k, v);
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn exec(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
        stdin: Option<&[u8]>,
    ) -> Result<Spawned> {
        log::debug!("local exec: {:?}", command);
        let permit = self.semaphores.acquire_exec().await;
        let joined = command.join(" ");
        let child = self
            .spawn_command(&joined, env, stdin)
            .spawn()
            .map_err(|e| CdistError::io(PathBuf::from(&joined), e))?;
        let mut spawned = Spawned { child, _permit: permit };
        if let Some(input) = stdin {
            spawned.write_stdin(input).await?;
        }
        Ok(spawned)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        log::debug!("local mkdir: {}", path);
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| CdistError::io(path, e))
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        log::debug!("local rmdir: {}", path);
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CdistError::io(path, e)),
        }
    }

    async fn copy(&self, source: &Path, destination: &str) -> Result<()> {
        log::debug!("local copy: {:?} -> {}", source, destination);
        let _permit = self.semaphores.acquire_copy().await;
        tokio::fs::copy(source, destination)
            .await
            .map_err(|e| CdistError::io(source, e))?;
        Ok(())
    }
}

/// Runs commands against a remote target, through its configured
/// `remote-exec`/`remote-copy` transport scripts (spec §6).
pub struct RemoteExecutor {
    exec_script: PathBuf,
    copy_script: PathBuf,
    shell_path: String,
    semaphores: ExecSemaphores,
    base_env: BTreeMap<String, String>,
}

impl RemoteExecutor {
    pub fn new(exec_script: PathBuf, copy_script: PathBuf, base_env: BTreeMap<String, String>) -> RemoteExecutor {
        RemoteExecutor {
            exec_script,
            copy_script,
            shell_path: shell_from_env("CDIST_REMOTE_SHELL"),
            semaphores: ExecSemaphores::remote(),
            base_env,
        }
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    async fn exec(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
        stdin: Option<&[u8]>,
    ) -> Result<Spawned> {
        log::debug!("remote exec: {:?}", command);
        let permit = self.semaphores.acquire_exec().await;

        let mut words = vec![self.exec_script.display().to_string()];
        if let Some(env) = env {
            words.extend(env.iter().map(|(k, v)| format!("{k}={v}")));
        }
        words.extend(command.iter().cloned());
        let joined = words.join(" ");

        let mut cmd = Command::new(&self.shell_path);
        cmd.arg("-e").arg("-c").arg(&joined);
        for (k, v) in &self.base_env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped());
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        let child = cmd
            .spawn()
            .map_err(|e| CdistError::io(PathBuf::from(&joined), e))?;
        let mut spawned = Spawned { child, _permit: permit };
        if let Some(input) = stdin {
            spawned.write_stdin(input).await?;
        }
        Ok(spawned)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.check_call(&["mkdir".to_string(), "-p".to_string(), path.to_string()], None)
            .await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.check_call(&["rm".to_string(), "-rf".to_string(), path.to_string()], None)
            .await
    }

    async fn copy(&self, source: &Path, destination: &str) -> Result<()> {
        log::debug!("remote copy: {:?} -> {}", source, destination);
        let permit = self.semaphores.acquire_copy().await;

        let joined = format!(
            "{} {} {}",
            self.copy_script.display(),
            source.display(),
            destination
        );
        let mut cmd = Command::new(&self.shell_path);
        cmd.arg("-e").arg("-c").arg(&joined);
        for (k, v) in &self.base_env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped());
        cmd.stdin(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| CdistError::io(PathBuf::from(&joined), e))?;
        let status = child
            .wait()
            .await
            .map_err(|e| CdistError::io(PathBuf::from(&joined), e))?;
        drop(permit);
        if !status.success() {
            return Err(CdistError::ExecFailed {
                cmd: vec![joined],
                code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_check_output_captures_stdout() {
        let exec = LocalExecutor::new(BTreeMap::new());
        let out = exec
            .check_output(&["echo".to_string(), "hi".to_string()], None)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "hi");
    }

    #[tokio::test]
    async fn local_check_call_fails_on_nonzero_exit() {
        let exec = LocalExecutor::new(BTreeMap::new());
        let err = exec
            .check_call(&["false".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CdistError::ExecFailed { .. }));
    }

    #[tokio::test]
    async fn local_mkdir_then_rmdir_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/child");
        let exec = LocalExecutor::new(BTreeMap::new());
        exec.mkdir(target.to_str().unwrap()).await.unwrap();
        assert!(target.is_dir());
        exec.rmdir(target.to_str().unwrap()).await.unwrap();
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn transfer_copies_directory_children() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a"), b"aaa").unwrap();
        std::fs::write(src_dir.path().join("b"), b"bbb").unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let destination = dst_dir.path().join("out");

        let exec = LocalExecutor::new(BTreeMap::new());
        exec.transfer(src_dir.path(), destination.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(std::fs::read(destination.join("a")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(destination.join("b")).unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn check_output_writes_stdin_through_to_cat() {
        let exec = LocalExecutor::new(BTreeMap::new());
        let out = exec
            .check_output_full(&["cat".to_string()], None, Some(b"from stdin"), None)
            .await
            .unwrap();
        assert_eq!(out, b"from stdin");
    }

    #[tokio::test]
    async fn call_times_out_and_kills_the_child() {
        let exec = LocalExecutor::new(BTreeMap::new());
        let err = exec
            .call(&["sleep".to_string(), "5".to_string()], None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, CdistError::TimeoutExpired { .. }));
    }

    #[tokio::test]
    async fn check_output_times_out_with_partial_stdout() {
        let exec = LocalExecutor::new(BTreeMap::new());
        let err = exec
            .check_output_full(
                &["printf 'partial' && sleep 5".to_string()],
                None,
                None,
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        match err {
            CdistError::TimeoutExpired { partial_stdout, .. } => {
                assert_eq!(String::from_utf8_lossy(&partial_stdout), "partial");
            }
            other => panic!("expected TimeoutExpired, got {other:?}"),
        }
    }
}
