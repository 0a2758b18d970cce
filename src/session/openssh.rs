use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::protocol::{Connector, DirEntry, EntryKind, EntryMeta, ProgressFn, RemoteFs};
use crate::error::{ConnectionError, TransferTaskError};
use crate::resolver::ConnectionSpec;

/// ssh reserves exit status 255 for its own errors.
const SSH_ERROR_STATUS: i32 = 255;

/// Quote for a POSIX shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Backslash-escape glob metacharacters and backslashes for scp's remote globbing.
pub fn escape_glob(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Map ssh's stderr from a failed connect onto the error taxonomy.
pub fn classify_connect_error(spec: &ConnectionSpec, stderr: &str, timeout_secs: u64) -> ConnectionError {
    let detail = stderr.trim().to_string();
    let lower = detail.to_lowercase();
    let target = spec.to_string();

    if !spec.proxy_jump.is_empty() {
        for hop in &spec.proxy_jump {
            let hop_host = hop
                .rsplit_once('@')
                .map(|(_, h)| h)
                .unwrap_or(hop)
                .split(':')
                .next()
                .unwrap_or(hop)
                .to_lowercase();
            if !hop_host.is_empty() && hop_host != spec.host.to_lowercase() && lower.contains(&hop_host) {
                return ConnectionError::ProxyChainFailure {
                    hop: hop.clone(),
                    detail,
                };
            }
        }
        if lower.contains("stdio forwarding failed") || lower.contains("open failed") {
            let hop = spec.proxy_jump.last().cloned().unwrap_or_default();
            return ConnectionError::ProxyChainFailure { hop, detail };
        }
    }

    if lower.contains("permission denied")
        || lower.contains("too many authentication failures")
        || lower.contains("host key verification failed")
        || lower.contains("no supported authentication methods")
    {
        ConnectionError::AuthFailure { target, detail }
    } else if lower.contains("timed out") {
        ConnectionError::Timeout {
            target,
            secs: timeout_secs,
        }
    } else {
        ConnectionError::Unreachable { target, detail }
    }
}

/// Map a failed remote command or scp run onto a per-file error.
fn classify_remote_error(path: &str, status: ExitStatus, stderr: &str) -> TransferTaskError {
    let lower = stderr.to_lowercase();
    if status.code() == Some(SSH_ERROR_STATUS)
        || lower.contains("lost connection")
        || lower.contains("connection closed")
        || lower.contains("control socket connect")
        || lower.contains("broken pipe")
    {
        TransferTaskError::SessionLost
    } else if lower.contains("no such file") {
        TransferTaskError::NotFound(path.to_string())
    } else if lower.contains("permission denied") {
        TransferTaskError::PermissionDenied(path.to_string())
    } else if lower.contains("is a directory") || lower.contains("not a regular file") {
        TransferTaskError::IsDirectory(path.to_string())
    } else {
        TransferTaskError::Io(format!("{}: {}", path, stderr.trim()))
    }
}

/// Split off `count` whitespace-separated fields. The remainder after the
/// single separating space is returned untouched.
fn take_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line;
    for _ in 0..count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    Some((fields, rest.strip_prefix(' ')?))
}

/// Parse `LC_ALL=C ls -la` output into entries. Names keep their exact
/// spacing; device files carry `major, minor` in place of a size.
pub fn parse_ls(output: &str) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let Some((mut fields, mut rest)) = take_fields(line, 8) else {
            continue; // "total N" and anything unexpected
        };
        let is_device = fields[4].ends_with(',');
        if is_device {
            match take_fields(line, 9) {
                Some((f, r)) => (fields, rest) = (f, r),
                None => continue,
            }
        }

        let mut name = rest.to_string();
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }
        let kind = match fields[0].chars().next() {
            Some('d') => EntryKind::Directory,
            Some('l') => {
                if let Some((link, _)) = name.split_once(" -> ") {
                    name = link.to_string();
                }
                EntryKind::Symlink
            }
            _ => EntryKind::File,
        };
        let size = if is_device { 0 } else { fields[4].parse::<u64>().unwrap_or(0) };
        entries.push(DirEntry { name, kind, size });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Parse `stat -c '%F|%s'` output.
fn parse_stat(path: &str, output: &str) -> Result<EntryMeta, TransferTaskError> {
    let line = output.trim();
    let (kind, size) = line
        .split_once('|')
        .ok_or_else(|| TransferTaskError::Io(format!("{}: unexpected stat output '{}'", path, line)))?;
    let kind = match kind {
        "directory" => EntryKind::Directory,
        "symbolic link" => EntryKind::Symlink,
        _ => EntryKind::File,
    };
    Ok(EntryMeta {
        kind,
        size: size.trim().parse().unwrap_or(0),
    })
}

/// Connects through the system `ssh` binary. Each session owns one
/// ControlMaster socket; every later command multiplexes over it.
pub struct OpenSshConnector {
    control_dir: PathBuf,
    connect_timeout: Duration,
}

impl OpenSshConnector {
    pub fn new(control_dir: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            control_dir,
            connect_timeout,
        }
    }

    fn socket_for(&self, spec: &ConnectionSpec) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        spec.hash(&mut hasher);
        self.control_dir
            .join(format!("{}-{:016x}", std::process::id(), hasher.finish()))
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Arc<dyn RemoteFs>, ConnectionError> {
        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| ConnectionError::Spawn(format!("control directory: {}", e)))?;
        let socket = self.socket_for(spec);
        let log_file = socket.with_extension("log");

        // The master backgrounds itself with -f, so its stdio must not be
        // piped back to us; errors land in the -E log instead.
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "LogLevel=ERROR", "-o", "BatchMode=yes"])
            .args(spec.endpoint_args())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", socket.display()))
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-E")
            .arg(&log_file)
            .arg("-f")
            .arg("-N")
            .arg(spec.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("Starting control master for {} at {:?}", spec, socket);
        let status = cmd
            .status()
            .await
            .map_err(|e| ConnectionError::Spawn(e.to_string()))?;

        let log = tokio::fs::read_to_string(&log_file).await.unwrap_or_default();
        let _ = tokio::fs::remove_file(&log_file).await;
        if !status.success() {
            let err = classify_connect_error(spec, &log, self.connect_timeout.as_secs());
            tracing::error!("Connection to {} failed: {}", spec, err);
            return Err(err);
        }

        tracing::info!("Control master ready for {}", spec);
        Ok(Arc::new(OpenSshFs::new(spec.clone(), socket, self.connect_timeout)))
    }
}

/// Remote file operations multiplexed over a control socket.
pub struct OpenSshFs {
    spec: ConnectionSpec,
    socket: PathBuf,
    connect_timeout: Duration,
}

impl OpenSshFs {
    pub fn new(spec: ConnectionSpec, socket: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            spec,
            socket,
            connect_timeout,
        }
    }

    /// Options shared by every client command. The `ConnectionSpec`
    /// transport options ride along, so a command that bypasses the master
    /// still takes the same route.
    fn client_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-q",
            "-o",
            "LogLevel=ERROR",
            "-o",
            "BatchMode=yes",
            "-o",
            "ControlMaster=no",
            "-o",
            "ClearAllForwardings=yes",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push("-o".into());
        args.push(format!("ControlPath={}", self.socket.display()));
        args.push("-o".into());
        args.push(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
        args.extend(self.spec.transport_options());
        args
    }

    /// ssh opens a direct connection when the control socket is missing,
    /// so a vanished master is reported as a lost session up front.
    fn ensure_master(&self) -> Result<(), TransferTaskError> {
        if self.socket.exists() {
            Ok(())
        } else {
            tracing::warn!("Control socket for {} is gone", self.spec);
            Err(TransferTaskError::SessionLost)
        }
    }

    /// Run `command` on the remote side and collect its output.
    async fn exec(&self, command: &str) -> Result<(ExitStatus, String, String), TransferTaskError> {
        self.ensure_master()?;
        let output = Command::new("ssh")
            .args(self.client_args())
            .arg(self.spec.destination())
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransferTaskError::Io(format!("failed to run ssh: {}", e)))?;
        Ok((
            output.status,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    async fn control(&self, op: &str) -> bool {
        if self.ensure_master().is_err() {
            return false;
        }
        Command::new("ssh")
            .args(self.client_args())
            .arg("-O")
            .arg(op)
            .arg(self.spec.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run scp, killing it if `cancel` fires first.
    async fn scp(
        &self,
        from: &str,
        to: &str,
        error_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferTaskError> {
        self.ensure_master()?;
        let mut child = Command::new("scp")
            .args(self.client_args())
            .arg(from)
            .arg(to)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferTaskError::Io(format!("failed to run scp: {}", e)))?;
        let mut stderr_pipe = child.stderr.take();

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let status = match finished {
            Some(status) => status.map_err(|e| TransferTaskError::Io(e.to_string()))?,
            None => {
                let _ = child.kill().await;
                return Err(TransferTaskError::Cancelled);
            }
        };

        let mut stderr = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        if status.success() {
            Ok(())
        } else {
            Err(classify_remote_error(error_path, status, &stderr))
        }
    }

    /// `user@host:path` for an scp destination, taken literally.
    fn remote_arg(&self, path: &str) -> String {
        format!("{}:{}", self.spec.destination(), path)
    }

    /// `user@host:path` for an scp source. scp glob-expands remote sources,
    /// so glob metacharacters are escaped.
    fn remote_source_arg(&self, path: &str) -> String {
        format!("{}:{}", self.spec.destination(), escape_glob(path))
    }
}

#[async_trait]
impl RemoteFs for OpenSshFs {
    async fn stat(&self, path: &str) -> Result<EntryMeta, TransferTaskError> {
        let command = format!("LC_ALL=C stat -L -c '%F|%s' -- {}", shell_escape(path));
        let (status, stdout, stderr) = self.exec(&command).await?;
        if !status.success() {
            return Err(classify_remote_error(path, status, &stderr));
        }
        parse_stat(path, &stdout)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, TransferTaskError> {
        let command = format!("LC_ALL=C ls -la -- {}", shell_escape(path));
        let (status, stdout, stderr) = self.exec(&command).await?;
        if !status.success() {
            return Err(classify_remote_error(path, status, &stderr));
        }
        Ok(parse_ls(&stdout))
    }

    async fn make_dir(&self, path: &str) -> Result<(), TransferTaskError> {
        let command = format!("mkdir -p -- {}", shell_escape(path));
        let (status, _, stderr) = self.exec(&command).await?;
        if !status.success() {
            return Err(classify_remote_error(path, status, &stderr));
        }
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let local_name = local.to_string_lossy().into_owned();
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| TransferTaskError::from_io(&local_name, e))?;
        if meta.is_dir() {
            return Err(TransferTaskError::IsDirectory(local_name));
        }
        self.scp(&local_name, &self.remote_arg(remote), remote, cancel)
            .await?;
        progress(meta.len());
        Ok(meta.len())
    }

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<u64, TransferTaskError> {
        let local_name = local.to_string_lossy().into_owned();
        self.scp(&self.remote_source_arg(remote), &local_name, remote, cancel)
            .await?;
        let size = tokio::fs::metadata(local)
            .await
            .map(|m| m.len())
            .map_err(|e| TransferTaskError::from_io(&local_name, e))?;
        progress(size);
        Ok(size)
    }

    async fn ping(&self) -> Result<(), TransferTaskError> {
        if self.control("check").await {
            Ok(())
        } else {
            Err(TransferTaskError::SessionLost)
        }
    }

    async fn close(&self) {
        if !self.control("exit").await {
            tracing::debug!("Control master for {} already gone", self.spec);
        }
        let _ = tokio::fs::remove_file(&self.socket).await;
    }

    fn supports_multiplexing(&self) -> bool {
        true
    }
}
