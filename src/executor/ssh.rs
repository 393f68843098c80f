//! SSH implementation of the remote execution channel.
//!
//! One short-lived session per call: resolve the host, handshake,
//! password auth, run the command on a session channel, drain stdout and
//! stderr, hang up. Sessions are not pooled; the testbed's sshd tolerates
//! this and it keeps a hung node from wedging later calls.

use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use async_io::Async;
use async_ssh2_lite::{AsyncChannel, AsyncSession};
use async_trait::async_trait;
use futures::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::WallConfig;
use crate::error::{Result, WallError};
use crate::executor::{ExecOutput, RemoteExecutor};

/// Remote executor speaking SSH with password authentication.
pub struct SshExecutor {
    username: String,
    password: String,
}

impl SshExecutor {
    /// Creates an executor using the credentials from `config`.
    pub fn new(config: &WallConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn open_session(&self, host: &str) -> Result<AsyncSession<Async<TcpStream>>> {
        let mut addrs = tokio::net::lookup_host(format!("{host}:22"))
            .await
            .map_err(|e| WallError::connection(host, format!("name resolution failed: {e}")))?;

        let addr = addrs
            .next()
            .ok_or_else(|| WallError::connection(host, "name resolved to no addresses"))?;

        let stream = Async::<TcpStream>::connect(addr)
            .await
            .map_err(|e| WallError::connection(host, e.to_string()))?;

        let mut session = AsyncSession::new(stream, None)
            .map_err(|e| WallError::connection(host, e.to_string()))?;

        session
            .handshake()
            .await
            .map_err(|e| WallError::connection(host, format!("handshake failed: {e}")))?;

        session
            .userauth_password(&self.username, &self.password)
            .await
            .map_err(|e| WallError::connection(host, format!("authentication failed: {e}")))?;

        Ok(session)
    }

    async fn run(&self, host: &str, command: &str) -> Result<ExecOutput> {
        let session = self.open_session(host).await?;

        let mut channel = session
            .channel_session()
            .await
            .map_err(|e| WallError::connection(host, e.to_string()))?;

        channel
            .exec(command)
            .await
            .map_err(|e| WallError::connection(host, e.to_string()))?;

        let output = read_output(host, &mut channel).await?;

        if let Err(e) = channel.close().await {
            debug!(host = %host, error = %e, "Channel close failed");
        }

        if output.has_diagnostics() {
            // Diagnostic only; success is decided at the transport level.
            warn!(
                host = %host,
                stderr = %output.stderr.trim(),
                "Remote command produced diagnostics"
            );
        }

        Ok(output)
    }

    async fn put_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        // The testbed engine reads the file from another account, so open
        // the permissions up before writing the content over SFTP.
        self.run(host, &format!("touch {path}; chmod a+rwx {path}"))
            .await?;

        let session = self.open_session(host).await?;

        let sftp = session
            .sftp()
            .await
            .map_err(|e| WallError::connection(host, format!("sftp failed: {e}")))?;

        let mut file = sftp
            .create(Path::new(path))
            .await
            .map_err(|e| WallError::connection(host, format!("sftp create failed: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| WallError::connection(host, format!("sftp write failed: {e}")))?;

        file.flush()
            .await
            .map_err(|e| WallError::connection(host, format!("sftp flush failed: {e}")))?;

        debug!(host = %host, path = %path, bytes = content.len(), "Wrote remote file");
        Ok(())
    }
}

async fn read_output(
    host: &str,
    channel: &mut AsyncChannel<Async<TcpStream>>,
) -> Result<ExecOutput> {
    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .await
        .map_err(|e| WallError::connection(host, e.to_string()))?;

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .await
        .map_err(|e| WallError::connection(host, e.to_string()))?;

    Ok(ExecOutput { stdout, stderr })
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        debug!(host = %host, command = %command, timeout = ?timeout, "Executing remote command");

        match timeout {
            None => self.run(host, command).await,
            Some(limit) => {
                let started = Instant::now();
                match tokio::time::timeout(limit, self.run(host, command)).await {
                    Ok(result) => result,
                    Err(_) => Err(WallError::timeout(
                        host,
                        command,
                        started.elapsed().as_millis() as u64,
                    )),
                }
            }
        }
    }

    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<()> {
        self.put_file(host, path, content).await
    }
}
