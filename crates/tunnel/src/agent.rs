//! Locating and launching the agent subprocess behind an established
//! data-channel connection.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transport::adapter::{DataChannel, DataChannelConnection};

use crate::error::{Result, TunnelError};

/// Supplies the bundled agent binary for the running process's own
/// version, when no installed binary is found on disk.
///
/// A seam so tests can exercise [`locate_agent`] without embedding a
/// real executable.
pub trait AgentBundle: Send + Sync + 'static {
    /// This process's own protocol version, eligible for bundled
    /// extraction.
    fn current_version(&self) -> (u32, u32);

    /// Writes the bundled agent binary to `destination`.
    fn extract(&self, destination: &Path) -> std::io::Result<()>;
}

/// A located agent binary: either a path under the well-known install
/// tree, or a freshly extracted temporary file removed on drop.
pub enum AgentBinary {
    /// A binary found under `libexec/mutagen/agents/<major>.<minor>/<platform>`.
    Installed(PathBuf),
    /// A binary extracted from the running process's bundle.
    Extracted(ExtractedAgent),
}

impl AgentBinary {
    /// The path to invoke.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Installed(path) => path,
            Self::Extracted(extracted) => &extracted.path,
        }
    }
}

/// A temporary agent binary; removed when dropped.
pub struct ExtractedAgent {
    path: PathBuf,
}

impl Drop for ExtractedAgent {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove extracted agent binary");
        }
    }
}

/// Returns this platform's identifier in the `<os>_<arch>` form used
/// by the agent search path.
#[must_use]
pub fn platform_name() -> String {
    format!("{}_{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Locates a compatible agent binary for `major.minor` under
/// `search_root`, falling back to extracting `bundle`'s own binary
/// when the requested version matches the running process's version.
pub fn locate_agent(
    bundle: &dyn AgentBundle,
    search_root: &Path,
    major: u32,
    minor: u32,
) -> Result<AgentBinary> {
    let platform = platform_name();
    let installed = search_root
        .join(format!("{major}.{minor}"))
        .join(&platform);
    if installed.is_file() {
        return Ok(AgentBinary::Installed(installed));
    }

    if bundle.current_version() != (major, minor) {
        return Err(TunnelError::AgentNotFound {
            major,
            minor,
            platform,
        });
    }

    let destination = std::env::temp_dir().join(format!("mutagen-agent-{}", uuid::Uuid::new_v4()));
    bundle
        .extract(&destination)
        .map_err(TunnelError::Agent)?;
    Ok(AgentBinary::Extracted(ExtractedAgent { path: destination }))
}

/// Launches the agent subprocess in `mode` and splices its stdio to
/// `connection` until either direction ends or `cancel` fires.
///
/// `connection` is consumed and split into independent read and write
/// halves (see [`DataChannelConnection::split`]): the connection only
/// offers a `write_all` method, not `tokio::io::AsyncWrite`, so the
/// agent-stdout-to-connection direction is spliced by hand rather than
/// via `tokio::io::copy`.
pub async fn run_agent<D>(
    binary: &AgentBinary,
    mode: &str,
    connection: DataChannelConnection<D>,
    cancel: CancellationToken,
) -> Result<()>
where
    D: DataChannel,
{
    let mut child = Command::new(binary.path())
        .arg(mode)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut agent_stdin = child.stdin.take().expect("stdin was piped");
    let mut agent_stdout = child.stdout.take().expect("stdout was piped");
    let agent_stderr = child.stderr.take().expect("stderr was piped");

    let stderr_task = tokio::spawn(async move {
        let mut reader = BufReader::new(agent_stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => info!(agent_stderr = line.trim_end(), "agent log"),
            }
        }
    });

    let (mut conn_read, conn_write) = connection.split();

    let to_agent = async { tokio::io::copy(&mut conn_read, &mut agent_stdin).await };
    let from_agent = async {
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            let read = agent_stdout.read(&mut buf).await?;
            if read == 0 {
                return Ok::<(), TunnelError>(());
            }
            conn_write.write_all(&buf[..read]).await?;
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = to_agent => {}
        _ = from_agent => {}
    }

    stderr_task.abort();
    let _ = child.kill().await;
    let _ = conn_write.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct StubBundle {
        version: (u32, u32),
        contents: &'static [u8],
    }

    impl AgentBundle for StubBundle {
        fn current_version(&self) -> (u32, u32) {
            self.version
        }

        fn extract(&self, destination: &Path) -> std::io::Result<()> {
            std::fs::write(destination, self.contents)
        }
    }

    #[test]
    fn finds_installed_binary_before_extracting() {
        let root = tempdir().unwrap();
        let versioned = root.path().join("1.0").join(platform_name());
        std::fs::create_dir_all(versioned.parent().unwrap()).unwrap();
        std::fs::write(&versioned, b"binary").unwrap();

        let bundle = StubBundle {
            version: (9, 9),
            contents: b"bundled",
        };
        let located = locate_agent(&bundle, root.path(), 1, 0).unwrap();
        assert_eq!(located.path(), versioned);
    }

    #[test]
    fn extracts_bundle_when_version_matches_and_nothing_installed() {
        let root = tempdir().unwrap();
        let bundle = StubBundle {
            version: (2, 3),
            contents: b"bundled binary contents",
        };
        let located = locate_agent(&bundle, root.path(), 2, 3).unwrap();
        let path = located.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"bundled binary contents");
        drop(located);
        assert!(!path.exists(), "extracted agent binary should be removed on drop");
    }

    #[test]
    fn errors_when_nothing_installed_and_version_mismatches() {
        let root = tempdir().unwrap();
        let bundle = StubBundle {
            version: (9, 9),
            contents: b"bundled",
        };
        let err = locate_agent(&bundle, root.path(), 1, 0).unwrap_err();
        assert!(matches!(err, TunnelError::AgentNotFound { .. }));
    }
}
