//! `btrfs send` session - spawns the native send and exposes its stdout.
//!
//! The decoder only reads up to the `end` command; the rest of the pipe is
//! drained before the child is reaped so it never blocks on a full pipe. The
//! session owns the read buffer, so bytes the decoder buffered past `end`
//! are still counted by the drain.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::changes::Change;
use crate::streaming::SendStreamDecoder;

/// A running `btrfs send [-p parent] snapshot`.
pub struct SendSession {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl SendSession {
    pub fn spawn(btrfs_bin: &str, parent: Option<&Path>, snapshot: &Path) -> Result<Self> {
        let mut cmd = Command::new(btrfs_bin);
        cmd.arg("send");

        if let Some(parent) = parent {
            cmd.arg("-p").arg(parent);
        }
        cmd.arg(snapshot);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        debug!(bin = btrfs_bin, ?parent, snapshot = %snapshot.display(), "spawning btrfs send");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} send", btrfs_bin))?;
        let stdout = child.stdout.take().context("Failed to open stdout")?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    pub fn stdout(&mut self) -> &mut BufReader<ChildStdout> {
        &mut self.stdout
    }

    /// Drain leftover output and require a zero exit status. Returns the
    /// number of bytes drained.
    pub async fn finish(mut self) -> Result<u64> {
        let leftover = tokio::io::copy(&mut self.stdout, &mut tokio::io::sink())
            .await
            .context("Failed to drain btrfs send output")?;
        if leftover > 0 {
            warn!(bytes = leftover, "ignored output after end of send stream");
        }
        drop(self.stdout);

        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for btrfs send")?;
        if !status.success() {
            anyhow::bail!("btrfs send exited with {}", status);
        }
        Ok(leftover)
    }

    pub async fn abort(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "btrfs send already exited");
        }
    }
}

/// Canonical changes between `parent` and `snapshot`. Without a parent the
/// stream is a full send and every entry shows up as an add.
pub async fn diff_snapshots(
    btrfs_bin: &str,
    parent: Option<&Path>,
    snapshot: &Path,
) -> Result<Vec<Change>> {
    collect_changes(btrfs_bin, parent, snapshot, true).await
}

/// Changes between `parent` and `snapshot` in stream order, not normalized.
pub async fn raw_snapshot_changes(
    btrfs_bin: &str,
    parent: Option<&Path>,
    snapshot: &Path,
) -> Result<Vec<Change>> {
    collect_changes(btrfs_bin, parent, snapshot, false).await
}

async fn collect_changes(
    btrfs_bin: &str,
    parent: Option<&Path>,
    snapshot: &Path,
    normalize: bool,
) -> Result<Vec<Change>> {
    let mut session = SendSession::spawn(btrfs_bin, parent, snapshot)?;

    let decoder = SendStreamDecoder::new(session.stdout());
    let decoded = if normalize {
        decoder.decode().await
    } else {
        decoder.run().await.map(|(changes, _)| changes)
    };
    match decoded {
        Ok(changes) => {
            session.finish().await?;
            Ok(changes)
        }
        Err(e) => {
            session.abort().await;
            Err(e).with_context(|| format!("Failed to decode send stream of {}", snapshot.display()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::streaming::{encode_stream, Attribute, Command as StreamCommand, CommandFrame};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in `btrfs` that prints a canned stream and exits with `code`.
    fn fake_btrfs(dir: &TempDir, stream: &[u8], code: i32) -> String {
        let stream_path = dir.path().join("stream.bin");
        fs::write(&stream_path, stream).unwrap();

        let script = dir.path().join("btrfs");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\ncat '{}'\nexit {}\n",
                stream_path.display(),
                code
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    fn sample_stream() -> Vec<u8> {
        encode_stream(&[
            CommandFrame::new(StreamCommand::Unlink).string(Attribute::Path, "old"),
            CommandFrame::new(StreamCommand::Chmod)
                .string(Attribute::Path, "kept")
                .u64(Attribute::Mode, 0o600),
        ])
        .to_vec()
    }

    #[tokio::test]
    async fn test_diff_snapshots() {
        let dir = TempDir::new().unwrap();
        let bin = fake_btrfs(&dir, &sample_stream(), 0);

        let changes = diff_snapshots(&bin, Some(Path::new("/snap/a")), Path::new("/snap/b"))
            .await
            .unwrap();
        assert_eq!(changes, vec![Change::delete("/old"), Change::modify("/kept")]);
    }

    #[tokio::test]
    async fn test_raw_snapshot_changes() {
        let dir = TempDir::new().unwrap();
        let stream = encode_stream(&[
            CommandFrame::new(StreamCommand::Chmod)
                .string(Attribute::Path, "f")
                .u64(Attribute::Mode, 0o600),
            CommandFrame::new(StreamCommand::Chown)
                .string(Attribute::Path, "f")
                .u64(Attribute::Uid, 1)
                .u64(Attribute::Gid, 1),
        ]);
        let bin = fake_btrfs(&dir, &stream, 0);

        let changes = raw_snapshot_changes(&bin, None, Path::new("/snap/b"))
            .await
            .unwrap();
        assert_eq!(changes, vec![Change::modify("/f"), Change::modify("/f")]);
    }

    #[tokio::test]
    async fn test_finish_counts_buffered_trailing_bytes() {
        let dir = TempDir::new().unwrap();
        let mut stream = sample_stream();
        stream.extend_from_slice(&[0x5A; 100]);
        let bin = fake_btrfs(&dir, &stream, 0);

        let mut session = SendSession::spawn(&bin, None, Path::new("/snap/b")).unwrap();
        let changes = SendStreamDecoder::new(session.stdout())
            .decode()
            .await
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(session.finish().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = TempDir::new().unwrap();
        let bin = fake_btrfs(&dir, &sample_stream(), 1);

        let err = diff_snapshots(&bin, None, Path::new("/snap/b"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn test_garbage_stream_fails() {
        let dir = TempDir::new().unwrap();
        let bin = fake_btrfs(&dir, b"definitely not a send stream", 0);

        let err = diff_snapshots(&bin, None, Path::new("/snap/b"))
            .await
            .unwrap_err();
        let root = err.downcast_ref::<crate::error::DiffError>();
        assert!(matches!(root, Some(crate::error::DiffError::Header(_))));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = diff_snapshots("/nonexistent/btrfs", None, Path::new("/snap"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
