//! Send stream command dispatcher.
//!
//! Reads the stream header once, then one command per iteration until the
//! `end` command. Known commands have their attributes read in protocol
//! order and produce raw [`Change`]s; unknown commands are skipped by their
//! declared length.

use crate::changes::{self, Change};
use crate::error::{DiffError, Result};
use crate::streaming::attr::{skip_bytes, AttributeReader};
use crate::streaming::protocol::{Attribute, Command, CommandHeader, StreamHeader};
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Running,
    Done,
}

/// Counters collected while decoding a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Commands read, including the terminating `end`.
    pub commands: u64,
    /// Commands skipped without interpretation.
    pub skipped: u64,
    /// Payload bytes read, excluding headers.
    pub payload_bytes: u64,
}

pub struct SendStreamDecoder<R> {
    reader: R,
    state: DecodeState,
    changes: Vec<Change>,
    stats: DecodeStats,
}

impl<R: AsyncRead + Unpin> SendStreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: DecodeState::Running,
            changes: Vec::new(),
            stats: DecodeStats::default(),
        }
    }

    /// Decode the whole stream and normalize it into the canonical change set.
    pub async fn decode(self) -> Result<Vec<Change>> {
        let (raw, stats) = self.run().await?;
        let raw_len = raw.len();
        let changes = changes::normalize(raw)?;
        info!(
            commands = stats.commands,
            raw = raw_len,
            changes = changes.len(),
            "computed snapshot diff"
        );
        Ok(changes)
    }

    /// Decode the whole stream into raw, unnormalized changes.
    pub async fn run(mut self) -> Result<(Vec<Change>, DecodeStats)> {
        StreamHeader::read(&mut self.reader).await?;

        while self.state == DecodeState::Running {
            self.next_command().await?;
        }

        debug!(
            commands = self.stats.commands,
            skipped = self.stats.skipped,
            changes = self.changes.len(),
            "send stream decoded"
        );
        Ok((self.changes, self.stats))
    }

    async fn next_command(&mut self) -> Result<()> {
        let header = CommandHeader::read(&mut self.reader).await?;
        let len = u64::from(header.len);
        self.stats.commands += 1;
        self.stats.payload_bytes += len;

        let cmd = match header.command() {
            Some(cmd) if has_handler(cmd) => cmd,
            other => {
                debug!(cmd = header.cmd, known = ?other, len, "skipping command");
                skip_bytes(&mut self.reader, len).await?;
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        if cmd == Command::End {
            debug!("end of send stream");
            self.state = DecodeState::Done;
            return Ok(());
        }

        let mut attrs = AttributeReader::new(&mut self.reader);
        read_command(cmd, &mut attrs, &mut self.changes).await?;

        let consumed = attrs.consumed();
        if consumed > len {
            return Err(DiffError::Protocol(format!(
                "{:?} attributes used {} bytes but the command declared {}",
                cmd, consumed, len
            )));
        }
        if consumed < len {
            let rest = attrs.skip_remaining(len).await?;
            debug!(cmd = ?cmd, rest, "skipped trailing command payload");
        }
        Ok(())
    }
}

/// Commands that either produce changes or end the stream. Everything else
/// (subvolume setup, file data, clones) carries nothing path-level.
fn has_handler(cmd: Command) -> bool {
    !matches!(
        cmd,
        Command::Unspec | Command::Subvol | Command::Snapshot | Command::Write | Command::Clone
    )
}

fn absolute(name: OsString) -> PathBuf {
    let mut path = OsString::with_capacity(name.len() + 1);
    path.push("/");
    path.push(name);
    PathBuf::from(path)
}

async fn read_command<R: AsyncRead + Unpin>(
    cmd: Command,
    attrs: &mut AttributeReader<'_, R>,
    out: &mut Vec<Change>,
) -> Result<()> {
    let path = absolute(attrs.read_string(Attribute::Path).await?);

    let change = match cmd {
        Command::Mkfile | Command::Mkdir | Command::Mkfifo | Command::Mksock => {
            attrs.read_u64(Attribute::Ino).await?;
            Change::add(path)
        }
        Command::Mknod => {
            attrs.read_u64(Attribute::Ino).await?;
            attrs.read_u64(Attribute::Mode).await?;
            attrs.read_u64(Attribute::Rdev).await?;
            Change::add(path)
        }
        Command::Symlink => {
            attrs.read_u64(Attribute::Ino).await?;
            attrs.read_string(Attribute::PathLink).await?;
            Change::add(path)
        }
        Command::Rename => {
            let to = absolute(attrs.read_string(Attribute::PathTo).await?);
            out.push(Change::delete(path));
            Change::add(to)
        }
        Command::Link => {
            attrs.read_string(Attribute::PathLink).await?;
            Change::add(path)
        }
        Command::Unlink | Command::Rmdir => Change::delete(path),
        Command::SetXattr => {
            attrs.read_string(Attribute::XattrName).await?;
            attrs.read_bytes(Attribute::XattrData).await?;
            Change::modify(path)
        }
        Command::RemoveXattr => {
            attrs.read_string(Attribute::XattrName).await?;
            Change::modify(path)
        }
        // Truncation establishes file content, so it counts as an add.
        Command::Truncate => {
            attrs.read_u64(Attribute::Size).await?;
            Change::add(path)
        }
        Command::Chmod => {
            attrs.read_u64(Attribute::Mode).await?;
            Change::modify(path)
        }
        Command::Chown => {
            attrs.read_u64(Attribute::Uid).await?;
            attrs.read_u64(Attribute::Gid).await?;
            Change::modify(path)
        }
        Command::Utimes => {
            attrs.read_bytes(Attribute::Atime).await?;
            attrs.read_bytes(Attribute::Mtime).await?;
            attrs.read_bytes(Attribute::Ctime).await?;
            Change::modify(path)
        }
        Command::UpdateExtent => {
            attrs.read_u64(Attribute::FileOffset).await?;
            attrs.read_u64(Attribute::Size).await?;
            Change::modify(path)
        }
        Command::End
        | Command::Unspec
        | Command::Subvol
        | Command::Snapshot
        | Command::Write
        | Command::Clone => {
            return Err(DiffError::Protocol(format!("no handler for {:?}", cmd)));
        }
    };

    debug!(cmd = ?cmd, change = %change, "command");
    out.push(change);
    Ok(())
}

/// Decode a send stream into raw changes, in stream order.
///
/// Both entry points buffer `reader` themselves and drop that buffer on
/// return. A caller that keeps reading after `end` should buffer the source
/// itself and drive a [`SendStreamDecoder`] over it.
pub async fn read_send_stream<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<Change>> {
    let (changes, _) = SendStreamDecoder::new(BufReader::new(reader)).run().await?;
    Ok(changes)
}

/// Decode a send stream and normalize it into the canonical change set.
pub async fn decode_send_stream<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<Change>> {
    SendStreamDecoder::new(BufReader::new(reader)).decode().await
}
