//! btrfs send stream v1 wire definitions.
//!
//! Wire format: all multi-byte integers are little-endian.
//! Header: magic[13] ("btrfs-stream\0") | version:u32
//! Command: len:u32 | cmd:u16 | crc:u32 | payload[len]
//! Attribute (TLV, inside a command payload): tag:u16 | len:u16 | data[len]

use crate::error::{DiffError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Magic literal including its trailing NUL.
pub const STREAM_MAGIC: &[u8; 13] = b"btrfs-stream\0";

/// Number of magic bytes compared (the NUL is not checked).
pub const STREAM_MAGIC_CMP_LEN: usize = 12;

/// The only stream version this decoder understands.
pub const STREAM_VERSION: u32 = 1;

/// magic(13) + version(4)
pub const STREAM_HEADER_SIZE: usize = 17;

/// len(4) + cmd(2) + crc(4)
pub const COMMAND_HEADER_SIZE: usize = 10;

/// tag(2) + len(2)
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

// =============================================================================
// Command codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Unspec = 0,
    Subvol = 1,
    Snapshot = 2,
    Mkfile = 3,
    Mkdir = 4,
    Mknod = 5,
    Mkfifo = 6,
    Mksock = 7,
    Symlink = 8,
    Rename = 9,
    Link = 10,
    Unlink = 11,
    Rmdir = 12,
    SetXattr = 13,
    RemoveXattr = 14,
    Write = 15,
    Clone = 16,
    Truncate = 17,
    Chmod = 18,
    Chown = 19,
    Utimes = 20,
    End = 21,
    UpdateExtent = 22,
}

impl Command {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::Unspec),
            1 => Some(Self::Subvol),
            2 => Some(Self::Snapshot),
            3 => Some(Self::Mkfile),
            4 => Some(Self::Mkdir),
            5 => Some(Self::Mknod),
            6 => Some(Self::Mkfifo),
            7 => Some(Self::Mksock),
            8 => Some(Self::Symlink),
            9 => Some(Self::Rename),
            10 => Some(Self::Link),
            11 => Some(Self::Unlink),
            12 => Some(Self::Rmdir),
            13 => Some(Self::SetXattr),
            14 => Some(Self::RemoveXattr),
            15 => Some(Self::Write),
            16 => Some(Self::Clone),
            17 => Some(Self::Truncate),
            18 => Some(Self::Chmod),
            19 => Some(Self::Chown),
            20 => Some(Self::Utimes),
            21 => Some(Self::End),
            22 => Some(Self::UpdateExtent),
            _ => None,
        }
    }
}

// =============================================================================
// Attribute tags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Attribute {
    Unspec = 0,
    Uuid = 1,
    Ctransid = 2,
    Ino = 3,
    Size = 4,
    Mode = 5,
    Uid = 6,
    Gid = 7,
    Rdev = 8,
    Ctime = 9,
    Mtime = 10,
    Atime = 11,
    Otime = 12,
    XattrName = 13,
    XattrData = 14,
    Path = 15,
    PathTo = 16,
    PathLink = 17,
    FileOffset = 18,
    Data = 19,
    CloneUuid = 20,
    CloneCtransid = 21,
    ClonePath = 22,
    CloneOffset = 23,
    CloneLen = 24,
}

// =============================================================================
// Stream header
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub magic: [u8; 13],
    pub version: u32,
}

impl StreamHeader {
    pub fn new() -> Self {
        Self {
            magic: *STREAM_MAGIC,
            version: STREAM_VERSION,
        }
    }

    /// Read the 17-byte preamble and reject anything that is not a v1 stream.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 13];
        r.read_exact(&mut magic).await?;
        let version = r.read_u32_le().await?;

        let header = Self { magic, version };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        let expected = &STREAM_MAGIC[..STREAM_MAGIC_CMP_LEN];
        let got = &self.magic[..STREAM_MAGIC_CMP_LEN];
        if got != expected {
            return Err(DiffError::Header(format!(
                "not a btrfs send stream, got {:?} in the magic header instead of {:?}",
                String::from_utf8_lossy(got),
                String::from_utf8_lossy(expected)
            )));
        }
        if self.version != STREAM_VERSION {
            return Err(DiffError::Header(format!(
                "unknown send stream version {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STREAM_HEADER_SIZE);
        buf.put_slice(&self.magic);
        buf.put_u32_le(self.version);
        buf.freeze()
    }
}

impl Default for StreamHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Command header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Payload length, excluding this header.
    pub len: u32,
    pub cmd: u16,
    /// Carried on the wire but never verified.
    pub crc: u32,
}

impl CommandHeader {
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let len = r.read_u32_le().await?;
        let cmd = r.read_u16_le().await?;
        let crc = r.read_u32_le().await?;
        Ok(Self { len, cmd, crc })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.cmd)
    }
}

// =============================================================================
// Command frame encoding
// =============================================================================

/// Builder for a single encoded command. Used to produce streams for tests
/// and benchmarks; the checksum field is always written as zero.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: u16,
    payload: BytesMut,
}

impl CommandFrame {
    pub fn new(cmd: Command) -> Self {
        Self::raw(cmd as u16)
    }

    /// Frame with an arbitrary command code, including ones this decoder
    /// does not know.
    pub fn raw(cmd: u16) -> Self {
        Self {
            cmd,
            payload: BytesMut::new(),
        }
    }

    /// Append one TLV attribute. Panics if `data` exceeds the u16 length field.
    pub fn bytes(mut self, attr: Attribute, data: &[u8]) -> Self {
        let len = u16::try_from(data.len()).expect("attribute payload exceeds u16::MAX");
        self.payload.put_u16_le(attr as u16);
        self.payload.put_u16_le(len);
        self.payload.put_slice(data);
        self
    }

    pub fn string(self, attr: Attribute, value: &str) -> Self {
        self.bytes(attr, value.as_bytes())
    }

    pub fn u64(self, attr: Attribute, value: u64) -> Self {
        self.bytes(attr, &value.to_le_bytes())
    }

    /// Append payload bytes that are not TLV encoded.
    pub fn opaque(mut self, data: &[u8]) -> Self {
        self.payload.put_slice(data);
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_HEADER_SIZE + self.payload.len());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_u16_le(self.cmd);
        buf.put_u32_le(0);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Concatenate a v1 header, the given frames, and a trailing `end` command.
pub fn encode_stream<'a, I>(frames: I) -> Bytes
where
    I: IntoIterator<Item = &'a CommandFrame>,
{
    let mut buf = BytesMut::new();
    buf.put_slice(&StreamHeader::new().encode());
    for frame in frames {
        buf.put_slice(&frame.encode());
    }
    buf.put_slice(&CommandFrame::new(Command::End).encode());
    buf.freeze()
}

// =============================================================================
// Tests
// =============================================================================
