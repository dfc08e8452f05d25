// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Peer wire protocol.
//!
//! Every message travels in a frame:
//!
//! ```text
//! magic(4) | command(12, NUL padded ASCII) | length(u32 LE) | checksum(4) | payload
//! ```
//!
//! The checksum is the first four bytes of double SHA-256 over the payload.

use crate::primitives::{Block, Hash256, Transaction};
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u32 = 1;
pub const COMMAND_LEN: usize = 12;
pub const HEADER_LEN: usize = 4 + COMMAND_LEN + 4 + 4;
pub const MAX_PAYLOAD_LEN: usize = 2 * 1024 * 1024;

/// Max items in a single `inv` or `getdata`
pub const MAX_INV_ITEMS: usize = 50_000;

/// Max addresses in a single `addr`
pub const MAX_ADDRS: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct InvItem {
    pub kind: InvKind,
    pub hash: Hash256,
}

impl InvItem {
    pub fn block(hash: Hash256) -> Self {
        Self {
            kind: InvKind::Block,
            hash,
        }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self {
            kind: InvKind::Tx,
            hash,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct VersionMsg {
    pub version: u32,
    pub best_height: u64,

    /// Random per process, used to detect connections to ourselves
    pub nonce: u64,
    pub timestamp: i64,

    /// Port the sender accepts connections on, 0 if none
    pub listen_port: u16,
    pub user_agent: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionMsg),
    Verack,
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    Block(Box<Block>),
    Tx(Box<Transaction>),
    Ping(u64),
    Pong(u64),

    /// Block locator, newest first
    GetBlocks(Vec<Hash256>),
    GetAddr,
    Addr(Vec<SocketAddr>),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Verack => "verack",
            Self::Inv(_) => "inv",
            Self::GetData(_) => "getdata",
            Self::Block(_) => "block",
            Self::Tx(_) => "tx",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::GetBlocks(_) => "getblocks",
            Self::GetAddr => "getaddr",
            Self::Addr(_) => "addr",
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, EncodeError> {
        use crate::codec::encode_to_vec;

        match self {
            Self::Version(v) => encode_to_vec(v),
            Self::Verack | Self::GetAddr => Ok(vec![]),
            Self::Inv(items) | Self::GetData(items) => encode_to_vec(items),
            Self::Block(block) => encode_to_vec(block.as_ref()),
            Self::Tx(tx) => encode_to_vec(tx.as_ref()),
            Self::Ping(nonce) | Self::Pong(nonce) => encode_to_vec(nonce),
            Self::GetBlocks(locator) => encode_to_vec(locator),
            Self::Addr(addrs) => encode_to_vec(addrs),
        }
    }

    fn decode_payload(command: &str, payload: &[u8]) -> Result<Self, WireErr> {
        use crate::codec::decode;

        let msg = match command {
            "version" => Self::Version(decode(payload)?),
            "verack" | "getaddr" => {
                if !payload.is_empty() {
                    return Err(WireErr::Decode(DecodeError::Other("unexpected payload")));
                }
                if command == "verack" {
                    Self::Verack
                } else {
                    Self::GetAddr
                }
            }
            "inv" | "getdata" => {
                let items: Vec<InvItem> = decode(payload)?;
                if items.len() > MAX_INV_ITEMS {
                    return Err(WireErr::TooManyItems);
                }
                if command == "inv" {
                    Self::Inv(items)
                } else {
                    Self::GetData(items)
                }
            }
            "block" => Self::Block(Box::new(decode(payload)?)),
            "tx" => Self::Tx(Box::new(decode(payload)?)),
            "ping" => Self::Ping(decode(payload)?),
            "pong" => Self::Pong(decode(payload)?),
            "getblocks" => Self::GetBlocks(decode(payload)?),
            "addr" => {
                let addrs: Vec<SocketAddr> = decode(payload)?;
                if addrs.len() > MAX_ADDRS {
                    return Err(WireErr::TooManyItems);
                }
                Self::Addr(addrs)
            }
            other => return Err(WireErr::UnknownCommand(other.to_owned())),
        };

        Ok(msg)
    }
}

#[derive(Debug)]
pub enum WireErr {
    BadMagic([u8; 4]),
    UnknownCommand(String),
    Oversized(usize),
    BadChecksum,
    TooManyItems,
    Encode(EncodeError),
    Decode(DecodeError),
    Io(io::Error),

    /// The remote end closed the connection
    Closed,
}

impl WireErr {
    /// Misbehaviour score for protocol violations
    pub fn ban_score(&self) -> u32 {
        match self {
            Self::BadMagic(_) => 100,
            Self::Oversized(_) | Self::Decode(_) | Self::TooManyItems => 50,
            Self::UnknownCommand(_) | Self::BadChecksum => 20,
            Self::Encode(_) | Self::Io(_) | Self::Closed => 0,
        }
    }
}

impl fmt::Display for WireErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(magic) => write!(f, "bad magic {}", hex::encode(magic)),
            Self::UnknownCommand(cmd) => write!(f, "unknown command {cmd:?}"),
            Self::Oversized(len) => write!(f, "payload of {len} bytes exceeds limit"),
            Self::BadChecksum => f.write_str("checksum mismatch"),
            Self::TooManyItems => f.write_str("too many items"),
            Self::Encode(err) => write!(f, "encode: {err}"),
            Self::Decode(err) => write!(f, "decode: {err}"),
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Closed => f.write_str("connection closed"),
        }
    }
}

impl From<EncodeError> for WireErr {
    fn from(other: EncodeError) -> Self {
        Self::Encode(other)
    }
}

impl From<DecodeError> for WireErr {
    fn from(other: DecodeError) -> Self {
        Self::Decode(other)
    }
}

impl From<io::Error> for WireErr {
    fn from(other: io::Error) -> Self {
        Self::Io(other)
    }
}

pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Frames messages for one network
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    magic: [u8; 4],
}

impl FrameCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        Self { magic }
    }

    pub fn encode(&self, msg: &Message, dst: &mut BytesMut) -> Result<(), WireErr> {
        let payload = msg.encode_payload()?;

        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireErr::Oversized(payload.len()));
        }

        let mut command = [0u8; COMMAND_LEN];
        let name = msg.command().as_bytes();
        command[..name.len()].copy_from_slice(name);

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&self.magic);
        dst.put_slice(&command);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }

    /// Takes one complete frame off the front of `src`. Returns `Ok(None)` if
    /// more bytes are needed.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Message>, WireErr> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[..4]);
        if magic != self.magic {
            return Err(WireErr::BadMagic(magic));
        }

        let command_bytes = &src[4..4 + COMMAND_LEN];
        let name_len = command_bytes.iter().position(|b| *b == 0).unwrap_or(COMMAND_LEN);
        if command_bytes[name_len..].iter().any(|b| *b != 0) || !command_bytes[..name_len].is_ascii() {
            return Err(WireErr::UnknownCommand(hex::encode(command_bytes)));
        }
        let command = String::from_utf8_lossy(&command_bytes[..name_len]).into_owned();

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[16..20]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(WireErr::Oversized(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let mut sum = [0u8; 4];
        sum.copy_from_slice(&src[20..24]);
        src.advance(HEADER_LEN);
        let payload = src.split_to(len);

        if checksum(&payload) != sum {
            return Err(WireErr::BadChecksum);
        }

        Message::decode_payload(&command, &payload).map(Some)
    }

    /// Reads until a full message is buffered
    pub async fn read_message<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut BytesMut,
    ) -> Result<Message, WireErr> {
        loop {
            if let Some(msg) = self.decode(buf)? {
                return Ok(msg);
            }

            if reader.read_buf(buf).await? == 0 {
                return Err(WireErr::Closed);
            }
        }
    }

    pub async fn write_message<W: AsyncWrite + Unpin>(&self, writer: &mut W, msg: &Message) -> Result<(), WireErr> {
        let mut buf = BytesMut::new();
        self.encode(msg, &mut buf)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}
