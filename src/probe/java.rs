//! Java Edition Server List Ping.
//!
//! Handshake (packet 0x00, next state 1), then status request (0x00); the
//! server answers with a VarInt-framed packet carrying a JSON document.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{ProbeError, ProbeResponse};

/// Protocol version sent in the handshake; -1 asks for "any".
const PROTOCOL_VERSION: i32 = -1;

/// Status responses above this size are rejected.
const MAX_PACKET_LEN: i32 = 1 << 21;

const STATUS_REQUEST: [u8; 2] = [0x01, 0x00];

#[derive(Debug, Deserialize)]
struct StatusDocument {
    players: Option<Players>,
    version: Option<Version>,
    favicon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Players {
    online: u64,
    max: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Version {
    name: String,
}

pub(super) async fn ping(host: &str, port: u16) -> Result<ProbeResponse, ProbeError> {
    let started = Instant::now();
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;

    stream.write_all(&handshake_packet(host, port)).await?;
    stream.write_all(&STATUS_REQUEST).await?;

    let length = read_varint(&mut stream).await?;
    if !(1..=MAX_PACKET_LEN).contains(&length) {
        return Err(ProbeError::protocol(format!("bad packet length {length}")));
    }
    let mut packet = vec![0u8; length as usize];
    stream.read_exact(&mut packet).await?;
    let latency = started.elapsed();

    let (packet_id, used) = decode_varint(&packet)?;
    if packet_id != 0x00 {
        return Err(ProbeError::protocol(format!(
            "expected status response, got packet {packet_id:#04x}"
        )));
    }
    let body = &packet[used..];
    let (json_len, used) = decode_varint(body)?;
    let json = usize::try_from(json_len)
        .ok()
        .and_then(|len| body.get(used..used + len))
        .ok_or_else(|| ProbeError::protocol("status string overruns packet"))?;

    parse_status(json, latency)
}

/// Build the framed handshake packet.
pub fn handshake_packet(host: &str, port: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(host.len() + 16);
    encode_varint(&mut body, 0x00);
    encode_varint(&mut body, PROTOCOL_VERSION);
    encode_varint(&mut body, host.len() as i32);
    body.extend_from_slice(host.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    encode_varint(&mut body, 1);

    let mut packet = Vec::with_capacity(body.len() + 5);
    encode_varint(&mut packet, body.len() as i32);
    packet.extend_from_slice(&body);
    packet
}

/// Parse the status JSON document.
pub fn parse_status(json: &[u8], latency: Duration) -> Result<ProbeResponse, ProbeError> {
    let doc: StatusDocument = serde_json::from_slice(json)?;
    let players = doc
        .players
        .ok_or_else(|| ProbeError::protocol("status has no player count"))?;

    Ok(ProbeResponse {
        players_online: players.online,
        players_max: players.max,
        version: doc.version.map(|v| v.name),
        latency,
        favicon: doc.favicon,
    })
}

pub fn encode_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7f == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
}

/// Decode a VarInt from the front of `bytes`, returning it and the number
/// of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(i32, usize), ProbeError> {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().take(5).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
    }
    if bytes.len() < 5 {
        Err(ProbeError::protocol("truncated varint"))
    } else {
        Err(ProbeError::protocol("varint longer than 5 bytes"))
    }
}

async fn read_varint<R>(reader: &mut R) -> Result<i32, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::protocol("varint longer than 5 bytes"))
}
