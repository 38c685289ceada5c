//! Bedrock Edition unconnected ping (RakNet).
//!
//! Request: `0x01`, client time (u64), offline magic, client GUID (u64).
//! Reply: `0x1c`, time, server GUID, magic, u16 length, then a
//! `;`-separated status string:
//! `MCPE;<motd>;<protocol>;<version>;<online>;<max>;<server id>;...`

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::{lookup_host, UdpSocket};

use super::{ProbeError, ProbeResponse};

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1c;

const OFFLINE_MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

const CLIENT_GUID: u64 = 0x6d69_6e65_7761_7463;

// id + time + guid + magic + string length
const PONG_HEADER_LEN: usize = 1 + 8 + 8 + 16 + 2;

/// Fields of a pong status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedrockPong {
    pub motd: String,
    pub version: String,
    pub players_online: u64,
    pub players_max: Option<u64>,
}

pub(super) async fn ping(host: &str, port: u16) -> Result<ProbeResponse, ProbeError> {
    let addr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ProbeError::protocol(format!("{host} did not resolve")))?;
    let local: SocketAddr = if addr.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;

    let started = Instant::now();
    let time_ms = minewatch_types::current_timestamp_ms();
    socket.send(&ping_packet(time_ms, CLIENT_GUID)).await?;

    let mut buf = [0u8; 1500];
    let n = socket.recv(&mut buf).await?;
    let latency = started.elapsed();

    let pong = parse_pong(&buf[..n])?;
    Ok(ProbeResponse {
        players_online: pong.players_online,
        players_max: pong.players_max,
        version: Some(pong.version).filter(|v| !v.is_empty()),
        latency,
        favicon: None,
    })
}

/// Build an unconnected ping datagram.
pub fn ping_packet(time_ms: u64, guid: u64) -> Vec<u8> {
    let mut packet = Vec::with_capacity(33);
    packet.push(UNCONNECTED_PING);
    packet.extend_from_slice(&time_ms.to_be_bytes());
    packet.extend_from_slice(&OFFLINE_MAGIC);
    packet.extend_from_slice(&guid.to_be_bytes());
    packet
}

/// Parse an unconnected pong datagram.
pub fn parse_pong(datagram: &[u8]) -> Result<BedrockPong, ProbeError> {
    if datagram.len() < PONG_HEADER_LEN {
        return Err(ProbeError::protocol("pong too short"));
    }
    if datagram[0] != UNCONNECTED_PONG {
        return Err(ProbeError::protocol(format!(
            "expected unconnected pong, got packet {:#04x}",
            datagram[0]
        )));
    }
    if datagram[17..33] != OFFLINE_MAGIC {
        return Err(ProbeError::protocol("bad offline magic"));
    }

    let len = u16::from_be_bytes([datagram[33], datagram[34]]) as usize;
    let status = datagram
        .get(PONG_HEADER_LEN..PONG_HEADER_LEN + len)
        .ok_or_else(|| ProbeError::protocol("status string overruns datagram"))?;
    let status = String::from_utf8_lossy(status);

    let fields: Vec<&str> = status.split(';').collect();
    if fields.len() < 6 {
        return Err(ProbeError::protocol(format!(
            "status has {} fields, expected at least 6",
            fields.len()
        )));
    }
    let players_online = fields[4]
        .trim()
        .parse()
        .map_err(|_| ProbeError::protocol(format!("bad player count `{}`", fields[4])))?;

    Ok(BedrockPong {
        motd: fields[1].to_string(),
        version: fields[3].to_string(),
        players_online,
        players_max: fields[5].trim().parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(status: &str) -> Vec<u8> {
        let mut packet = vec![UNCONNECTED_PONG];
        packet.extend_from_slice(&42u64.to_be_bytes());
        packet.extend_from_slice(&7u64.to_be_bytes());
        packet.extend_from_slice(&OFFLINE_MAGIC);
        packet.extend_from_slice(&(status.len() as u16).to_be_bytes());
        packet.extend_from_slice(status.as_bytes());
        packet
    }

    #[test]
    fn ping_layout() {
        let packet = ping_packet(0x0102_0304_0506_0708, CLIENT_GUID);
        assert_eq!(packet.len(), 33);
        assert_eq!(packet[0], UNCONNECTED_PING);
        assert_eq!(&packet[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&packet[9..25], &OFFLINE_MAGIC);
        assert_eq!(&packet[25..33], &CLIENT_GUID.to_be_bytes());
    }

    #[test]
    fn parses_status_string() {
        let datagram =
            pong("MCPE;Dedicated Server;712;1.21.20;3;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;");
        let parsed = parse_pong(&datagram).unwrap();
        assert_eq!(parsed.motd, "Dedicated Server");
        assert_eq!(parsed.version, "1.21.20");
        assert_eq!(parsed.players_online, 3);
        assert_eq!(parsed.players_max, Some(10));
    }

    #[test]
    fn rejects_malformed_pongs() {
        assert!(parse_pong(&[UNCONNECTED_PONG; 10]).is_err());

        let mut wrong_id = pong("MCPE;m;1;v;1;2");
        wrong_id[0] = 0x1d;
        assert!(parse_pong(&wrong_id).is_err());

        assert!(parse_pong(&pong("MCPE;too;short")).is_err());
        assert!(parse_pong(&pong("MCPE;m;1;v;many;2")).is_err());

        let mut truncated = pong("MCPE;m;1;v;1;2");
        truncated.truncate(truncated.len() - 3);
        assert!(parse_pong(&truncated).is_err());
    }

    #[tokio::test]
    async fn pings_a_fake_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, 33);
            assert_eq!(buf[0], UNCONNECTED_PING);
            let reply = pong("MCPE;Test;712;1.21.20;5;20;1;world;Survival;1;19132;19133;");
            server.send_to(&reply, peer).await.unwrap();
        });

        let response = ping("127.0.0.1", port).await.unwrap();
        assert_eq!(response.players_online, 5);
        assert_eq!(response.players_max, Some(20));
        assert_eq!(response.version.as_deref(), Some("1.21.20"));
        responder.await.unwrap();
    }
}
