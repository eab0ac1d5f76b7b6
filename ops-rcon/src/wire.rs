//! Source-engine-style length-prefixed RCON framing: a little-endian i32
//! size, followed by a little-endian i32 request id, a little-endian i32
//! packet type, a null-terminated ASCII body, and a trailing null byte.

use ops_api::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

pub struct Packet {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

fn encode(id: i32, packet_type: i32, body: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 10);
    payload.extend_from_slice(&id.to_le_bytes());
    payload.extend_from_slice(&packet_type.to_le_bytes());
    payload.extend_from_slice(body.as_bytes());
    payload.push(0);
    payload.push(0);

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame
}

pub async fn write_packet(stream: &mut TcpStream, id: i32, packet_type: i32, body: &str) -> Result<()> {
    let frame = encode(id, packet_type, body);
    stream
        .write_all(&frame)
        .await
        .map_err(|e| Error::TransientTransport(e.to_string()))
}

pub async fn read_packet(stream: &mut TcpStream) -> Result<Packet> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::TransientTransport(e.to_string()))?;
    let len = i32::from_le_bytes(len_buf);
    if len < 10 || len > 16 * 1024 * 1024 {
        return Err(Error::TransientTransport(format!(
            "implausible rcon packet length: {len}"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::TransientTransport(e.to_string()))?;

    let id = i32::from_le_bytes(payload[0..4].try_into().unwrap());
    let packet_type = i32::from_le_bytes(payload[4..8].try_into().unwrap());
    let body_bytes = &payload[8..payload.len().saturating_sub(2)];
    let body = String::from_utf8_lossy(body_bytes).into_owned();

    Ok(Packet {
        id,
        packet_type,
        body,
    })
}

pub async fn auth(stream: &mut TcpStream, password: &str) -> Result<()> {
    write_packet(stream, 1, SERVERDATA_AUTH, password).await?;
    let resp = read_packet(stream).await?;
    if resp.packet_type == SERVERDATA_AUTH_RESPONSE && resp.id != -1 {
        Ok(())
    } else {
        Err(Error::TransientTransport("rcon authentication rejected".into()))
    }
}

pub async fn exec(stream: &mut TcpStream, cmd: &str) -> Result<String> {
    write_packet(stream, 2, SERVERDATA_EXECCOMMAND, cmd).await?;
    let resp = read_packet(stream).await?;
    if resp.packet_type == SERVERDATA_RESPONSE_VALUE {
        Ok(resp.body)
    } else {
        Err(Error::TransientTransport(format!(
            "unexpected rcon response type: {}",
            resp.packet_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn auth_and_exec_roundtrip_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let auth_req = read_packet(&mut sock).await.unwrap();
            assert_eq!(auth_req.packet_type, SERVERDATA_AUTH);
            assert_eq!(auth_req.body, "hunter2");
            write_packet(&mut sock, auth_req.id, SERVERDATA_AUTH_RESPONSE, "")
                .await
                .unwrap();

            let cmd_req = read_packet(&mut sock).await.unwrap();
            assert_eq!(cmd_req.body, "ListPlayers");
            write_packet(&mut sock, cmd_req.id, SERVERDATA_RESPONSE_VALUE, "0|Alice|-|-|steam:alice")
                .await
                .unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        auth(&mut client, "hunter2").await.unwrap();
        let body = exec(&mut client, "ListPlayers").await.unwrap();
        assert_eq!(body, "0|Alice|-|-|steam:alice");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_auth_surfaces_as_transient_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_packet(&mut sock).await.unwrap();
            write_packet(&mut sock, -1, SERVERDATA_AUTH_RESPONSE, "").await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let result = auth(&mut client, "wrong").await;
        assert!(matches!(result, Err(Error::TransientTransport(_))));

        server.await.unwrap();
    }
}
