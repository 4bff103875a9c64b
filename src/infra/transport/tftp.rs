//! TFTP transport
//!
//! RFC 1350 read request in octet mode. Blocks are acknowledged as they are
//! consumed; a lost packet is answered by resending the last request or ACK.

use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::{codes, Stream};
use crate::config::defaults;
use crate::core::url::InstallUrl;
use crate::error::FetchError;

const DEFAULT_PORT: u16 = 69;
const BLOCK_SIZE: usize = 512;

mod opcode {
    pub const RRQ: u16 = 1;
    pub const DATA: u16 = 3;
    pub const ACK: u16 = 4;
    pub const ERROR: u16 = 5;
}

fn read_request(path: &str) -> Vec<u8> {
    let mut packet = opcode::RRQ.to_be_bytes().to_vec();
    packet.extend_from_slice(path.as_bytes());
    packet.push(0);
    packet.extend_from_slice(b"octet");
    packet.push(0);
    packet
}

fn ack(block: u16) -> Vec<u8> {
    let mut packet = opcode::ACK.to_be_bytes().to_vec();
    packet.extend_from_slice(&block.to_be_bytes());
    packet
}

/// Map a TFTP ERROR packet onto a transport error
fn remote_error(packet: &[u8]) -> FetchError {
    let code = packet
        .get(2..4)
        .map_or(0, |b| u16::from_be_bytes([b[0], b[1]]));
    let text = packet.get(4..).unwrap_or_default();
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    let text = String::from_utf8_lossy(&text[..end]);

    let (curl_code, what) = match code {
        1 => (codes::TFTP_NOTFOUND, "File not found"),
        2 => (codes::TFTP_PERM, "Access violation"),
        _ => (codes::TFTP_ILLEGAL, "TFTP error"),
    };
    FetchError::transport(curl_code, format!("{what}: {text}"))
}

struct TftpReader {
    socket: UdpSocket,
    server: SocketAddr,
    /// Transfer ID of the server, fixed by its first DATA packet
    peer: Option<SocketAddr>,
    /// Last block received
    block: u16,
    /// Packet to resend on timeout
    last_sent: Vec<u8>,
    data: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl TftpReader {
    fn send(&mut self, packet: Vec<u8>) -> Result<(), FetchError> {
        let target = self.peer.unwrap_or(self.server);
        self.socket
            .send_to(&packet, target)
            .map_err(|e| super::read_error(&e))?;
        self.last_sent = packet;
        Ok(())
    }

    fn resend(&self) -> Result<(), FetchError> {
        let target = self.peer.unwrap_or(self.server);
        self.socket
            .send_to(&self.last_sent, target)
            .map(drop)
            .map_err(|e| super::read_error(&e))
    }

    /// Wait for the next DATA block and acknowledge it
    fn next_block(&mut self) -> Result<(), FetchError> {
        let mut packet = [0u8; 4 + BLOCK_SIZE];
        let mut timeouts = 0;

        loop {
            let (len, from) = match self.socket.recv_from(&mut packet) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    timeouts += 1;
                    if timeouts > defaults::TFTP_RETRIES {
                        return Err(FetchError::transport(
                            codes::OPERATION_TIMEDOUT,
                            format!("TFTP: no answer from {}", self.server),
                        ));
                    }
                    tracing::debug!(block = self.block, "tftp timeout, resending");
                    self.resend()?;
                    continue;
                }
                Err(e) => return Err(super::read_error(&e)),
            };

            match self.peer {
                Some(peer) if peer != from => continue,
                None if from.ip() != self.server.ip() => continue,
                _ => {}
            }

            let packet = &packet[..len];
            if len < 4 {
                return Err(FetchError::transport(
                    codes::TFTP_ILLEGAL,
                    "TFTP: short packet",
                ));
            }
            let op = u16::from_be_bytes([packet[0], packet[1]]);
            let block = u16::from_be_bytes([packet[2], packet[3]]);

            match op {
                opcode::DATA if block == self.block.wrapping_add(1) => {
                    self.peer = Some(from);
                    self.block = block;
                    self.data.clear();
                    self.data.extend_from_slice(&packet[4..]);
                    self.pos = 0;
                    self.finished = packet.len() - 4 < BLOCK_SIZE;
                    return self.send(ack(block));
                }
                opcode::DATA if block == self.block => self.resend()?,
                opcode::DATA => {}
                opcode::ERROR => return Err(remote_error(packet)),
                _ => {
                    return Err(FetchError::transport(
                        codes::TFTP_ILLEGAL,
                        format!("TFTP: unexpected opcode {op}"),
                    ))
                }
            }
        }
    }
}

impl Read for TftpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.data.len() {
            if self.finished {
                return Ok(0);
            }
            self.next_block().map_err(io::Error::other)?;
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Request the file named by `url` and wait for its first block
pub fn open(url: &InstallUrl) -> Result<Stream, FetchError> {
    let server_name = url.server.as_deref().unwrap_or("");
    let server = (server_name, url.port.unwrap_or(DEFAULT_PORT))
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| {
            FetchError::transport(
                codes::COULDNT_RESOLVE_HOST,
                format!("Could not resolve host: {server_name}"),
            )
        })?;

    let local: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local)
        .and_then(|socket| {
            socket.set_read_timeout(Some(Duration::from_secs(defaults::TFTP_TIMEOUT_SECS)))?;
            Ok(socket)
        })
        .map_err(|e| FetchError::transport(codes::COULDNT_CONNECT, e.to_string()))?;

    let mut reader = TftpReader {
        socket,
        server,
        peer: None,
        block: 0,
        last_sent: Vec::new(),
        data: Vec::new(),
        pos: 0,
        finished: false,
    };

    let path = url.path.as_deref().unwrap_or("");
    reader.send(read_request(path))?;
    reader.next_block()?;

    Ok(Stream {
        total: None,
        reader: Box::new(reader),
    })
}
