//! FTP transport
//!
//! Just enough of RFC 959 to retrieve one file: login, binary type, passive
//! data connection, `RETR`. `SIZE` supplies the total when the server
//! supports it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{codes, Stream};
use crate::config::defaults;
use crate::core::url::InstallUrl;
use crate::error::FetchError;

const DEFAULT_PORT: u16 = 21;

/// A server reply: code and text of the last line
#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        (100..400).contains(&self.code)
    }
}

/// Control connection
struct Control {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Control {
    fn connect(addr: SocketAddr) -> io::Result<Self> {
        let timeout = Duration::from_secs(defaults::FTP_TIMEOUT_SECS);
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Read one (possibly multi-line) reply
    fn reply(&mut self) -> Result<Reply, FetchError> {
        let mut line = String::new();
        let mut first_code: Option<String> = None;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .map_err(|e| super::read_error(&e))?;
            if n == 0 {
                return Err(protocol_error("connection closed by server"));
            }
            let line = line.trim_end();
            if line.len() < 3 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
                if first_code.is_some() {
                    continue;
                }
                return Err(protocol_error(&format!("bad reply '{line}'")));
            }

            let code = &line[..3];
            let sep = line.as_bytes().get(3).copied();
            match &first_code {
                None if sep == Some(b'-') => first_code = Some(code.to_string()),
                Some(first) if first != code || sep == Some(b'-') => {}
                _ => {
                    return Ok(Reply {
                        code: code.parse().unwrap_or(0),
                        text: line.get(4..).unwrap_or("").to_string(),
                    })
                }
            }
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Reply, FetchError> {
        self.writer
            .write_all(format!("{cmd}\r\n").as_bytes())
            .map_err(|e| super::read_error(&e))?;
        self.reply()
    }
}

fn protocol_error(message: &str) -> FetchError {
    FetchError::transport(codes::WEIRD_SERVER_REPLY, format!("FTP: {message}"))
}

/// Reader over the data connection that checks the final transfer reply
struct FtpReader {
    data: TcpStream,
    control: Control,
    done: bool,
}

impl Read for FtpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.data.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.done = true;
            let reply = self
                .control
                .reply()
                .map_err(io::Error::other)?;
            if !reply.is_positive() {
                return Err(io::Error::other(format!(
                    "FTP transfer failed: {} {}",
                    reply.code, reply.text
                )));
            }
        }
        Ok(n)
    }
}

/// Parse `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
fn parse_pasv(text: &str) -> Option<SocketAddr> {
    let start = text.find('(')? + 1;
    let end = start + text[start..].find(')')?;
    let parts: Vec<u8> = text[start..end]
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    if parts.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = (u16::from(parts[4]) << 8) | u16::from(parts[5]);
    Some(SocketAddr::from((ip, port)))
}

fn resolve(server: &str, port: u16) -> Result<SocketAddr, FetchError> {
    (server, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| {
            FetchError::transport(
                codes::COULDNT_RESOLVE_HOST,
                format!("Could not resolve host: {server}"),
            )
        })
}

/// Log in and start retrieving the file named by `url`
pub fn open(url: &InstallUrl) -> Result<Stream, FetchError> {
    let server = url.server.as_deref().unwrap_or("");
    let addr = resolve(server, url.port.unwrap_or(DEFAULT_PORT))?;

    let mut control = Control::connect(addr).map_err(|e| {
        FetchError::transport(
            codes::COULDNT_CONNECT,
            format!("Failed to connect to {server}: {e}"),
        )
    })?;

    let greeting = control.reply()?;
    if greeting.code != 220 {
        return Err(protocol_error(&format!("unexpected greeting {}", greeting.code)));
    }

    let user = url.user.as_deref().unwrap_or("anonymous");
    let mut reply = control.command(&format!("USER {user}"))?;
    if reply.code == 331 {
        let password = url.password.as_deref().unwrap_or("insturl@");
        reply = control.command(&format!("PASS {password}"))?;
    }
    if !(200..300).contains(&reply.code) {
        return Err(FetchError::transport(
            codes::LOGIN_DENIED,
            format!("Access denied: {} {}", reply.code, reply.text),
        ));
    }

    let reply = control.command("TYPE I")?;
    if reply.code != 200 {
        return Err(protocol_error(&format!("TYPE I failed: {}", reply.text)));
    }

    let path = url.path.as_deref().unwrap_or("");
    let reply = control.command(&format!("SIZE {path}"))?;
    let total = (reply.code == 213)
        .then(|| reply.text.trim().parse().ok())
        .flatten();

    let reply = control.command("PASV")?;
    let data_addr = (reply.code == 227)
        .then(|| parse_pasv(&reply.text))
        .flatten()
        .ok_or_else(|| protocol_error(&format!("PASV failed: {}", reply.text)))?;

    let data = TcpStream::connect_timeout(
        &data_addr,
        Duration::from_secs(defaults::FTP_TIMEOUT_SECS),
    )
    .map_err(|e| {
        FetchError::transport(
            codes::COULDNT_CONNECT,
            format!("Failed to connect data channel: {e}"),
        )
    })?;

    let reply = control.command(&format!("RETR {path}"))?;
    if reply.code != 150 && reply.code != 125 {
        return Err(FetchError::transport(
            codes::REMOTE_FILE_NOT_FOUND,
            format!("RETR {path}: {} {}", reply.code, reply.text),
        ));
    }

    Ok(Stream {
        total,
        reader: Box::new(FtpReader {
            data,
            control,
            done: false,
        }),
    })
}
