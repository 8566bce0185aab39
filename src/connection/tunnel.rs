//! Dialing and Proxy Tunnels
//!
//! Opens the TCP connection for a single candidate route: straight to the
//! target, or to a proxy followed by a SOCKS5 or HTTP CONNECT negotiation.

use std::borrow::Cow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use anyhow::{anyhow, Context};
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::protocol::TargetAddr;
use crate::routing::ProxyEndpoint;
use crate::Result;

/// Upper bound on an HTTP CONNECT response header block
const MAX_HTTP_RESPONSE_HEADER: usize = 8192;

/// Connect to `host:port`, trying every resolved address in order
pub async fn dial(host: &TargetAddr, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let addrs = resolve(host, port, connect_timeout).await?;

    let mut last_error = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("Connected to {}", addr);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e);
            }
            Err(_) => {
                debug!("Timed out connecting to {}", addr);
                last_error = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {} timed out after {:?}", addr, connect_timeout),
                ));
            }
        }
    }

    let e = last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
    });
    Err(anyhow::Error::new(e)
        .context(format!("Failed to connect to {}:{}", host.host_for_authority(), port)))
}

/// Resolve target address to socket addresses
async fn resolve(host: &TargetAddr, port: u16, lookup_timeout: Duration) -> Result<Vec<SocketAddr>> {
    if let Some(ip) = host.ip() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let authority = format!("{}:{}", host, port);
    debug!("Resolving {}", authority);

    let addrs = timeout(lookup_timeout, lookup_host(authority.as_str()))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "DNS lookup timed out"))
        .and_then(|result| result)
        .with_context(|| format!("Failed to resolve {}", authority))?;

    Ok(addrs.collect())
}

/// Negotiate a SOCKS5 CONNECT to `target:port` on a stream connected to `proxy`.
///
/// Domain targets are passed to the proxy unresolved.
pub async fn socks5_tunnel(
    stream: TcpStream,
    proxy: &ProxyEndpoint,
    target: &TargetAddr,
    port: u16,
) -> Result<TcpStream> {
    debug!("Opening SOCKS5 tunnel via {} to {}:{}", proxy, target.host_for_authority(), port);

    let dest = socks_target(target, port);
    let tunnel = match proxy.auth() {
        Some(auth) => {
            Socks5Stream::connect_with_password_and_socket(
                stream,
                dest,
                &auth.username,
                &auth.password,
            )
            .await
        }
        None => Socks5Stream::connect_with_socket(stream, dest).await,
    }
    .with_context(|| format!("SOCKS5 negotiation with {} failed", proxy))?;

    Ok(tunnel.into_inner())
}

fn socks_target(target: &TargetAddr, port: u16) -> tokio_socks::TargetAddr<'_> {
    match target {
        TargetAddr::Ipv4(ip) => tokio_socks::TargetAddr::Ip(SocketAddr::new(IpAddr::V4(*ip), port)),
        TargetAddr::Ipv6(ip) => tokio_socks::TargetAddr::Ip(SocketAddr::new(IpAddr::V6(*ip), port)),
        TargetAddr::Domain(domain) => tokio_socks::TargetAddr::Domain(Cow::Borrowed(domain), port),
    }
}

/// Issue an HTTP CONNECT for `target:port` on a stream connected to `proxy`
pub async fn http_tunnel<S>(
    mut stream: S,
    proxy: &ProxyEndpoint,
    target: &TargetAddr,
    port: u16,
) -> Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = format!("{}:{}", target.host_for_authority(), port);
    debug!("Opening HTTP CONNECT tunnel via {} to {}", proxy, authority);

    let mut request = format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\n",
        authority, authority
    );

    if let Some(auth) = proxy.auth() {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", credentials));
    }

    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await
        .with_context(|| format!("Failed to send CONNECT to {}", proxy))?;

    let header = read_response_header(&mut stream).await
        .with_context(|| format!("Failed to read CONNECT response from {}", proxy))?;

    let status_line = header.lines().next().unwrap_or_default();
    let status = parse_status_code(status_line)
        .ok_or_else(|| anyhow!("Malformed HTTP proxy response: {}", status_line))?;

    if !(200..300).contains(&status) {
        return Err(anyhow!(
            "HTTP proxy {} refused CONNECT to {}: {}",
            proxy, authority, status_line
        ));
    }

    Ok(stream)
}

/// Read up to and including the blank line ending the header block.
///
/// Reads byte by byte so no tunnelled payload is consumed.
async fn read_response_header<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut header = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_HTTP_RESPONSE_HEADER {
            return Err(anyhow!("HTTP response header exceeds {} bytes", MAX_HTTP_RESPONSE_HEADER));
        }

        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(anyhow!(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed the connection during CONNECT",
            )));
        }
        header.push(byte[0]);
    }

    Ok(String::from_utf8_lossy(&header).into_owned())
}

fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}
