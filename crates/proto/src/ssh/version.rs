//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! The SSH protocol begins with a version exchange where both client and server
//! send an identification string:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The server may send other lines first. They are collected as banner lines,
//! up to a configured limit.
//!
//! # Security
//!
//! - Maximum line length: 255 characters
//! - Must start with "SSH-2.0-" or "SSH-1.99-"
//! - No null bytes allowed in version string
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::version::Version;
//!
//! let version = Version::new("Conduit_0.1.0", None);
//! assert_eq!(version.to_string(), "SSH-2.0-Conduit_0.1.0");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_8.9").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_8.9");
//! ```

use conduit_platform::{ConduitError, ConduitResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum length of SSH version string (RFC 4253 Section 4.2).
pub const MAX_VERSION_LENGTH: usize = 255;

/// SSH protocol version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Protocol version (e.g., "2.0")
    proto_version: String,
    /// Software version (e.g., "Conduit_0.1.0")
    software_version: String,
    /// Optional comments
    comments: Option<String>,
}

impl Version {
    /// Creates a version with protocol "2.0".
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// Parses an SSH version string (with or without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::ProtocolFormat`] if:
    /// - Line is too long (> 255 characters)
    /// - Line doesn't start with "SSH-"
    /// - Protocol version is not "2.0" or "1.99"
    /// - Line contains null bytes
    pub fn parse(line: &str) -> ConduitResult<Self> {
        let line = line.trim_end_matches("\r\n").trim_end_matches('\n');

        if line.len() > MAX_VERSION_LENGTH {
            return Err(ConduitError::ProtocolFormat(format!(
                "Version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(ConduitError::ProtocolFormat(
                "Version string contains null byte".to_string(),
            ));
        }

        if !line.starts_with("SSH-") {
            return Err(ConduitError::ProtocolFormat(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            )));
        }

        // SSH-protoversion-softwareversion[ comments]
        let parts: Vec<&str> = line.splitn(3, '-').collect();
        if parts.len() < 3 || parts[2].is_empty() {
            return Err(ConduitError::ProtocolFormat(format!(
                "Invalid version string format: '{}'",
                line
            )));
        }

        let proto_version = parts[1];
        let rest = parts[2];

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(ConduitError::ProtocolFormat(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software.to_string(), Some(comments.trim().to_string())),
            None => (rest.to_string(), None),
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version,
            comments,
        })
    }

    /// Returns the protocol version (e.g., "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

/// What the server sent before the binary protocol starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentification {
    /// Parsed version
    pub version: Version,
    /// Identification line exactly as received, without CR LF (`V_S`)
    pub line: String,
    /// Lines received before the identification line
    pub banners: Vec<String>,
}

/// Reads one line terminated by LF, stripping CR LF. Reads a byte at a time
/// so nothing past the line is consumed.
async fn read_line<R>(reader: &mut R) -> ConduitResult<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = reader.read_u8().await.map_err(ConduitError::from)?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() > MAX_VERSION_LENGTH {
            return Err(ConduitError::ProtocolFormat(format!(
                "Identification line exceeds {} bytes",
                MAX_VERSION_LENGTH
            )));
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| ConduitError::ProtocolFormat("Identification line is not UTF-8".to_string()))
}

/// Sends our identification and reads the server's, skipping at most
/// `max_banner_lines` lines that do not start with "SSH-".
pub async fn exchange_versions<S>(
    stream: &mut S,
    ours: &Version,
    max_banner_lines: usize,
) -> ConduitResult<ServerIdentification>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&ours.to_wire_format()).await?;
    stream.flush().await?;

    let mut banners = Vec::new();
    loop {
        let line = read_line(stream).await?;
        if line.starts_with("SSH-") {
            let version = Version::parse(&line)?;
            debug!(server = %line, banner_lines = banners.len(), "version exchange complete");
            return Ok(ServerIdentification {
                version,
                line,
                banners,
            });
        }
        if banners.len() >= max_banner_lines {
            return Err(ConduitError::ProtocolFormat(format!(
                "No identification line within {} banner lines",
                max_banner_lines
            )));
        }
        banners.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_new() {
        let version = Version::new("Conduit_0.1.0", None);
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "Conduit_0.1.0");
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_parse_with_comments() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9 Ubuntu-3ubuntu0.1").unwrap();
        assert_eq!(version.software(), "OpenSSH_8.9");
        assert_eq!(version.comments(), Some("Ubuntu-3ubuntu0.1"));
    }

    #[test]
    fn test_version_parse_with_crlf() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9\r\n").unwrap();
        assert_eq!(version.software(), "OpenSSH_8.9");
    }

    #[test]
    fn test_version_parse_accepts_1_99() {
        assert_eq!(Version::parse("SSH-1.99-Old").unwrap().proto_version(), "1.99");
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!(matches!(
            Version::parse("INVALID-2.0-Test"),
            Err(ConduitError::ProtocolFormat(_))
        ));
        match Version::parse("SSH-1.0-OldClient") {
            Err(ConduitError::ProtocolFormat(msg)) => {
                assert!(msg.contains("Unsupported protocol version"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Version::parse(&format!("SSH-2.0-{}", "A".repeat(300))).is_err());
        assert!(Version::parse("SSH-2.0-Test\0Bad").is_err());
        assert!(Version::parse("SSH-2.0-").is_err());
    }

    #[test]
    fn test_version_wire_format() {
        let version = Version::new("Conduit_0.1.0", None);
        assert_eq!(version.to_wire_format(), b"SSH-2.0-Conduit_0.1.0\r\n");
    }

    #[tokio::test]
    async fn test_exchange_skips_banner_lines() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"Welcome to the lab\r\nauthorized use only\r\nSSH-2.0-OpenSSH_9.6\r\n\x00\x00")
            .await
            .unwrap();

        let ours = Version::new("Conduit_test", None);
        let ident = exchange_versions(&mut client, &ours, 4).await.unwrap();
        assert_eq!(ident.line, "SSH-2.0-OpenSSH_9.6");
        assert_eq!(ident.banners, vec!["Welcome to the lab", "authorized use only"]);

        let mut sent = vec![0u8; ours.to_wire_format().len()];
        server.read_exact(&mut sent).await.unwrap();
        assert_eq!(sent, ours.to_wire_format());

        // binary data after the identification line is left unread
        assert_eq!(client.read_u8().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exchange_banner_limit() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"one\r\ntwo\r\nthree\r\n").await.unwrap();
        let result = exchange_versions(&mut client, &Version::new("c", None), 2).await;
        assert!(matches!(result, Err(ConduitError::ProtocolFormat(_))));
    }

    #[tokio::test]
    async fn test_exchange_eof_is_io_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        drop(server);
        let result = exchange_versions(&mut client, &Version::new("c", None), 2).await;
        assert!(result.is_err());
    }
}
