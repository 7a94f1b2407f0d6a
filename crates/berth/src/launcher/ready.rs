//! Ready-signal detection on launcher stdout.
//!
//! A starting server announces its bound address with a line like
//! `opencode server listening on http://127.0.0.1:54321`. The supervisor
//! feeds stdout lines through a [`ReadySignalDetector`]; the first match
//! yields the address used for the initialize handshake.

use once_cell::sync::Lazy;
use regex::Regex;

/// Address a launcher announced once its server socket was bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Detects the "server listening" announcement on a stdout line.
///
/// Consulted line by line while a workspace is starting; the first `Some`
/// wins and later lines are ignored. Launchers with a different
/// announcement format only need a different implementation here.
pub trait ReadySignalDetector: Send + Sync {
    fn detect(&self, line: &str) -> Option<ServerAddr>;
}

static LISTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)server\s+listening\s+on\s+(?:https?://)?(?:\[(?P<v6>[^\]]+)\]|(?P<host>[^\s:/]+)):(?P<port>\d{1,5})\b",
    )
    .expect("listen pattern must compile")
});

/// Default detector for the opencode `serve` announcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenLineDetector;

impl ReadySignalDetector for ListenLineDetector {
    fn detect(&self, line: &str) -> Option<ServerAddr> {
        let caps = LISTEN_RE.captures(line)?;
        let host = caps
            .name("v6")
            .or_else(|| caps.name("host"))?
            .as_str()
            .to_string();
        let port: u16 = caps.name("port")?.as_str().parse().ok()?;
        if port == 0 {
            return None;
        }
        Some(ServerAddr { host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(line: &str) -> Option<ServerAddr> {
        ListenLineDetector.detect(line)
    }

    #[test]
    fn test_detects_opencode_announcement() {
        let addr = detect("opencode server listening on http://127.0.0.1:54321").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 54321);
        assert_eq!(addr.base_url(), "http://127.0.0.1:54321");
    }

    #[test]
    fn test_detects_without_scheme() {
        let addr = detect("server listening on 0.0.0.0:4096").unwrap();
        assert_eq!(addr.host, "0.0.0.0");
        assert_eq!(addr.port, 4096);
    }

    #[test]
    fn test_detects_hostname_and_mixed_case() {
        let addr = detect("Server Listening On https://localhost:8080 (ready)").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8080);
    }

    #[test]
    fn test_detects_bracketed_ipv6() {
        let addr = detect("server listening on http://[::1]:9100").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 9100);
        assert_eq!(addr.base_url(), "http://[::1]:9100");
    }

    #[test]
    fn test_rejects_unrelated_lines() {
        assert!(detect("starting opencode v0.4.2").is_none());
        assert!(detect("listening for file changes").is_none());
        assert!(detect("").is_none());
    }

    #[test]
    fn test_rejects_invalid_ports() {
        assert!(detect("server listening on 127.0.0.1:0").is_none());
        assert!(detect("server listening on 127.0.0.1:99999").is_none());
        assert!(detect("server listening on 127.0.0.1:543210").is_none());
    }
}
