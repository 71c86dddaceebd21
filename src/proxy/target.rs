//! Request line and destination parsing

use crate::error::{Error, Result};
use std::fmt;
use url::{Host, Url};

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// `METHOD target [version]` as sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: Option<String>,
}

impl RequestLine {
    /// Split a request line on whitespace. Method and target are required.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let (Some(method), Some(target)) = (tokens.next(), tokens.next()) else {
            return Err(Error::MalformedRequest(format!(
                "expected `METHOD target`, got {:?}",
                line
            )));
        };

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: tokens.next().map(str::to_string),
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }
}

/// Destination host and port derived from a request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAuthority {
    /// Hostname or IP literal, without IPv6 brackets
    pub host: String,
    pub port: u16,
}

impl TargetAuthority {
    pub fn for_request(request: &RequestLine) -> Result<Self> {
        if request.is_connect() {
            Self::from_connect_target(&request.target)
        } else {
            Self::from_http_target(&request.target)
        }
    }

    /// Parse an absolute-form target. A missing scheme means `http`, and a
    /// missing port means 80 whatever the scheme says.
    pub fn from_http_target(target: &str) -> Result<Self> {
        if target.starts_with('/') {
            return Err(Error::MalformedRequest(format!(
                "origin-form target {:?} names no host",
                target
            )));
        }

        let absolute = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{}", target)
        };
        let url = Url::parse(&absolute)?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        };
        if host.is_empty() {
            return Err(Error::MalformedRequest(format!("target {:?} has no host", target)));
        }

        Ok(Self {
            host,
            port: url.port().or_else(|| explicit_port(&absolute)).unwrap_or(DEFAULT_HTTP_PORT),
        })
    }

    /// Parse a CONNECT `host[:port]` target, defaulting to port 443
    pub fn from_connect_target(target: &str) -> Result<Self> {
        let (host, port) = split_host_port(target)?;
        if host.is_empty() {
            return Err(Error::MalformedRequest(format!("CONNECT target {:?} has no host", target)));
        }

        let port = match port {
            Some(port) if !port.is_empty() => port.parse::<u16>().map_err(|_| {
                Error::MalformedRequest(format!("invalid port in CONNECT target {:?}", target))
            })?,
            _ => DEFAULT_CONNECT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TargetAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Port written in an absolute URL, including one that `Url` normalises away
/// because it equals the scheme default
fn explicit_port(absolute: &str) -> Option<u16> {
    let (_, rest) = absolute.split_once("://")?;
    let authority = rest.split(|c: char| matches!(c, '/' | '?' | '#')).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let (_, port) = split_host_port(authority).ok()?;
    port?.parse().ok()
}

fn split_host_port(authority: &str) -> Result<(&str, Option<&str>)> {
    let malformed = || Error::MalformedRequest(format!("invalid authority {:?}", authority));

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(malformed)?;
        return match after {
            "" => Ok((host, None)),
            _ => after
                .strip_prefix(':')
                .map(|port| (host, Some(port)))
                .ok_or_else(malformed),
        };
    }

    match authority.split_once(':') {
        Some((_, port)) if port.contains(':') => Err(malformed()),
        Some((host, port)) => Ok((host, Some(port))),
        None => Ok((authority, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let line = RequestLine::parse("GET http://example.com/ HTTP/1.1").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.target, "http://example.com/");
        assert_eq!(line.version.as_deref(), Some("HTTP/1.1"));
        assert!(!line.is_connect());

        let line = RequestLine::parse("CONNECT example.com:443").unwrap();
        assert!(line.is_connect());
        assert_eq!(line.version, None);
    }

    #[test]
    fn test_request_line_needs_two_tokens() {
        assert!(RequestLine::parse("GET").unwrap_err().is_malformed());
        assert!(RequestLine::parse("").unwrap_err().is_malformed());
        assert!(RequestLine::parse("   ").unwrap_err().is_malformed());
    }

    #[test]
    fn test_http_target_defaults() {
        let authority = TargetAuthority::from_http_target("http://example.com/path?q=1").unwrap();
        assert_eq!(authority, TargetAuthority { host: "example.com".into(), port: 80 });

        let authority = TargetAuthority::from_http_target("example.com:8081/x").unwrap();
        assert_eq!(authority.port, 8081);

        let authority = TargetAuthority::from_http_target("http://[::1]:9000/").unwrap();
        assert_eq!(authority.host, "::1");
        assert_eq!(authority.address(), "[::1]:9000");
    }

    #[test]
    fn test_http_target_ignores_scheme_default_port() {
        let authority = TargetAuthority::from_http_target("https://example.com/").unwrap();
        assert_eq!(authority.port, 80);

        let authority = TargetAuthority::from_http_target("ftp://files.example.com/pub").unwrap();
        assert_eq!(authority.port, 80);

        let authority = TargetAuthority::from_http_target("https://example.com:8443/").unwrap();
        assert_eq!(authority.port, 8443);

        // Written ports survive even when they match the scheme default
        let authority = TargetAuthority::from_http_target("https://example.com:443/").unwrap();
        assert_eq!(authority.port, 443);
        let authority = TargetAuthority::from_http_target("http://user@example.com:80/").unwrap();
        assert_eq!(authority.port, 80);
    }

    #[test]
    fn test_http_target_without_host_is_rejected() {
        assert!(TargetAuthority::from_http_target("/index.html").unwrap_err().is_malformed());
        assert!(TargetAuthority::from_http_target("http://").is_err());
    }

    #[test]
    fn test_connect_target_defaults_to_443() {
        let authority = TargetAuthority::from_connect_target("example.com").unwrap();
        assert_eq!(authority.port, 443);

        let authority = TargetAuthority::from_connect_target("example.com:9999").unwrap();
        assert_eq!(authority.address(), "example.com:9999");

        let authority = TargetAuthority::from_connect_target("[2001:db8::1]:8443").unwrap();
        assert_eq!(authority.host, "2001:db8::1");
        assert_eq!(authority.port, 8443);
    }

    #[test]
    fn test_connect_target_with_bad_port_is_rejected() {
        assert!(TargetAuthority::from_connect_target("example.com:https").unwrap_err().is_malformed());
        assert!(TargetAuthority::from_connect_target("example.com:70000").unwrap_err().is_malformed());
        assert!(TargetAuthority::from_connect_target(":443").unwrap_err().is_malformed());
    }

    #[test]
    fn test_for_request_picks_default_port_by_method() {
        let connect = RequestLine::parse("CONNECT example.com HTTP/1.1").unwrap();
        assert_eq!(TargetAuthority::for_request(&connect).unwrap().port, 443);

        let get = RequestLine::parse("GET example.com HTTP/1.1").unwrap();
        assert_eq!(TargetAuthority::for_request(&get).unwrap().port, 80);
    }
}
