use crate::error::CandidateParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

const PREFIX: &str = "candidate:";

/// Highest component id allowed by the ICE candidate grammar.
pub const MAX_COMPONENT: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateProtocol {
    Udp,
    Tcp,
}

impl CandidateProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateProtocol::Udp => "udp",
            CandidateProtocol::Tcp => "tcp",
        }
    }
}

impl FromStr for CandidateProtocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(CandidateProtocol::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(CandidateProtocol::Tcp)
        } else {
            Err(())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    #[default]
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl FromStr for CandidateType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::Srflx),
            "prflx" => Ok(CandidateType::Prflx),
            "relay" => Ok(CandidateType::Relay),
            _ => Err(()),
        }
    }
}

/// Connection address of a candidate.
///
/// Browsers replace private host addresses with random `<uuid>.local` mDNS
/// names, so both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateAddress {
    Ip(IpAddr),
    Mdns(String),
}

impl FromStr for CandidateAddress {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(CandidateAddress::Ip(ip));
        }
        let Some(name) = s.strip_suffix(".local") else {
            return Err(());
        };
        let valid = !name.is_empty()
            && name
                .split('.')
                .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        if valid {
            Ok(CandidateAddress::Mdns(s.to_string()))
        } else {
            Err(())
        }
    }
}

impl fmt::Display for CandidateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateAddress::Ip(ip) => write!(f, "{ip}"),
            CandidateAddress::Mdns(name) => f.write_str(name),
        }
    }
}

/// Structured form of a trickled connectivity candidate.
///
/// `sdp_mid` and `sdp_mline_index` route the candidate to a media section;
/// they travel next to the candidate string, not inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: CandidateProtocol,
    pub priority: u32,
    pub address: CandidateAddress,
    pub port: u16,
    pub candidate_type: CandidateType,
    /// Trailing `<key> <value>` pairs (`raddr`, `rport`, `tcptype`, ...), in wire order.
    pub extensions: Vec<(String, String)>,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: u16,
}

impl IceCandidate {
    /// Parses `candidate:<foundation> <component> <protocol> <priority> <address> <port> typ <type> [<key> <value>]...`.
    ///
    /// A missing `typ` pair yields [`CandidateType::Host`]. An `a=` prefix, as
    /// found when the attribute is copied out of an SDP blob, is ignored.
    pub fn decode(raw: &str) -> Result<Self, CandidateParseError> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("a=").unwrap_or(raw);
        let mut tokens = raw.split_ascii_whitespace();

        let foundation = tokens
            .next()
            .and_then(|t| t.strip_prefix(PREFIX))
            .ok_or(CandidateParseError::MissingPrefix)?;
        if foundation.is_empty() {
            return Err(CandidateParseError::EmptyFoundation);
        }

        let component: u16 = parse_field(next_field(&mut tokens, "component")?, "component")?;
        if component == 0 || component > MAX_COMPONENT {
            return Err(invalid("component", component));
        }
        let protocol = next_field(&mut tokens, "protocol")?;
        let protocol = protocol
            .parse::<CandidateProtocol>()
            .map_err(|_| invalid("protocol", protocol))?;
        let priority: u32 = parse_field(next_field(&mut tokens, "priority")?, "priority")?;
        let address = next_field(&mut tokens, "address")?;
        let address = address
            .parse::<CandidateAddress>()
            .map_err(|_| invalid("address", address))?;
        let port: u16 = parse_field(next_field(&mut tokens, "port")?, "port")?;

        let mut candidate_type = None;
        let mut extensions = Vec::new();
        while let Some(key) = tokens.next() {
            let value = tokens.next();
            if key == "typ" {
                let value = value.ok_or(CandidateParseError::MissingType)?;
                if candidate_type.is_some() {
                    return Err(invalid("typ", value));
                }
                candidate_type = Some(
                    value
                        .parse::<CandidateType>()
                        .map_err(|_| invalid("typ", value))?,
                );
            } else {
                let value =
                    value.ok_or_else(|| CandidateParseError::DanglingExtension(key.to_string()))?;
                extensions.push((key.to_string(), value.to_string()));
            }
        }

        Ok(IceCandidate {
            foundation: foundation.to_string(),
            component,
            protocol,
            priority,
            address,
            port,
            candidate_type: candidate_type.unwrap_or_default(),
            extensions,
            sdp_mid: None,
            sdp_mline_index: 0,
        })
    }

    /// Inverse of [`IceCandidate::decode`]. `typ` is always written.
    pub fn encode(&self) -> String {
        let mut out = format!(
            "{PREFIX}{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol.as_str(),
            self.priority,
            self.address,
            self.port,
            self.candidate_type.as_str()
        );
        for (key, value) in &self.extensions {
            out.push(' ');
            out.push_str(key);
            out.push(' ');
            out.push_str(value);
        }
        out
    }

    /// Attaches the media-section routing fields. A missing line index means 0.
    pub fn with_routing(mut self, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        self.sdp_mid = sdp_mid;
        self.sdp_mline_index = sdp_mline_index.unwrap_or(0);
        self
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for IceCandidate {
    type Err = CandidateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IceCandidate::decode(s)
    }
}

fn next_field<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<&'a str, CandidateParseError> {
    tokens.next().ok_or(CandidateParseError::MissingField(name))
}

/// Plain decimal only: no sign, no zero padding.
fn parse_field<T: FromStr>(value: &str, name: &'static str) -> Result<T, CandidateParseError> {
    let digits = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    if !digits || (value.len() > 1 && value.starts_with('0')) {
        return Err(invalid(name, value));
    }
    value.parse().map_err(|_| invalid(name, value))
}

fn invalid(field: &'static str, value: impl ToString) -> CandidateParseError {
    CandidateParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Per-type tally of the remote candidates applied to one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateTally {
    pub host: u32,
    pub srflx: u32,
    pub prflx: u32,
    pub relay: u32,
}

impl CandidateTally {
    pub fn record(&mut self, candidate_type: CandidateType) {
        match candidate_type {
            CandidateType::Host => self.host += 1,
            CandidateType::Srflx => self.srflx += 1,
            CandidateType::Prflx => self.prflx += 1,
            CandidateType::Relay => self.relay += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.host + self.srflx + self.prflx + self.relay
    }

    /// Only host candidates were offered, so the peer is unreachable from behind NAT.
    pub fn host_only(&self) -> bool {
        self.total() > 0 && self.total() == self.host
    }
}
