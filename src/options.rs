//! Handshake message options.
//!
//! Options convey configuration parameters between server and client. Each
//! option is a (code, length, value) triple on the wire, with a 1-byte code
//! and a 1-byte length. Codes follow the RFC 2132 numbering for the handful
//! of options this server understands; every other code is carried opaquely
//! so that newer peers can add options without breaking older ones.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Largest value an option can carry (the length field is one byte).
pub const MAX_OPTION_VALUE_LEN: usize = 255;

/// Maximum number of addresses in a DNS server option.
///
/// With 4 bytes per IPv4 address, 255 bytes hold 63 addresses.
const MAX_ADDRESSES_PER_OPTION: usize = MAX_OPTION_VALUE_LEN / 4;

/// Option codes understood by this implementation.
///
/// Unknown codes are not an error; they are kept as raw [`DhcpOption`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Skipped on decode, never emitted.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway address (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Domain name for DNS resolution (RFC 2132 §3.17).
    DomainName = 15,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedAddress = 50,
    /// Lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Renewal time T1 (RFC 2132 §9.11).
    RenewalTime = 58,
    /// Rebinding time T2 (RFC 2132 §9.12).
    RebindingTime = 59,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            15 => Ok(Self::DomainName),
            50 => Ok(Self::RequestedAddress),
            51 => Ok(Self::LeaseTime),
            54 => Ok(Self::ServerIdentifier),
            58 => Ok(Self::RenewalTime),
            59 => Ok(Self::RebindingTime),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// A single option: a code and its raw value.
///
/// The value is kept exactly as received, so options this server does not
/// interpret are re-emitted byte for byte. Construction rejects the
/// [`Pad`](OptionCode::Pad) and [`End`](OptionCode::End) codes and values
/// longer than [`MAX_OPTION_VALUE_LEN`], which keeps every option encodable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DhcpOption {
    code: u8,
    value: Vec<u8>,
}

impl DhcpOption {
    /// Creates an option from a raw code and value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for the pad/end codes or for values
    /// longer than 255 bytes.
    pub fn new(code: u8, value: Vec<u8>) -> Result<Self> {
        if code == OptionCode::Pad as u8 || code == OptionCode::End as u8 {
            return Err(Error::InvalidOption(format!(
                "code {} is reserved for framing",
                code
            )));
        }
        if value.len() > MAX_OPTION_VALUE_LEN {
            return Err(Error::InvalidOption(format!(
                "option {} value is {} bytes (maximum {})",
                code,
                value.len(),
                MAX_OPTION_VALUE_LEN
            )));
        }
        Ok(Self { code, value })
    }

    fn address(code: OptionCode, addr: Ipv4Addr) -> Self {
        Self {
            code: code as u8,
            value: addr.octets().to_vec(),
        }
    }

    fn seconds(code: OptionCode, secs: u32) -> Self {
        Self {
            code: code as u8,
            value: secs.to_be_bytes().to_vec(),
        }
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::address(OptionCode::SubnetMask, mask)
    }

    pub fn router(gateway: Ipv4Addr) -> Self {
        Self::address(OptionCode::Router, gateway)
    }

    /// DNS servers, truncated to the 63 addresses one option can hold.
    pub fn dns_servers(servers: &[Ipv4Addr]) -> Self {
        let value = servers
            .iter()
            .take(MAX_ADDRESSES_PER_OPTION)
            .flat_map(|addr| addr.octets())
            .collect();
        Self {
            code: OptionCode::DnsServer as u8,
            value,
        }
    }

    /// Domain name, truncated to at most 255 bytes on a character boundary.
    pub fn domain_name(name: &str) -> Self {
        let mut len = name.len().min(MAX_OPTION_VALUE_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        Self {
            code: OptionCode::DomainName as u8,
            value: name.as_bytes()[..len].to_vec(),
        }
    }

    pub fn requested_address(addr: Ipv4Addr) -> Self {
        Self::address(OptionCode::RequestedAddress, addr)
    }

    pub fn lease_time(secs: u32) -> Self {
        Self::seconds(OptionCode::LeaseTime, secs)
    }

    pub fn server_identifier(addr: Ipv4Addr) -> Self {
        Self::address(OptionCode::ServerIdentifier, addr)
    }

    pub fn renewal_time(secs: u32) -> Self {
        Self::seconds(OptionCode::RenewalTime, secs)
    }

    pub fn rebinding_time(secs: u32) -> Self {
        Self::seconds(OptionCode::RebindingTime, secs)
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the known code for this option, if any.
    pub fn known_code(&self) -> Option<OptionCode> {
        OptionCode::try_from(self.code).ok()
    }

    /// Interprets the value as a single IPv4 address.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    /// Interprets the value as a list of IPv4 addresses.
    pub fn as_ipv4_list(&self) -> Option<Vec<Ipv4Addr>> {
        if self.value.is_empty() || !self.value.len().is_multiple_of(4) {
            return None;
        }
        Some(
            self.value
                .chunks_exact(4)
                .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
                .collect(),
        )
    }

    /// Interprets the value as a big-endian 32-bit integer.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Interprets the value as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Appends the option's wire form (code, length, value) to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.code);
        buffer.push(self.value.len() as u8);
        buffer.extend_from_slice(&self.value);
    }
}

impl fmt::Display for DhcpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known_code() {
            Some(code) => write!(f, "{:?}({} bytes)", code, self.value.len()),
            None => write!(f, "Option{}({} bytes)", self.code, self.value.len()),
        }
    }
}

/// Finds the first option with the given code.
pub fn find(options: &[DhcpOption], code: OptionCode) -> Option<&DhcpOption> {
    options.iter().find(|opt| opt.code == code as u8)
}
