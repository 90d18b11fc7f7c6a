//! Handshake message encoding and decoding.
//!
//! Every message shares one fixed-layout header followed by variable-length
//! options. The header carries just what the lease handshake needs: the
//! message kind, the client's hardware address, a transaction id used to
//! correlate replies, and the assigned or requested address.
//!
//! # Packet Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   hlen (1)    |        xid (4) ...            |
//! +---------------+---------------+-------------------------------+
//! |        ... xid                |      address (4) ...          |
//! +-------------------------------+-------------------------------+
//! |        ... address            |      chaddr (16) ...          |
//! +-------------------------------+-------------------------------+
//! |                          ... chaddr                           |
//! +---------------------------------------------------------------+
//! |                   options (code, len, value)* 255             |
//! +---------------------------------------------------------------+
//! ```
//!
//! All integers are big-endian. Only the first `hlen` bytes of `chaddr` are
//! significant; the rest is zero padding.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::options::{self, DhcpOption, OptionCode};

const OP_SIZE: usize = 1;
const HLEN_SIZE: usize = 1;
const XID_SIZE: usize = 4;
const ADDRESS_SIZE: usize = 4;

/// Size of the hardware address field, and the longest address it can hold.
pub const CHADDR_SIZE: usize = 16;

const XID_OFFSET: usize = OP_SIZE + HLEN_SIZE;
const ADDRESS_OFFSET: usize = XID_OFFSET + XID_SIZE;
const CHADDR_OFFSET: usize = ADDRESS_OFFSET + ADDRESS_SIZE;

/// Size of the fixed header; options start here.
pub const HEADER_SIZE: usize = CHADDR_OFFSET + CHADDR_SIZE;

/// Largest UDP payload; receive buffers are this size so that no encodable
/// message is truncated on the way in.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Initial capacity for the encode buffer.
///
/// 576 bytes is the minimum datagram size every IPv4 host must accept.
const ENCODE_CAPACITY: usize = 576;

/// The kind of a handshake message, carried in the operation code byte.
///
/// Values follow the DHCP message type numbering (RFC 2132 §9.6); the
/// kinds this protocol does not use (DECLINE, NAK, INFORM) are malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client broadcast to locate an address.
    Discover = 1,
    /// Server response to DISCOVER with an address.
    Offer = 2,
    /// Client request for the offered address, or renewal of a bound one.
    Request = 3,
    /// Server acknowledgement; the lease is bound.
    Ack = 5,
    /// Client gives its address back.
    Release = 7,
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            5 => Ok(Self::Ack),
            7 => Ok(Self::Release),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Ack => write!(f, "ACK"),
            Self::Release => write!(f, "RELEASE"),
        }
    }
}

/// A client hardware address of up to 16 bytes.
///
/// This is the lease key. It is opaque: a 6-byte Ethernet MAC is the common
/// case, but any identifier that fits the header field is accepted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress {
    bytes: [u8; CHADDR_SIZE],
    len: u8,
}

impl HardwareAddress {
    /// Creates a hardware address from its significant bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHardwareAddress`] if `bytes` is longer than 16.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > CHADDR_SIZE {
            return Err(Error::InvalidHardwareAddress(format!(
                "{} bytes (maximum {})",
                bytes.len(),
                CHADDR_SIZE
            )));
        }
        let mut padded = [0u8; CHADDR_SIZE];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: padded,
            len: bytes.len() as u8,
        })
    }

    /// Creates a hardware address from a 6-byte Ethernet MAC.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut bytes = [0u8; CHADDR_SIZE];
        bytes[..6].copy_from_slice(&mac);
        Self { bytes, len: 6 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.as_bytes().iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAddress({})", self)
    }
}

impl FromStr for HardwareAddress {
    type Err = Error;

    /// Parses `aa:bb:cc:dd:ee:ff` (or dash-separated) hex notation.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('-', ":");
        if normalized.is_empty() {
            return Self::new(&[]);
        }
        let bytes = normalized
            .split(':')
            .map(|part| {
                if part.len() != 2 {
                    return Err(Error::InvalidHardwareAddress(s.to_string()));
                }
                u8::from_str_radix(part, 16)
                    .map_err(|_| Error::InvalidHardwareAddress(s.to_string()))
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::new(&bytes)
    }
}

/// A decoded handshake message.
///
/// Use [`decode`](Self::decode) for inbound datagrams and
/// [`reply`](Self::reply) to build the server's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub kind: MessageKind,

    /// Correlation token chosen by the client, echoed in replies.
    pub transaction_id: u32,

    pub hardware_address: HardwareAddress,

    /// Offered or acknowledged address in replies; requested or released
    /// address in client messages. Unspecified when not applicable.
    pub address: Ipv4Addr,

    /// Options in wire order.
    pub options: Vec<DhcpOption>,
}

impl HandshakeMessage {
    /// Decodes a message from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPacket`] if:
    /// - the buffer is shorter than the 26-byte header
    /// - the hardware address length exceeds 16
    /// - an option's length byte is missing or its value is truncated
    /// - the operation code is not a known [`MessageKind`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                HEADER_SIZE
            )));
        }

        let op = data[0];
        let hlen = data[1] as usize;

        if hlen > CHADDR_SIZE {
            return Err(Error::MalformedPacket(format!(
                "Hardware address length {} exceeds maximum {}",
                hlen, CHADDR_SIZE
            )));
        }

        let kind = MessageKind::try_from(op)
            .map_err(|value| Error::MalformedPacket(format!("Unknown operation code: {}", value)))?;

        let transaction_id = u32::from_be_bytes([
            data[XID_OFFSET],
            data[XID_OFFSET + 1],
            data[XID_OFFSET + 2],
            data[XID_OFFSET + 3],
        ]);
        let address = Ipv4Addr::new(
            data[ADDRESS_OFFSET],
            data[ADDRESS_OFFSET + 1],
            data[ADDRESS_OFFSET + 2],
            data[ADDRESS_OFFSET + 3],
        );
        let hardware_address = HardwareAddress::new(&data[CHADDR_OFFSET..CHADDR_OFFSET + hlen])?;

        let options = Self::decode_options(&data[HEADER_SIZE..])?;

        Ok(Self {
            kind,
            transaction_id,
            hardware_address,
            address,
            options,
        })
    }

    fn decode_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::MalformedPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::MalformedPacket(format!(
                    "Option {} declares {} bytes but {} remain",
                    code,
                    length,
                    data.len() - index - 2
                )));
            }

            let value = data[index + 2..index + 2 + length].to_vec();
            options.push(DhcpOption::new(code, value)?);

            index += 2 + length;
        }

        Ok(options)
    }

    /// Encodes the message for transmission.
    ///
    /// Options are written in order and terminated by the end marker.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ENCODE_CAPACITY);

        packet.push(self.kind as u8);
        packet.push(self.hardware_address.len() as u8);
        packet.extend_from_slice(&self.transaction_id.to_be_bytes());
        packet.extend_from_slice(&self.address.octets());
        packet.extend_from_slice(&self.hardware_address.bytes);

        for option in &self.options {
            option.encode_into(&mut packet);
        }

        packet.push(OptionCode::End as u8);

        packet
    }

    /// Builds a DISCOVER for `hardware_address`.
    pub fn discover(transaction_id: u32, hardware_address: HardwareAddress) -> Self {
        Self {
            kind: MessageKind::Discover,
            transaction_id,
            hardware_address,
            address: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
        }
    }

    /// Builds a REQUEST for a previously offered (or bound) address.
    pub fn request(
        transaction_id: u32,
        hardware_address: HardwareAddress,
        address: Ipv4Addr,
    ) -> Self {
        Self {
            kind: MessageKind::Request,
            transaction_id,
            hardware_address,
            address,
            options: Vec::new(),
        }
    }

    /// Builds a RELEASE giving `address` back.
    pub fn release(
        transaction_id: u32,
        hardware_address: HardwareAddress,
        address: Ipv4Addr,
    ) -> Self {
        Self {
            kind: MessageKind::Release,
            transaction_id,
            hardware_address,
            address,
            options: Vec::new(),
        }
    }

    /// Adds an option, returning the message for chaining.
    pub fn with_option(mut self, option: DhcpOption) -> Self {
        self.options.push(option);
        self
    }

    /// Creates a reply to this message.
    ///
    /// The transaction id and hardware address are copied from the request
    /// so the client can match the reply to its exchange.
    pub fn reply(&self, kind: MessageKind, address: Ipv4Addr, options: Vec<DhcpOption>) -> Self {
        Self {
            kind,
            transaction_id: self.transaction_id,
            hardware_address: self.hardware_address,
            address,
            options,
        }
    }

    /// Returns the first option with the given code.
    pub fn option(&self, code: OptionCode) -> Option<&DhcpOption> {
        options::find(&self.options, code)
    }

    /// Returns the requested address option (50), if present and well formed.
    pub fn requested_address(&self) -> Option<Ipv4Addr> {
        self.option(OptionCode::RequestedAddress)?.as_ipv4()
    }

    /// Returns the server identifier option (54), if present and well formed.
    ///
    /// Clients include this in REQUEST to indicate which server's offer
    /// they are accepting.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.option(OptionCode::ServerIdentifier)?.as_ipv4()
    }

    /// Returns the lease time option (51) in seconds.
    pub fn lease_time(&self) -> Option<u32> {
        self.option(OptionCode::LeaseTime)?.as_u32()
    }
}
