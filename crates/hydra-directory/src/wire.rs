//! Wire protocol spoken to the local routing agent.
//!
//! Every message starts with an 8-byte big-endian header — version,
//! request id, command — followed by a command payload. Register and
//! unregister carry the address as a family byte plus a length-prefixed
//! textual address; ack and nack echo the request id with an empty
//! payload.

use std::net::Ipv6Addr;

use crate::error::WireError;

/// Protocol version this client speaks.
pub const WIRE_VERSION: u16 = 1;

/// Default UDP port of the local routing agent.
pub const DEFAULT_AGENT_PORT: u16 = 54345;

/// Address family tag for IPv6 payloads.
pub const FAMILY_IPV6: u8 = 6;

/// Header length in bytes: version (2) + request id (4) + command (2).
pub const HEADER_LEN: usize = 8;

const CMD_REGISTER: u16 = 1;
const CMD_UNREGISTER: u16 = 2;
const CMD_ACK: u16 = 3;
const CMD_NACK: u16 = 4;

/// A decoded agent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the agent to inject this address as a host route.
    Register { request_id: u32, addr: Ipv6Addr },
    /// Ask the agent to withdraw this address.
    Unregister { request_id: u32, addr: Ipv6Addr },
    /// The agent accepted the request with this id.
    Ack { request_id: u32 },
    /// The agent refused the request with this id.
    Nack { request_id: u32 },
}

impl Message {
    /// The request id carried in the header.
    pub fn request_id(&self) -> u32 {
        match self {
            Message::Register { request_id, .. }
            | Message::Unregister { request_id, .. }
            | Message::Ack { request_id }
            | Message::Nack { request_id } => *request_id,
        }
    }

    /// Serialize to the on-wire form.
    pub fn encode(&self) -> Vec<u8> {
        let (command, addr) = match self {
            Message::Register { addr, .. } => (CMD_REGISTER, Some(addr)),
            Message::Unregister { addr, .. } => (CMD_UNREGISTER, Some(addr)),
            Message::Ack { .. } => (CMD_ACK, None),
            Message::Nack { .. } => (CMD_NACK, None),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + 48);
        buf.extend_from_slice(&WIRE_VERSION.to_be_bytes());
        buf.extend_from_slice(&self.request_id().to_be_bytes());
        buf.extend_from_slice(&command.to_be_bytes());

        if let Some(addr) = addr {
            let text = addr.to_string();
            buf.push(FAMILY_IPV6);
            buf.push(text.len() as u8);
            buf.extend_from_slice(text.as_bytes());
        }
        buf
    }

    /// Parse a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated(buf.len()));
        }

        let version = u16::from_be_bytes([buf[0], buf[1]]);
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let request_id = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let command = u16::from_be_bytes([buf[6], buf[7]]);

        match command {
            CMD_ACK => Ok(Message::Ack { request_id }),
            CMD_NACK => Ok(Message::Nack { request_id }),
            CMD_REGISTER | CMD_UNREGISTER => {
                let addr = decode_address(&buf[HEADER_LEN..])?;
                if command == CMD_REGISTER {
                    Ok(Message::Register { request_id, addr })
                } else {
                    Ok(Message::Unregister { request_id, addr })
                }
            }
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

fn decode_address(payload: &[u8]) -> Result<Ipv6Addr, WireError> {
    if payload.len() < 2 {
        return Err(WireError::Truncated(payload.len()));
    }
    if payload[0] != FAMILY_IPV6 {
        return Err(WireError::MalformedAddress);
    }
    let len = payload[1] as usize;
    let text = payload
        .get(2..2 + len)
        .ok_or(WireError::Truncated(payload.len()))?;
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(WireError::MalformedAddress)
}
