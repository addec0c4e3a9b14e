//! BGP4MP message decoding.
//!
//! Decodes the subset of BGP needed by the statistics engine: the BGP4MP
//! wrapper, the BGP message header, and UPDATE bodies down to withdrawn
//! routes, NLRI and path-attribute types. Everything else is identified and
//! skipped.

use super::MrtError;
use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// MP_REACH_NLRI path-attribute type code ([RFC 4760]).
///
/// [RFC 4760]: https://tools.ietf.org/html/rfc4760
pub const ATTR_MP_REACH_NLRI: u8 = 14;
/// MP_UNREACH_NLRI path-attribute type code.
pub const ATTR_MP_UNREACH_NLRI: u8 = 15;

// BGP4MP subtypes, RFC 6396 §4.4.
const SUBTYPE_STATE_CHANGE: u16 = 0;
const SUBTYPE_MESSAGE: u16 = 1;
const SUBTYPE_MESSAGE_AS4: u16 = 4;
const SUBTYPE_STATE_CHANGE_AS4: u16 = 5;
const SUBTYPE_MESSAGE_LOCAL: u16 = 6;
const SUBTYPE_MESSAGE_AS4_LOCAL: u16 = 7;

const BGP_MARKER_LEN: usize = 16;
const BGP_HEADER_LEN: usize = 19;

/// Decoded BGP4MP record body.
#[derive(Debug, Clone)]
pub enum Bgp4Mp {
    Message(Bgp4MpMessage),
    /// Peer state transition; carries nothing the stats engine needs.
    StateChange,
}

/// BGP4MP message wrapper around one BGP message.
#[derive(Debug, Clone)]
pub struct Bgp4MpMessage {
    pub peer_asn: u32,
    pub local_asn: u32,
    pub interface_index: u16,
    pub peer_ip: IpAddr,
    pub local_ip: IpAddr,
    pub bgp_message: BgpMessage,
}

/// BGP message, RFC 4271 §4.
#[derive(Debug, Clone)]
pub enum BgpMessage {
    Open,
    Update(BgpUpdate),
    Notification,
    KeepAlive,
}

/// One path attribute; only the type is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathAttribute {
    pub flags: u8,
    pub attr_type: u8,
}

/// BGP UPDATE body.
#[derive(Debug, Clone, Default)]
pub struct BgpUpdate {
    pub withdrawn_routes: Vec<Ipv4Net>,
    pub attributes: Vec<PathAttribute>,
    pub announced_prefixes: Vec<Ipv4Net>,
}

/*
   0                   1                   2                   3
   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |         Peer AS Number        |        Local AS Number        |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |        Interface Index        |        Address Family         |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                      Peer IP Address (variable)               |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                      Local IP Address (variable)              |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                    BGP Message... (variable)
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
*/
/// Decode a BGP4MP record body for the given MRT subtype.
pub fn parse_bgp4mp(subtype: u16, data: &[u8]) -> Result<Bgp4Mp, MrtError> {
    let mut input = data;
    match subtype {
        SUBTYPE_STATE_CHANGE | SUBTYPE_STATE_CHANGE_AS4 => Ok(Bgp4Mp::StateChange),
        SUBTYPE_MESSAGE | SUBTYPE_MESSAGE_LOCAL => {
            parse_bgp4mp_message(&mut input, false).map(Bgp4Mp::Message)
        }
        SUBTYPE_MESSAGE_AS4 | SUBTYPE_MESSAGE_AS4_LOCAL => {
            parse_bgp4mp_message(&mut input, true).map(Bgp4Mp::Message)
        }
        other => Err(MrtError::Unsupported(format!(
            "BGP4MP subtype {other}"
        ))),
    }
}

fn parse_bgp4mp_message(input: &mut &[u8], as4: bool) -> Result<Bgp4MpMessage, MrtError> {
    let peer_asn = if as4 {
        input.read_u32()?
    } else {
        u32::from(input.read_u16()?)
    };
    let local_asn = if as4 {
        input.read_u32()?
    } else {
        u32::from(input.read_u16()?)
    };
    let interface_index = input.read_u16()?;
    let afi = input.read_u16()?;
    let peer_ip = input.read_address(afi)?;
    let local_ip = input.read_address(afi)?;
    let bgp_message = parse_bgp_message(input)?;

    Ok(Bgp4MpMessage {
        peer_asn,
        local_asn,
        interface_index,
        peer_ip,
        local_ip,
        bgp_message,
    })
}

/// Decode a BGP message: 16-byte marker, length, type, then a typed body.
pub fn parse_bgp_message(input: &mut &[u8]) -> Result<BgpMessage, MrtError> {
    let total = input.len();
    input.require("BGP message header", BGP_HEADER_LEN)?;
    input.advance(BGP_MARKER_LEN)?;
    let length = input.read_u16()?;
    if !(19..=4096).contains(&length) {
        return Err(MrtError::InvalidBgpMessageLength(length));
    }
    // Tolerate a length field larger than the enclosing record, as captures
    // in the wild sometimes truncate the final message.
    let body_len = if length as usize > total {
        total - BGP_HEADER_LEN
    } else {
        length as usize - BGP_HEADER_LEN
    };
    let msg_type = input.read_u8()?;
    let mut body = input.split_to(body_len)?;

    match msg_type {
        1 => Ok(BgpMessage::Open),
        2 => Ok(BgpMessage::Update(parse_bgp_update(&mut body)?)),
        3 => Ok(BgpMessage::Notification),
        4 => Ok(BgpMessage::KeepAlive),
        other => Err(MrtError::Unsupported(format!("BGP message type {other}"))),
    }
}

/*
  +-----------------------------------------------------+
  |   Withdrawn Routes Length (2 octets)                |
  +-----------------------------------------------------+
  |   Withdrawn Routes (variable)                       |
  +-----------------------------------------------------+
  |   Total Path Attribute Length (2 octets)            |
  +-----------------------------------------------------+
  |   Path Attributes (variable)                        |
  +-----------------------------------------------------+
  |   Network Layer Reachability Information (variable) |
  +-----------------------------------------------------+
*/
fn parse_bgp_update(input: &mut &[u8]) -> Result<BgpUpdate, MrtError> {
    let withdrawn_len = input.read_u16()? as usize;
    let mut withdrawn = input.split_to(withdrawn_len)?;
    let withdrawn_routes = parse_prefixes(&mut withdrawn)?;

    let attrs_len = input.read_u16()? as usize;
    let mut attrs = input.split_to(attrs_len)?;
    let attributes = parse_attributes(&mut attrs)?;

    // The remainder of the message is the NLRI.
    let announced_prefixes = parse_prefixes(input)?;

    Ok(BgpUpdate {
        withdrawn_routes,
        attributes,
        announced_prefixes,
    })
}

// Attribute: flags(1) type(1) length(1 or 2 when the extended-length flag
// 0x10 is set) value(length).
fn parse_attributes(input: &mut &[u8]) -> Result<Vec<PathAttribute>, MrtError> {
    let mut attributes = Vec::new();
    while !input.is_empty() {
        let flags = input.read_u8()?;
        let attr_type = input.read_u8()?;
        let len = if flags & 0x10 != 0 {
            input.read_u16()? as usize
        } else {
            input.read_u8()? as usize
        };
        input.advance(len)?;
        attributes.push(PathAttribute { flags, attr_type });
    }
    Ok(attributes)
}

// IPv4 prefix list: length-in-bits(1) prefix(ceil(bits/8)).
fn parse_prefixes(input: &mut &[u8]) -> Result<Vec<Ipv4Net>, MrtError> {
    let mut prefixes = Vec::new();
    while !input.is_empty() {
        let bits = input.read_u8()?;
        if bits > 32 {
            return Err(MrtError::Unsupported(format!(
                "IPv4 prefix length {bits}"
            )));
        }
        let nbytes = (usize::from(bits) + 7) / 8;
        let raw = input.split_to(nbytes)?;
        let mut octets = [0u8; 4];
        octets[..nbytes].copy_from_slice(raw);
        let net = Ipv4Net::new(Ipv4Addr::from(octets), bits)
            .map_err(|e| MrtError::Unsupported(format!("prefix: {e}")))?;
        prefixes.push(net);
    }
    Ok(prefixes)
}

// Byte-slice reader in the style of a wire-format cursor; consumes from the
// front of the slice.
trait SliceReader<'a>: Sized {
    fn require(&self, name: &'static str, n: usize) -> Result<(), MrtError>;
    fn advance(&mut self, n: usize) -> Result<(), MrtError>;
    fn split_to(&mut self, n: usize) -> Result<&'a [u8], MrtError>;
    fn read_u8(&mut self) -> Result<u8, MrtError>;
    fn read_u16(&mut self) -> Result<u16, MrtError>;
    fn read_u32(&mut self) -> Result<u32, MrtError>;
    fn read_address(&mut self, afi: u16) -> Result<IpAddr, MrtError>;
}

impl<'a> SliceReader<'a> for &'a [u8] {
    fn require(&self, name: &'static str, n: usize) -> Result<(), MrtError> {
        if self.len() >= n {
            Ok(())
        } else {
            Err(MrtError::Truncated {
                name,
                expected: n,
                found: self.len(),
            })
        }
    }

    fn advance(&mut self, n: usize) -> Result<(), MrtError> {
        self.split_to(n).map(|_| ())
    }

    fn split_to(&mut self, n: usize) -> Result<&'a [u8], MrtError> {
        self.require("field", n)?;
        let this = *self;
        let (head, tail) = this.split_at(n);
        *self = tail;
        Ok(head)
    }

    fn read_u8(&mut self) -> Result<u8, MrtError> {
        let b = self.split_to(1)?;
        Ok(b[0])
    }

    fn read_u16(&mut self) -> Result<u16, MrtError> {
        let b = self.split_to(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, MrtError> {
        let b = self.split_to(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_address(&mut self, afi: u16) -> Result<IpAddr, MrtError> {
        match afi {
            1 => {
                let b = self.split_to(4)?;
                Ok(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3])))
            }
            2 => {
                let b = self.split_to(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(b);
                Ok(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            other => Err(MrtError::Unsupported(format!("address family {other}"))),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update() {
        let body = testutil::update_body(&[24, 16], &[1, ATTR_MP_REACH_NLRI], &[8]);
        let msg = match parse_bgp4mp(1, &body).unwrap() {
            Bgp4Mp::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(msg.peer_asn, 64512);
        assert_eq!(msg.local_asn, 64513);
        assert_eq!(msg.peer_ip, IpAddr::from([192, 0, 2, 1]));

        let update = match msg.bgp_message {
            BgpMessage::Update(u) => u,
            other => panic!("expected update, got {other:?}"),
        };
        assert_eq!(update.withdrawn_routes.len(), 2);
        assert_eq!(
            update.withdrawn_routes[0],
            "10.0.0.0/24".parse::<Ipv4Net>().unwrap()
        );
        assert_eq!(update.announced_prefixes.len(), 1);
        assert_eq!(update.attributes.len(), 2);
        assert_eq!(update.attributes[1].attr_type, ATTR_MP_REACH_NLRI);
    }

    #[test]
    fn test_parse_keepalive() {
        let body = testutil::keepalive_body();
        let msg = match parse_bgp4mp(1, &body).unwrap() {
            Bgp4Mp::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert!(matches!(msg.bgp_message, BgpMessage::KeepAlive));
    }

    #[test]
    fn test_state_change_subtype() {
        assert!(matches!(parse_bgp4mp(0, &[]).unwrap(), Bgp4Mp::StateChange));
        assert!(matches!(parse_bgp4mp(5, &[]).unwrap(), Bgp4Mp::StateChange));
    }

    #[test]
    fn test_unknown_subtype() {
        assert!(parse_bgp4mp(9, &[]).is_err());
    }

    #[test]
    fn test_truncated_update() {
        let mut body = testutil::update_body(&[24], &[], &[]);
        body.truncate(body.len() - 3);
        assert!(parse_bgp4mp(1, &body).is_err());
    }

    #[test]
    fn test_bad_message_length() {
        let mut body = testutil::keepalive_body();
        // Corrupt the BGP length field (offset: 16-byte wrapper + 16 marker).
        body[32] = 0;
        body[33] = 1;
        assert!(matches!(
            parse_bgp4mp(1, &body),
            Err(MrtError::InvalidBgpMessageLength(1))
        ));
    }
}
