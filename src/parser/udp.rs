//! IPv4/UDP header extraction.
//!
//! Every offset is checked against the captured length before a slice is
//! built. Length fields read from the wire are never trusted on their own.

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;

use crate::domain::Endpoint;
use crate::error::ExtractError;

/// Minimum IPv4 header length in bytes
const MIN_IPV4_HEADER_LEN: usize = 20;
/// Fixed UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// A UDP datagram found inside a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub src: Endpoint,
    pub dst: Endpoint,
    /// Payload bytes, borrowed from the frame
    pub payload: &'a [u8],
}

/// Extract the UDP payload of `frame`, whose network layer starts at
/// `link_len`.
pub fn extract_udp(frame: &[u8], link_len: usize) -> Result<UdpDatagram<'_>, ExtractError> {
    let network = frame.get(link_len..).ok_or(ExtractError::Truncated)?;
    if network.len() < MIN_IPV4_HEADER_LEN {
        return Err(ExtractError::Truncated);
    }
    let ip = Ipv4Packet::new(network).ok_or(ExtractError::Truncated)?;

    if ip.get_version() != 4 {
        return Err(ExtractError::NotRelevant);
    }

    // IHL is counted in 32-bit words
    let ip_header_len = usize::from(ip.get_header_length()) * 4;
    if ip_header_len < MIN_IPV4_HEADER_LEN {
        return Err(ExtractError::Truncated);
    }

    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return Err(ExtractError::NotRelevant);
    }

    // Later fragments carry no UDP header
    if ip.get_fragment_offset() != 0 {
        return Err(ExtractError::NotRelevant);
    }

    let udp_offset = link_len
        .checked_add(ip_header_len)
        .ok_or(ExtractError::Truncated)?;
    let payload_offset = udp_offset
        .checked_add(UDP_HEADER_LEN)
        .ok_or(ExtractError::Truncated)?;
    if payload_offset > frame.len() {
        return Err(ExtractError::Truncated);
    }

    let udp = UdpPacket::new(&frame[udp_offset..payload_offset]).ok_or(ExtractError::Truncated)?;
    let udp_len = usize::from(udp.get_length());
    if udp_len < UDP_HEADER_LEN {
        return Err(ExtractError::Truncated);
    }

    let payload_len = udp_len - UDP_HEADER_LEN;
    let payload_end = payload_offset
        .checked_add(payload_len)
        .ok_or(ExtractError::Truncated)?;
    if payload_end > frame.len() {
        return Err(ExtractError::Truncated);
    }

    if payload_len == 0 {
        return Err(ExtractError::NotRelevant);
    }

    Ok(UdpDatagram {
        src: Endpoint::new(ip.get_source(), udp.get_source()),
        dst: Endpoint::new(ip.get_destination(), udp.get_destination()),
        payload: &frame[payload_offset..payload_end],
    })
}
