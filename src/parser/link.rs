//! Link-layer demultiplexing.
//!
//! Maps a capture's datalink type to the length of its link header and
//! filters out frames that do not carry IPv4.

use pcap_parser::Linktype;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;

use crate::error::LinkError;

/// Datalink type values we know how to strip.
mod dlt {
    pub const NULL: i32 = 0;
    pub const ETHERNET: i32 = 1;
    pub const RAW: i32 = 101;
    pub const LINUX_SLL: i32 = 113;
    pub const IPV4: i32 = 228;
    pub const LINUX_SLL2: i32 = 276;
}

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const NULL_HEADER_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;

/// BSD loopback address family for IPv4.
const AF_INET: u32 = 2;

/// Fixed link header length for a datalink type, without looking at a frame.
///
/// Ethernet reports its untagged length; a VLAN tag is only discovered per
/// frame by [`link_header_length`].
pub fn fixed_header_length(linktype: Linktype) -> Result<usize, LinkError> {
    match linktype.0 {
        dlt::NULL => Ok(NULL_HEADER_LEN),
        dlt::ETHERNET => Ok(ETHERNET_HEADER_LEN),
        dlt::RAW | dlt::IPV4 => Ok(0),
        dlt::LINUX_SLL => Ok(SLL_HEADER_LEN),
        dlt::LINUX_SLL2 => Ok(SLL2_HEADER_LEN),
        other => Err(LinkError::Unsupported(other)),
    }
}

/// Length of the link header of `frame`, or why it should be skipped.
pub fn link_header_length(linktype: Linktype, frame: &[u8]) -> Result<usize, LinkError> {
    let len = fixed_header_length(linktype)?;
    if frame.len() < len {
        return Err(LinkError::Truncated);
    }

    match linktype.0 {
        dlt::ETHERNET => ethernet_header_length(frame),
        dlt::NULL => {
            let family = [frame[0], frame[1], frame[2], frame[3]];
            if u32::from_le_bytes(family) == AF_INET || u32::from_be_bytes(family) == AF_INET {
                Ok(len)
            } else {
                Err(LinkError::NotRelevant)
            }
        }
        dlt::LINUX_SLL => require_ipv4(u16::from_be_bytes([frame[14], frame[15]]), len),
        dlt::LINUX_SLL2 => require_ipv4(u16::from_be_bytes([frame[0], frame[1]]), len),
        _ => Ok(len),
    }
}

fn ethernet_header_length(frame: &[u8]) -> Result<usize, LinkError> {
    let ethernet = EthernetPacket::new(frame).ok_or(LinkError::Truncated)?;

    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => Ok(ETHERNET_HEADER_LEN),
        EtherTypes::Vlan => {
            let vlan = VlanPacket::new(ethernet.payload()).ok_or(LinkError::Truncated)?;
            if vlan.get_ethertype() == EtherTypes::Ipv4 {
                Ok(ETHERNET_HEADER_LEN + VLAN_TAG_LEN)
            } else {
                Err(LinkError::NotRelevant)
            }
        }
        _ => Err(LinkError::NotRelevant),
    }
}

fn require_ipv4(protocol: u16, len: usize) -> Result<usize, LinkError> {
    if EtherType(protocol) == EtherTypes::Ipv4 {
        Ok(len)
    } else {
        Err(LinkError::NotRelevant)
    }
}
