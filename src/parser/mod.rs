//! Frame decoding.
//!
//! Strips link, IPv4 and UDP encapsulation from captured frames. Nothing
//! here allocates or writes into the frame.

pub mod link;
pub mod udp;

pub use link::{fixed_header_length, link_header_length};
pub use udp::{extract_udp, UdpDatagram, UDP_HEADER_LEN};
