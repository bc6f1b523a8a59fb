//! Offline capture files (legacy pcap and pcapng) read with pcap-parser.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, Block, Linktype, PcapBlockOwned, PcapError};

use super::{CaptureSource, MIN_BUFFER_SIZE};
use crate::domain::{CaptureFrame, Timestamp};
use crate::error::CaptureError;
use crate::parser;

/// Legacy pcap magic numbers announcing nanosecond timestamps
const NANOSECOND_MAGICS: [u32; 2] = [0xa1b2_3c4d, 0x4d3c_b2a1];
/// pcapng default timestamp resolution (microseconds)
const DEFAULT_NG_RESOLUTION: u64 = 1_000_000;
/// Consecutive refills without a complete block before the file is
/// considered cut short
const MAX_STALLED_REFILLS: usize = 8;

/// A pcapng interface description.
#[derive(Debug, Clone, Copy)]
struct Interface {
    linktype: Linktype,
    resolution: u64,
    offset: i64,
}

/// Per-file decoding state, kept apart from the reader so blocks borrowed
/// from the reader can update it.
#[derive(Debug, Default)]
struct FileState {
    /// Legacy header linktype and tick resolution
    legacy: Option<(Linktype, u64)>,
    interfaces: Vec<Interface>,
}

impl FileState {
    fn linktype(&self) -> Option<Linktype> {
        self.legacy
            .map(|(linktype, _)| linktype)
            .or_else(|| self.interfaces.first().map(|iface| iface.linktype))
    }

    /// Apply one block, returning a frame if it carried a packet.
    fn apply(
        &mut self,
        name: &str,
        block: PcapBlockOwned<'_>,
    ) -> Result<Option<CaptureFrame>, CaptureError> {
        match block {
            PcapBlockOwned::LegacyHeader(header) => {
                let resolution = if NANOSECOND_MAGICS.contains(&header.magic_number) {
                    1_000_000_000
                } else {
                    1_000_000
                };
                self.legacy = Some((header.network, resolution));
                Ok(None)
            }
            PcapBlockOwned::Legacy(packet) => {
                let (linktype, resolution) = self.legacy.ok_or_else(|| CaptureError::Read {
                    source_name: name.to_string(),
                    reason: "packet record before file header".to_string(),
                })?;
                let micros = u64::from(packet.ts_usec) * 1_000_000 / resolution;
                Ok(Some(CaptureFrame {
                    data: packet.data.to_vec(),
                    timestamp: Timestamp::new(i64::from(packet.ts_sec), micros as u32),
                    linktype,
                }))
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                self.interfaces.clear();
                Ok(None)
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                check_linktype(name, idb.linktype)?;
                self.interfaces.push(Interface {
                    linktype: idb.linktype,
                    resolution: ts_resolution(idb.if_tsresol).unwrap_or(DEFAULT_NG_RESOLUTION),
                    offset: idb.if_tsoffset,
                });
                Ok(None)
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                let iface = self.interface(name, epb.if_id)?;
                let ticks = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                let mut timestamp = Timestamp::from_ticks(ticks, iface.resolution);
                timestamp.secs = timestamp.secs.saturating_add(iface.offset);
                let caplen = (epb.caplen as usize).min(epb.data.len());
                Ok(Some(CaptureFrame {
                    data: epb.data[..caplen].to_vec(),
                    timestamp,
                    linktype: iface.linktype,
                }))
            }
            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                let iface = self.interface(name, 0)?;
                Ok(Some(CaptureFrame {
                    data: spb.data.to_vec(),
                    timestamp: Timestamp::default(),
                    linktype: iface.linktype,
                }))
            }
            PcapBlockOwned::NG(_) => Ok(None),
        }
    }

    fn interface(&self, name: &str, if_id: u32) -> Result<Interface, CaptureError> {
        self.interfaces
            .get(if_id as usize)
            .copied()
            .ok_or_else(|| CaptureError::Read {
                source_name: name.to_string(),
                reason: format!("packet references unknown interface {}", if_id),
            })
    }
}

/// Decode a pcapng `if_tsresol` value into ticks per second.
fn ts_resolution(tsresol: u8) -> Option<u64> {
    let exponent = u32::from(tsresol & 0x7f);
    if tsresol & 0x80 == 0 {
        10u64.checked_pow(exponent)
    } else {
        2u64.checked_pow(exponent)
    }
}

fn check_linktype(name: &str, linktype: Linktype) -> Result<(), CaptureError> {
    parser::fixed_header_length(linktype)
        .map(|_| ())
        .map_err(|_| CaptureError::UnsupportedLinktype {
            source_name: name.to_string(),
            linktype: linktype.0,
        })
}

/// Frames read from a pcap or pcapng file.
pub struct PcapFileSource {
    name: String,
    reader: Box<dyn PcapReaderIterator>,
    state: FileState,
    linktype: Linktype,
    /// A frame read while looking for the datalink type
    pending: Option<CaptureFrame>,
}

impl PcapFileSource {
    /// Open a capture file from disk.
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self, CaptureError> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| CaptureError::OpenFailed {
            source_name: name.clone(),
            reason: e.to_string(),
        })?;
        Self::from_reader(name, file, buffer_size)
    }

    /// Read a capture from any byte stream.
    ///
    /// Reads up to the first header that names the datalink type so that
    /// `linktype()` is known before the first frame is requested.
    /// `buffer_size` is raised to [`MIN_BUFFER_SIZE`] if smaller.
    pub fn from_reader<R>(
        name: impl Into<String>,
        input: R,
        buffer_size: usize,
    ) -> Result<Self, CaptureError>
    where
        R: Read + 'static,
    {
        let name = name.into();
        let reader = create_reader(buffer_size.max(MIN_BUFFER_SIZE), input).map_err(|e| CaptureError::OpenFailed {
            source_name: name.clone(),
            reason: format!("not a pcap or pcapng file ({:?})", e),
        })?;

        let mut source = Self {
            name,
            reader,
            state: FileState::default(),
            linktype: Linktype::ETHERNET,
            pending: None,
        };

        loop {
            if let Some(linktype) = source.state.linktype() {
                source.linktype = linktype;
                break;
            }
            match source.read_block() {
                Ok(Some(frame)) => {
                    source.pending = Some(frame);
                }
                Ok(None) => match source.state.linktype() {
                    // Header only, no packets
                    Some(_) => continue,
                    None => {
                        return Err(CaptureError::OpenFailed {
                            source_name: source.name.clone(),
                            reason: "no datalink header found".to_string(),
                        })
                    }
                },
                Err(CaptureError::Read { reason, .. }) => {
                    return Err(CaptureError::OpenFailed {
                        source_name: source.name.clone(),
                        reason,
                    })
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            "Opened capture file {} with datalink {}",
            source.name,
            source.linktype.0
        );
        Ok(source)
    }

    /// Read blocks until one yields a frame or the file ends.
    fn read_block(&mut self) -> Result<Option<CaptureFrame>, CaptureError> {
        let mut stalled = 0;

        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let frame = self.state.apply(&self.name, block)?;
                    self.reader.consume(offset);
                    stalled = 0;
                    if frame.is_some() {
                        return Ok(frame);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    stalled += 1;
                    if stalled > MAX_STALLED_REFILLS {
                        tracing::warn!("Capture file {} ends with a partial record", self.name);
                        return Ok(None);
                    }
                    self.reader.refill().map_err(|e| CaptureError::Read {
                        source_name: self.name.clone(),
                        reason: format!("{:?}", e),
                    })?;
                }
                Err(e) => {
                    return Err(CaptureError::Read {
                        source_name: self.name.clone(),
                        reason: format!("{:?}", e),
                    })
                }
            }
        }
    }
}

impl CaptureSource for PcapFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn linktype(&self) -> Linktype {
        self.linktype
    }

    fn next_frame(&mut self) -> Result<Option<CaptureFrame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_block()
    }
}

impl Drop for PcapFileSource {
    fn drop(&mut self) {
        tracing::debug!("Closed capture file {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::legacy_pcap;
    use std::io::Cursor;

    fn pad4(data: &mut Vec<u8>) {
        while data.len() % 4 != 0 {
            data.push(0);
        }
    }

    fn ng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
        let total = (12 + body.len()) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&block_type.to_le_bytes());
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&total.to_le_bytes());
        out
    }

    /// Serialize a pcapng file with one interface and enhanced packets.
    fn pcapng(linktype: u16, packets: &[(u64, &[u8])]) -> Vec<u8> {
        let mut shb = Vec::new();
        shb.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
        shb.extend_from_slice(&1u16.to_le_bytes());
        shb.extend_from_slice(&0u16.to_le_bytes());
        shb.extend_from_slice(&(-1i64).to_le_bytes());

        let mut idb = Vec::new();
        idb.extend_from_slice(&linktype.to_le_bytes());
        idb.extend_from_slice(&0u16.to_le_bytes());
        idb.extend_from_slice(&65535u32.to_le_bytes());

        let mut out = ng_block(0x0a0d_0d0a, &shb);
        out.extend_from_slice(&ng_block(1, &idb));

        for (ts, data) in packets {
            let mut epb = Vec::new();
            epb.extend_from_slice(&0u32.to_le_bytes());
            epb.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
            epb.extend_from_slice(&(*ts as u32).to_le_bytes());
            epb.extend_from_slice(&(data.len() as u32).to_le_bytes());
            epb.extend_from_slice(&(data.len() as u32).to_le_bytes());
            epb.extend_from_slice(data);
            pad4(&mut epb);
            out.extend_from_slice(&ng_block(6, &epb));
        }
        out
    }

    fn source(bytes: Vec<u8>) -> Result<PcapFileSource, CaptureError> {
        PcapFileSource::from_reader("test.pcap", Cursor::new(bytes), MIN_BUFFER_SIZE)
    }

    #[test]
    fn test_legacy_frames_and_timestamps() {
        let bytes = legacy_pcap(1, &[(1_705_314_600, 123_456, b"abc"), (1_705_314_601, 7, b"de")]);
        let mut source = source(bytes).unwrap();

        assert_eq!(source.linktype(), Linktype::ETHERNET);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.data, b"abc");
        assert_eq!(first.timestamp, Timestamp::new(1_705_314_600, 123_456));
        assert_eq!(first.linktype, Linktype::ETHERNET);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.data, b"de");
        assert_eq!(second.timestamp.micros, 7);

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_legacy_linux_cooked_linktype() {
        let bytes = legacy_pcap(113, &[]);
        let source = source(bytes).unwrap();
        assert_eq!(source.linktype(), Linktype::LINUX_SLL);
    }

    #[test]
    fn test_pcapng_frames() {
        let bytes = pcapng(1, &[(1_705_314_600_123_456, b"sip!")]);
        let mut source = source(bytes).unwrap();

        assert_eq!(source.linktype(), Linktype::ETHERNET);
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.data, b"sip!");
        assert_eq!(frame.timestamp, Timestamp::new(1_705_314_600, 123_456));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_pcapng_unsupported_interface() {
        let bytes = pcapng(127, &[]);
        let err = source(bytes).err().unwrap();
        assert!(matches!(
            err,
            CaptureError::UnsupportedLinktype { linktype: 127, .. }
        ));
    }

    #[test]
    fn test_garbage_is_open_failure() {
        let err = source(b"definitely not a capture file".to_vec()).err().unwrap();
        assert!(matches!(err, CaptureError::OpenFailed { .. }));
    }

    #[test]
    fn test_partial_trailing_record_ends_capture() {
        let mut bytes = legacy_pcap(1, &[(1, 0, b"abcdef")]);
        bytes.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
        let mut source = source(bytes).unwrap();

        assert!(source.next_frame().unwrap().is_some());
        assert!(!matches!(source.next_frame(), Ok(Some(_))));
    }

    #[test]
    fn test_full_snaplen_frames_fit_minimum_buffer() {
        let big = vec![0x5a; 65535];
        let bytes = legacy_pcap(1, &[(1, 0, big.as_slice()), (2, 0, big.as_slice())]);

        for buffer_size in [65536, MIN_BUFFER_SIZE] {
            let mut source =
                PcapFileSource::from_reader("big.pcap", Cursor::new(bytes.clone()), buffer_size)
                    .unwrap();
            assert_eq!(source.next_frame().unwrap().unwrap().data.len(), 65535);
            assert_eq!(source.next_frame().unwrap().unwrap().data.len(), 65535);
            assert!(source.next_frame().unwrap().is_none());
        }
    }

    #[test]
    fn test_ts_resolution() {
        assert_eq!(ts_resolution(6), Some(1_000_000));
        assert_eq!(ts_resolution(9), Some(1_000_000_000));
        assert_eq!(ts_resolution(0x80 | 10), Some(1024));
        assert_eq!(ts_resolution(0x7f), None);
    }
}
