//! Capture pipeline.
//!
//! Drives a capture source end to end: every frame is demultiplexed, its
//! UDP payload extracted, a synthetic header formatted, and the pair handed
//! to a [`MessageConsumer`]. Frames that are not UDP over IPv4, or that are
//! shorter than their headers claim, are skipped silently.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{self, CaptureInput, CaptureSettings, CaptureSource};
use crate::domain::CaptureFrame;
use crate::error::{CaptureError, ExtractError, LinkError};
use crate::header::format_header;
use crate::parser::{extract_udp, fixed_header_length, link_header_length};
use crate::store::MessageConsumer;

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames read from the source
    pub frames: u64,
    /// Payloads accepted by the consumer
    pub delivered: u64,
    /// Frames that were not UDP over IPv4
    pub not_relevant: u64,
    /// Frames shorter than their declared headers
    pub truncated: u64,
    /// Payloads the consumer declined
    pub rejected: u64,
    /// Whether the run ended because the running flag was cleared
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} messages, {} skipped, {} truncated, {} rejected",
            self.frames, self.delivered, self.not_relevant, self.truncated, self.rejected
        )
    }
}

/// Outcome of a single frame.
enum FrameOutcome {
    Delivered,
    NotRelevant,
    Truncated,
    Rejected,
}

/// Runs capture sources through the decoders into a message consumer.
pub struct CapturePipeline {
    settings: CaptureSettings,
    running: Arc<AtomicBool>,
}

impl CapturePipeline {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share a running flag; clearing it stops the run between frames.
    pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Open `input` and process it until exhausted or stopped.
    ///
    /// Fatal conditions (open failure, unsupported datalink, read errors)
    /// are returned; everything else is counted in the summary.
    pub fn run<C>(&self, input: &CaptureInput, consumer: &mut C) -> Result<RunSummary, CaptureError>
    where
        C: MessageConsumer + ?Sized,
    {
        let source = capture::open(input, &self.settings).map_err(|e| {
            tracing::error!("{}", e);
            e
        })?;
        self.run_source(source, consumer)
    }

    /// Process an already opened source. The source is dropped, and so
    /// closed, before this returns.
    pub fn run_source<C>(
        &self,
        mut source: Box<dyn CaptureSource>,
        consumer: &mut C,
    ) -> Result<RunSummary, CaptureError>
    where
        C: MessageConsumer + ?Sized,
    {
        let linktype = source.linktype();
        if fixed_header_length(linktype).is_err() {
            let err = CaptureError::UnsupportedLinktype {
                source_name: source.name().to_string(),
                linktype: linktype.0,
            };
            tracing::error!("{}", err);
            return Err(err);
        }

        source.set_running(Arc::clone(&self.running));
        tracing::info!("Reading {} (datalink {})", source.name(), linktype.0);

        let mut summary = RunSummary::default();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    summary.cancelled = !self.running.load(Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    return Err(e);
                }
            };

            summary.frames += 1;
            match process_frame(&frame, consumer) {
                Ok(FrameOutcome::Delivered) => summary.delivered += 1,
                Ok(FrameOutcome::NotRelevant) => summary.not_relevant += 1,
                Ok(FrameOutcome::Truncated) => summary.truncated += 1,
                Ok(FrameOutcome::Rejected) => summary.rejected += 1,
                Err(linktype) => {
                    let err = CaptureError::UnsupportedLinktype {
                        source_name: source.name().to_string(),
                        linktype,
                    };
                    tracing::error!("{}", err);
                    return Err(err);
                }
            }
        }

        tracing::info!("Finished {}: {}", source.name(), summary);
        Ok(summary)
    }
}

/// Run one frame through the decoders. `Err` carries an unsupported
/// datalink type.
fn process_frame<C>(frame: &CaptureFrame, consumer: &mut C) -> Result<FrameOutcome, i32>
where
    C: MessageConsumer + ?Sized,
{
    let link_len = match link_header_length(frame.linktype, &frame.data) {
        Ok(len) => len,
        Err(LinkError::Unsupported(linktype)) => return Err(linktype),
        Err(LinkError::NotRelevant) => return Ok(FrameOutcome::NotRelevant),
        Err(LinkError::Truncated) => {
            tracing::trace!("Truncated link header ({} bytes)", frame.data.len());
            return Ok(FrameOutcome::Truncated);
        }
    };

    let datagram = match extract_udp(&frame.data, link_len) {
        Ok(datagram) => datagram,
        Err(ExtractError::NotRelevant) => return Ok(FrameOutcome::NotRelevant),
        Err(ExtractError::Truncated) => {
            tracing::trace!("Truncated datagram ({} bytes captured)", frame.data.len());
            return Ok(FrameOutcome::Truncated);
        }
    };

    let header = format_header(frame.timestamp, datagram.src, datagram.dst);
    let payload = payload_text(datagram.payload);

    match consumer.submit(&header, &payload) {
        Some(_) => Ok(FrameOutcome::Delivered),
        None => {
            tracing::trace!("Consumer declined message: {}", header);
            Ok(FrameOutcome::Rejected)
        }
    }
}

/// Payload as text, ending at the first NUL byte.
fn payload_text(payload: &[u8]) -> Cow<'_, str> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PcapFileSource;
    use crate::domain::{Endpoint, Message};
    use crate::header::SyntheticHeader;
    use crate::testutil::{self, ethernet};
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    /// Records every submission.
    #[derive(Default)]
    struct Recorder {
        submitted: Vec<(String, String)>,
        accept: bool,
    }

    impl Recorder {
        fn accepting() -> Self {
            Self {
                submitted: Vec::new(),
                accept: true,
            }
        }
    }

    impl MessageConsumer for Recorder {
        fn submit(&mut self, header: &str, payload: &str) -> Option<Arc<Message>> {
            self.submitted.push((header.to_string(), payload.to_string()));
            if !self.accept {
                return None;
            }
            let parsed = SyntheticHeader::parse(header)?;
            Some(Arc::new(Message {
                call_id: "test".to_string(),
                timestamp: parsed.timestamp,
                src: parsed.src,
                dst: parsed.dst,
                summary: String::new(),
                payload: payload.to_string(),
            }))
        }
    }

    fn src() -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 5060)
    }

    fn dst() -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 5060)
    }

    fn ipv4_udp(payload: &[u8]) -> Vec<u8> {
        testutil::ipv4_udp(src(), dst(), payload)
    }

    fn pcap_source(linktype: u32, frames: &[Vec<u8>]) -> Box<dyn CaptureSource> {
        let packets: Vec<(u32, u32, &[u8])> = frames
            .iter()
            .map(|frame| (1_705_314_600u32, 123_456u32, frame.as_slice()))
            .collect();
        let bytes = testutil::legacy_pcap(linktype, &packets);
        Box::new(PcapFileSource::from_reader("memory", Cursor::new(bytes), capture::MIN_BUFFER_SIZE).unwrap())
    }

    #[test]
    fn test_single_udp_frame_end_to_end() {
        let frame = ethernet(0x0800, &ipv4_udp(b"0123456789"));
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();

        let summary = pipeline
            .run_source(pcap_source(1, &[frame]), &mut recorder)
            .unwrap();

        assert_eq!(recorder.submitted.len(), 1);
        let (header, payload) = &recorder.submitted[0];
        assert_eq!(
            header,
            &format_header(crate::domain::Timestamp::new(1_705_314_600, 123_456), src(), dst())
        );
        assert!(header.starts_with("U "));
        assert!(header.ends_with(" 10.0.0.1:5060 -> 10.0.0.2:5060"));
        assert_eq!(payload.len(), 10);
        assert_eq!(payload, "0123456789");

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.delivered, 1);
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_non_ip_ethertype_forwards_nothing() {
        let arp = ethernet(0x0806, &[0u8; 28]);
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();

        let summary = pipeline.run_source(pcap_source(1, &[arp]), &mut recorder).unwrap();

        assert!(recorder.submitted.is_empty());
        assert_eq!(summary.not_relevant, 1);
    }

    #[test]
    fn test_truncated_frames_are_skipped() {
        let good = ethernet(0x0800, &ipv4_udp(b"INVITE sip:bob SIP/2.0\r\n"));
        let frames: Vec<Vec<u8>> = (0..good.len()).map(|cut| good[..cut].to_vec()).collect();
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();

        let summary = pipeline.run_source(pcap_source(1, &frames), &mut recorder).unwrap();

        assert!(recorder.submitted.is_empty());
        assert_eq!(summary.frames, good.len() as u64);
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.truncated, good.len() as u64);
    }

    #[test]
    fn test_linux_cooked_capture() {
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&ipv4_udp(b"OPTIONS sip:a SIP/2.0\r\n"));
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();

        pipeline.run_source(pcap_source(113, &[frame]), &mut recorder).unwrap();

        assert_eq!(recorder.submitted.len(), 1);
        assert_eq!(recorder.submitted[0].1, "OPTIONS sip:a SIP/2.0\r\n");
    }

    #[test]
    fn test_unsupported_linktype_is_fatal() {
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();

        let err = pipeline
            .run_source(pcap_source(127, &[vec![0u8; 64]]), &mut recorder)
            .unwrap_err();

        assert!(matches!(err, CaptureError::UnsupportedLinktype { linktype: 127, .. }));
        assert!(recorder.submitted.is_empty());
    }

    #[test]
    fn test_rejected_payloads_do_not_stop_the_run() {
        let frame = ethernet(0x0800, &ipv4_udp(b"hello"));
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::default();

        let summary = pipeline
            .run_source(pcap_source(1, &[frame.clone(), frame]), &mut recorder)
            .unwrap();

        assert_eq!(recorder.submitted.len(), 2);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.delivered, 0);
    }

    #[test]
    fn test_cleared_running_flag_cancels() {
        let frame = ethernet(0x0800, &ipv4_udp(b"hello"));
        let running = Arc::new(AtomicBool::new(false));
        let pipeline = CapturePipeline::new(CaptureSettings::default()).with_running(running);
        let mut recorder = Recorder::accepting();

        let summary = pipeline.run_source(pcap_source(1, &[frame]), &mut recorder).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn test_clearing_flag_mid_run_stops_after_current_frame() {
        let frame = ethernet(0x0800, &ipv4_udp(b"hello"));
        let running = Arc::new(AtomicBool::new(true));
        let pipeline =
            CapturePipeline::new(CaptureSettings::default()).with_running(Arc::clone(&running));
        let mut seen = 0;
        let mut consumer = |_: &str, _: &str| -> Option<Arc<Message>> {
            seen += 1;
            running.store(false, Ordering::SeqCst);
            None
        };

        let summary = pipeline
            .run_source(
                pcap_source(1, &[frame.clone(), frame.clone(), frame]),
                &mut consumer,
            )
            .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(summary.frames, 1);
        assert!(summary.cancelled);
    }

    #[test]
    fn test_open_failure_processes_nothing() {
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut recorder = Recorder::accepting();
        let input = CaptureInput::File("/nonexistent/sipscope/none.pcap".into());

        let err = pipeline.run(&input, &mut recorder).unwrap_err();

        assert!(matches!(err, CaptureError::OpenFailed { .. }));
        assert!(recorder.submitted.is_empty());
    }

    #[test]
    fn test_payload_text_stops_at_nul() {
        assert_eq!(payload_text(b"abc\0def"), "abc");
        assert_eq!(payload_text(b"abc"), "abc");
    }

    #[test]
    fn test_closure_consumer() {
        let frame = ethernet(0x0800, &ipv4_udp(b"hello"));
        let pipeline = CapturePipeline::new(CaptureSettings::default());
        let mut seen = 0;
        let mut consumer = |_: &str, payload: &str| -> Option<Arc<Message>> {
            assert_eq!(payload, "hello");
            seen += 1;
            None
        };

        pipeline.run_source(pcap_source(1, &[frame]), &mut consumer).unwrap();
        assert_eq!(seen, 1);
    }
}
