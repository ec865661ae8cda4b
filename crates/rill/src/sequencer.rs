//! Receive-side reassembly of byte ranges
//!
//! The sequencer accepts possibly overlapping, possibly out-of-order ranges
//! and keeps only bytes it has not seen before. Out-of-order bytes are held
//! in non-overlapping segments keyed by offset; as soon as the segment at the
//! delivery offset exists, the contiguous run is moved to the readable queue.

use crate::{Result, StreamError};
use bytes::{Buf, Bytes};
use rill_proto::StreamFrame;
use std::collections::{BTreeMap, VecDeque};

/// In-order reassembler for one stream
#[derive(Debug, Default)]
pub struct StreamSequencer {
    /// Out-of-order segments, non-overlapping, all at or past `num_bytes_delivered`
    buffered: BTreeMap<u64, Bytes>,
    /// Contiguous data ready for the reader
    readable: VecDeque<Bytes>,
    /// Offset of the next byte to move into `readable`
    num_bytes_delivered: u64,
    /// Bytes handed to the reader
    num_bytes_consumed: u64,
    /// Bytes currently held in `buffered` and `readable`
    num_bytes_buffered: usize,
    /// Final stream size, once a fin has arrived
    close_offset: Option<u64>,
    /// Largest end offset seen
    highest_offset: u64,
    /// Frames handed to the sequencer
    num_frames_received: u64,
    /// Frames that carried nothing new
    num_duplicate_frames_received: u64,
}

impl StreamSequencer {
    /// Create an empty sequencer
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a range of stream data.
    ///
    /// Duplicates and overlaps are not errors; only the bytes not seen before
    /// are kept. Ranges that contradict a known final offset are rejected.
    pub fn on_stream_frame(&mut self, frame: &StreamFrame) -> Result<()> {
        self.num_frames_received += 1;
        let end_offset = frame.end_offset();

        if frame.data.is_empty() && !frame.fin {
            return Err(StreamError::InvalidStreamFrame(
                "Empty stream frame without FIN set",
            ));
        }

        if let Some(close_offset) = self.close_offset {
            if end_offset > close_offset {
                return Err(StreamError::InvalidStreamData(
                    "Stream data received beyond the final offset",
                ));
            }
            if frame.fin && end_offset != close_offset {
                return Err(StreamError::InvalidStreamData(
                    "Stream received multiple final offsets",
                ));
            }
        } else if frame.fin && end_offset < self.highest_offset {
            return Err(StreamError::InvalidStreamData(
                "Final offset is smaller than data already received",
            ));
        }

        let learned_fin = frame.fin && self.close_offset.is_none();
        if frame.fin {
            self.close_offset = Some(end_offset);
        }
        self.highest_offset = self.highest_offset.max(end_offset);

        let inserted = self.insert(frame.offset, frame.data.clone());
        if inserted == 0 && !learned_fin {
            self.num_duplicate_frames_received += 1;
        }

        self.flush_contiguous();
        Ok(())
    }

    /// Store the parts of `data` not already delivered or buffered. Returns
    /// the number of new bytes kept.
    fn insert(&mut self, mut offset: u64, mut data: Bytes) -> usize {
        if offset < self.num_bytes_delivered {
            let already_delivered = self.num_bytes_delivered - offset;
            if already_delivered >= data.len() as u64 {
                return 0;
            }
            data.advance(already_delivered as usize);
            offset = self.num_bytes_delivered;
        }

        let mut inserted = 0;
        while !data.is_empty() {
            // Skip past the segment covering `offset`, if any.
            if let Some((&segment_offset, segment)) = self.buffered.range(..=offset).next_back() {
                let segment_end = segment_offset + segment.len() as u64;
                if segment_end > offset {
                    let covered = segment_end - offset;
                    if covered >= data.len() as u64 {
                        break;
                    }
                    data.advance(covered as usize);
                    offset = segment_end;
                    continue;
                }
            }

            // `offset` starts a gap that runs to the next segment.
            let gap = match self.buffered.range(offset..).next() {
                Some((&next_offset, _)) => (next_offset - offset) as usize,
                None => data.len(),
            };
            let piece = data.split_to(gap.min(data.len()));
            let len = piece.len();
            self.buffered.insert(offset, piece);
            self.num_bytes_buffered += len;
            inserted += len;
            offset += len as u64;
        }
        inserted
    }

    /// Move the contiguous run at the delivery offset into the readable queue
    fn flush_contiguous(&mut self) {
        while let Some(entry) = self.buffered.first_entry() {
            if *entry.key() != self.num_bytes_delivered {
                break;
            }
            let data = entry.remove();
            self.num_bytes_delivered += data.len() as u64;
            self.readable.push_back(data);
        }
    }

    /// Take the next contiguous chunk for the reader
    pub fn read(&mut self) -> Option<Bytes> {
        let data = self.readable.pop_front()?;
        self.num_bytes_consumed += data.len() as u64;
        self.num_bytes_buffered -= data.len();
        Some(data)
    }

    /// Drop everything buffered; later reads return nothing
    pub fn discard(&mut self) {
        self.buffered.clear();
        self.readable.clear();
        self.num_bytes_buffered = 0;
    }

    /// Check if every byte up to the final offset has been read
    pub fn is_closed(&self) -> bool {
        matches!(self.close_offset, Some(close_offset) if self.num_bytes_consumed >= close_offset)
    }

    /// Check if contiguous data is waiting for the reader
    pub fn has_bytes_to_read(&self) -> bool {
        !self.readable.is_empty()
    }

    /// Bytes of contiguous data waiting for the reader
    pub fn readable_bytes(&self) -> usize {
        self.readable.iter().map(Bytes::len).sum()
    }

    /// Final stream size, if known
    pub fn close_offset(&self) -> Option<u64> {
        self.close_offset
    }

    /// Bytes handed to the reader
    pub fn num_bytes_consumed(&self) -> u64 {
        self.num_bytes_consumed
    }

    /// Bytes held, readable or out of order
    pub fn num_bytes_buffered(&self) -> usize {
        self.num_bytes_buffered
    }

    /// Frames handed to the sequencer
    pub fn num_frames_received(&self) -> u64 {
        self.num_frames_received
    }

    /// Frames that carried no new bytes
    pub fn num_duplicate_frames_received(&self) -> u64 {
        self.num_duplicate_frames_received
    }
}
