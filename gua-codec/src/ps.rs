//! MPEG-2 program stream (PS) demuxer.
//!
//! Extracts the video elementary stream from a PS byte stream, one access unit
//! per pack. Input may be split at arbitrary boundaries (RTP payloads, file
//! chunks); incomplete units are buffered until the rest arrives.

use bytes::Bytes;

use crate::CodecId;

const START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];
const PROGRAM_END: u8 = 0xB9;
const PACK_HEADER: u8 = 0xBA;
const SYSTEM_HEADER: u8 = 0xBB;
const PROGRAM_STREAM_MAP: u8 = 0xBC;

const PACK_HEADER_LEN: usize = 14;
const PES_HEADER_LEN: usize = 9;

/// Video stream types from the program stream map.
const VIDEO_STREAM_TYPES: &[(u8, CodecId)] = &[
    (0x1B, CodecId::H264),
    (0x10, CodecId::MPEG4),
    // SVAC, no decoder
    (0x80, CodecId::NONE),
];

/// One demuxed video access unit.
#[derive(Debug, Clone)]
pub struct PsFrame {
    pub codec_id: CodecId,
    pub index: u32,
    /// Payload length announced by the PES headers of this unit.
    pub expected_len: usize,
    pub data: Bytes,
}

impl PsFrame {
    /// Bytes announced by the PES headers that never arrived.
    pub fn remaining(&self) -> usize {
        self.expected_len.saturating_sub(self.data.len())
    }
}

enum Step {
    NeedMore,
    Resync(usize),
    Skip(usize),
    Pack(usize),
    End,
    Map(usize),
    Video { len: usize, header: usize },
}

pub struct PsDemuxer {
    pending: Vec<u8>,
    video_codec: CodecId,
    audio_stream_type: Option<u8>,
    frame: Vec<u8>,
    expected_len: usize,
    next_index: u32,
    skipped: usize,
}

impl Default for PsDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl PsDemuxer {
    pub fn new() -> Self {
        Self::with_video_codec(CodecId::NONE)
    }

    /// Codec assumed until a program stream map says otherwise.
    pub fn with_video_codec(codec_id: CodecId) -> Self {
        Self {
            pending: Vec::new(),
            video_codec: codec_id,
            audio_stream_type: None,
            frame: Vec::new(),
            expected_len: 0,
            next_index: 0,
            skipped: 0,
        }
    }

    pub fn video_codec(&self) -> CodecId {
        self.video_codec
    }

    pub fn audio_stream_type(&self) -> Option<u8> {
        self.audio_stream_type
    }

    /// Bytes discarded while searching for a start code.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    /// Feeds a chunk and returns the access units completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<PsFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0;
        loop {
            match next_unit(&self.pending[offset..]) {
                Step::NeedMore => break,
                Step::Resync(n) => {
                    self.skipped += n;
                    offset += n;
                }
                Step::Skip(len) => {
                    offset += len;
                }
                Step::Pack(len) => {
                    if let Some(frame) = self.flush() {
                        frames.push(frame);
                    }
                    offset += len;
                }
                Step::End => {
                    if let Some(frame) = self.flush() {
                        frames.push(frame);
                    }
                    offset += 4;
                }
                Step::Map(len) => {
                    let (video, audio) = parse_stream_map(&self.pending[offset..offset + len]);
                    if let Some(codec_id) = video {
                        if codec_id != self.video_codec {
                            log::info!("ps video codec changed: {} -> {}", self.video_codec, codec_id);
                            self.video_codec = codec_id;
                        }
                    }
                    if audio.is_some() {
                        self.audio_stream_type = audio;
                    }
                    offset += len;
                }
                Step::Video { len, header } => {
                    self.frame
                        .extend_from_slice(&self.pending[offset + header..offset + len]);
                    self.expected_len += len - header;
                    offset += len;
                }
            }
        }

        if self.skipped > 0 && offset > 0 {
            log::trace!("ps demux skipped {} bytes so far", self.skipped);
        }
        self.pending.drain(..offset);
        frames
    }

    /// Flushes the unit in progress, including the received part of a
    /// truncated video PES.
    pub fn finish(&mut self) -> Option<PsFrame> {
        let pending = std::mem::take(&mut self.pending);
        if pending.len() > PES_HEADER_LEN
            && pending[..3] == START_CODE_PREFIX
            && (0xE0..=0xEF).contains(&pending[3])
        {
            let len = 6 + be16(&pending[4..6]);
            let header = PES_HEADER_LEN + pending[8] as usize;
            if header <= len && pending.len() > header {
                let end = pending.len().min(len);
                self.frame.extend_from_slice(&pending[header..end]);
                self.expected_len += len - header;
            }
        }
        self.flush()
    }

    fn flush(&mut self) -> Option<PsFrame> {
        if self.frame.is_empty() {
            self.expected_len = 0;
            return None;
        }
        let frame = PsFrame {
            codec_id: self.video_codec,
            index: self.next_index,
            expected_len: self.expected_len,
            data: Bytes::from(std::mem::take(&mut self.frame)),
        };
        self.next_index = self.next_index.wrapping_add(1);
        self.expected_len = 0;
        Some(frame)
    }
}

fn next_unit(buf: &[u8]) -> Step {
    if buf.len() < 4 {
        return Step::NeedMore;
    }
    if buf[..3] != START_CODE_PREFIX {
        return match find_start_code(&buf[1..]) {
            Some(pos) => Step::Resync(pos + 1),
            // keep a possible partial prefix at the tail
            None => Step::Resync(buf.len() - 3),
        };
    }

    match buf[3] {
        PROGRAM_END => Step::End,
        PACK_HEADER => {
            if buf.len() < PACK_HEADER_LEN {
                return Step::NeedMore;
            }
            let len = PACK_HEADER_LEN + (buf[13] & 0x07) as usize;
            if buf.len() < len {
                Step::NeedMore
            } else {
                Step::Pack(len)
            }
        }
        0xE0..=0xEF => {
            if buf.len() < PES_HEADER_LEN {
                return Step::NeedMore;
            }
            let len = 6 + be16(&buf[4..6]);
            if buf.len() < len {
                return Step::NeedMore;
            }
            let header = PES_HEADER_LEN + buf[8] as usize;
            if header > len {
                log::warn!("malformed video pes: header {} > packet {}", header, len);
                return Step::Skip(len);
            }
            Step::Video { len, header }
        }
        SYSTEM_HEADER | PROGRAM_STREAM_MAP | 0xBD..=0xDF | 0xF0..=0xFF => {
            if buf.len() < 6 {
                return Step::NeedMore;
            }
            let len = 6 + be16(&buf[4..6]);
            if buf.len() < len {
                Step::NeedMore
            } else if buf[3] == PROGRAM_STREAM_MAP {
                Step::Map(len)
            } else {
                Step::Skip(len)
            }
        }
        code => {
            log::debug!("unexpected start code 0x{:02x} in program stream", code);
            Step::Resync(1)
        }
    }
}

/// Returns the video codec and the audio stream type announced by a program
/// stream map.
fn parse_stream_map(unit: &[u8]) -> (Option<CodecId>, Option<u8>) {
    let mut video = None;
    let mut audio = None;
    if unit.len() < 12 {
        return (video, audio);
    }

    let info_len = be16(&unit[8..10]);
    let map_len_at = 10 + info_len;
    if unit.len() < map_len_at + 2 {
        return (video, audio);
    }
    let map_len = be16(&unit[map_len_at..map_len_at + 2]);
    let mut p = map_len_at + 2;
    let end = (p + map_len).min(unit.len());
    while p + 4 <= end {
        let stream_type = unit[p];
        let stream_id = unit[p + 1];
        let es_info_len = be16(&unit[p + 2..p + 4]);
        match stream_id {
            0xE0..=0xEF => {
                let codec_id = VIDEO_STREAM_TYPES
                    .iter()
                    .find(|(t, _)| *t == stream_type)
                    .map(|(_, id)| *id)
                    .unwrap_or_else(|| {
                        log::debug!("unknown video stream type 0x{:02x}", stream_type);
                        CodecId::NONE
                    });
                video = Some(codec_id);
            }
            0xC0..=0xDF => audio = Some(stream_type),
            _ => {}
        }
        p += 4 + es_info_len;
    }
    (video, audio)
}

fn find_start_code(buf: &[u8]) -> Option<usize> {
    buf.windows(3).position(|w| w == START_CODE_PREFIX)
}

fn be16(b: &[u8]) -> usize {
    ((b[0] as usize) << 8) | b[1] as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_header(stuffing: u8) -> Vec<u8> {
        let mut v = vec![
            0x00, 0x00, 0x01, 0xBA, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x00, 0x00, 0x03,
            0xF8 | stuffing,
        ];
        v.extend(std::iter::repeat_n(0xFF, stuffing as usize));
        v
    }

    fn stream_map(entries: &[(u8, u8)]) -> Vec<u8> {
        let map_len = entries.len() * 4;
        let len = 2 + 2 + 2 + map_len + 4;
        let mut v = vec![0x00, 0x00, 0x01, 0xBC, (len >> 8) as u8, len as u8, 0xE0, 0xFF];
        v.extend([0x00, 0x00]);
        v.extend([(map_len >> 8) as u8, map_len as u8]);
        for (stream_type, stream_id) in entries {
            v.extend([*stream_type, *stream_id, 0x00, 0x00]);
        }
        v.extend([0x00; 4]);
        v
    }

    fn pes(stream_id: u8, payload: &[u8]) -> Vec<u8> {
        let header_data = [0x21, 0x00, 0x01, 0x00, 0x01];
        let len = 3 + header_data.len() + payload.len();
        let mut v = vec![0x00, 0x00, 0x01, stream_id, (len >> 8) as u8, len as u8, 0x80, 0x80];
        v.push(header_data.len() as u8);
        v.extend(header_data);
        v.extend_from_slice(payload);
        v
    }

    fn sample_stream() -> Vec<u8> {
        let mut s = pack_header(2);
        s.extend(stream_map(&[(0x1B, 0xE0), (0x90, 0xC0)]));
        s.extend(pes(0xE0, &[0, 0, 0, 1, 0x67, 1, 2]));
        s.extend(pes(0xE0, &[0, 0, 0, 1, 0x65, 3]));
        s.extend(pes(0xC0, &[9, 9, 9]));
        s.extend(pack_header(0));
        s.extend(pes(0xE0, &[0, 0, 0, 1, 0x41, 4]));
        s
    }

    #[test]
    fn test_demux_whole_stream() {
        let mut demuxer = PsDemuxer::new();
        let frames = demuxer.push(&sample_stream());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].codec_id, CodecId::H264);
        assert_eq!(frames[0].index, 0);
        assert_eq!(&frames[0].data[..], &[0, 0, 0, 1, 0x67, 1, 2, 0, 0, 0, 1, 0x65, 3]);
        assert_eq!(frames[0].remaining(), 0);
        assert_eq!(demuxer.audio_stream_type(), Some(0x90));

        let last = demuxer.finish().unwrap();
        assert_eq!(last.index, 1);
        assert_eq!(&last.data[..], &[0, 0, 0, 1, 0x41, 4]);
        assert!(demuxer.finish().is_none());
    }

    #[test]
    fn test_demux_byte_by_byte() {
        let mut demuxer = PsDemuxer::new();
        let mut frames = Vec::new();
        for b in sample_stream() {
            frames.extend(demuxer.push(&[b]));
        }
        frames.extend(demuxer.finish());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data.len(), 13);
        assert_eq!(frames[1].data.len(), 6);
        assert_eq!(demuxer.skipped_bytes(), 0);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut stream = vec![0x12, 0x34, 0x00, 0x56];
        stream.extend(sample_stream());
        let mut demuxer = PsDemuxer::new();
        let frames = demuxer.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(demuxer.skipped_bytes(), 4);
    }

    #[test]
    fn test_truncated_pes_reports_remaining() {
        let mut stream = pack_header(0);
        let full = pes(0xE0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        stream.extend_from_slice(&full[..full.len() - 3]);

        let mut demuxer = PsDemuxer::with_video_codec(CodecId::MPEG4);
        assert!(demuxer.push(&stream).is_empty());
        let frame = demuxer.finish().unwrap();
        assert_eq!(frame.codec_id, CodecId::MPEG4);
        assert_eq!(frame.expected_len, 8);
        assert_eq!(frame.data.len(), 5);
        assert_eq!(frame.remaining(), 3);
    }

    #[test]
    fn test_stream_map_codec_switch() {
        let mut stream = pack_header(0);
        stream.extend(stream_map(&[(0x10, 0xE0)]));
        stream.extend(pes(0xE0, &[1]));
        stream.extend(pack_header(0));
        stream.extend(stream_map(&[(0x1B, 0xE0)]));
        stream.extend(pes(0xE0, &[2]));
        stream.extend([0x00, 0x00, 0x01, PROGRAM_END]);

        let mut demuxer = PsDemuxer::new();
        let frames = demuxer.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].codec_id, CodecId::MPEG4);
        assert_eq!(frames[1].codec_id, CodecId::H264);
    }
}
