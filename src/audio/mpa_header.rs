//! MPEG audio Layer III frame header parsing, used to find frame boundaries
//! in an unframed byte stream.

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 4;

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: usize,
    /// Total frame size in bytes, header included.
    pub frame_len: usize,
    /// Sample-frames produced per channel when decoded.
    pub samples_per_frame: usize,
}

impl FrameHeader {
    /// Parse the 4 header bytes at the start of `bytes`. Returns `None` when
    /// they are not a usable Layer III header (free-format and reserved
    /// values included).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let (b0, b1, b2, b3) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        if b0 != 0xFF || (b1 & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (b1 >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer III only
        if (b1 >> 1) & 0x03 != 1 {
            return None;
        }

        let bitrate_index = (b2 >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let sample_rate_index = ((b2 >> 2) & 0x03) as usize;
        if sample_rate_index == 3 {
            return None;
        }
        let padding = ((b2 >> 1) & 0x01) as usize;
        let channels = if (b3 >> 6) == 3 { 1 } else { 2 };

        let (bitrate_kbps, sample_rate, coefficient, samples_per_frame) = match version {
            MpegVersion::Mpeg1 => (
                BITRATES_V1_L3[bitrate_index],
                [44100, 48000, 32000][sample_rate_index],
                144,
                1152,
            ),
            MpegVersion::Mpeg2 => (
                BITRATES_V2_L3[bitrate_index],
                [22050, 24000, 16000][sample_rate_index],
                72,
                576,
            ),
            MpegVersion::Mpeg25 => (
                BITRATES_V2_L3[bitrate_index],
                [11025, 12000, 8000][sample_rate_index],
                72,
                576,
            ),
        };

        let frame_len = (coefficient * bitrate_kbps as usize * 1000) / sample_rate as usize + padding;

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            channels,
            frame_len,
            samples_per_frame,
        })
    }

    /// Encode this header back into 4 bytes (no CRC, no padding, private and
    /// emphasis bits clear). Mostly useful to synthesize streams.
    pub fn to_bytes(&self) -> Option<[u8; HEADER_LEN]> {
        let (version_bits, table, rates): (u8, &[u32; 15], [u32; 3]) = match self.version {
            MpegVersion::Mpeg1 => (3, &BITRATES_V1_L3, [44100, 48000, 32000]),
            MpegVersion::Mpeg2 => (2, &BITRATES_V2_L3, [22050, 24000, 16000]),
            MpegVersion::Mpeg25 => (0, &BITRATES_V2_L3, [11025, 12000, 8000]),
        };
        let bitrate_index = table.iter().skip(1).position(|&b| b == self.bitrate_kbps)? + 1;
        let rate_index = rates.iter().position(|&r| r == self.sample_rate)?;
        let mode = if self.channels == 1 { 3u8 } else { 0u8 };

        Some([
            0xFF,
            0xE0 | (version_bits << 3) | (1 << 1) | 0x01,
            ((bitrate_index as u8) << 4) | ((rate_index as u8) << 2),
            mode << 6,
        ])
    }
}

/// Number of ID3v2 tag bytes at the start of `bytes`, if it starts with a
/// complete-enough ID3v2 header. The returned size covers the 10 byte header,
/// the tag body and the optional footer.
pub fn id3v2_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return None;
    }
    let size_bytes = &bytes[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | b as usize);
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

/// Find the first offset in `bytes` where a Layer III header starts.
///
/// When the bytes right after the candidate frame are available they must
/// hold a matching header (or a tag), otherwise the candidate is treated as a
/// false sync inside audio data and the search goes on.
pub fn find_sync(bytes: &[u8]) -> Option<(usize, FrameHeader)> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    (0..=bytes.len() - HEADER_LEN)
        .filter(|&i| bytes[i] == 0xFF)
        .find_map(|i| {
            let header = FrameHeader::parse(&bytes[i..])?;
            followed_by_frame(bytes, i + header.frame_len, &header).then_some((i, header))
        })
}

fn followed_by_frame(bytes: &[u8], next: usize, header: &FrameHeader) -> bool {
    let Some(following) = bytes.get(next..next + HEADER_LEN) else {
        // Not enough data to tell yet.
        return true;
    };
    if following.starts_with(b"TAG") || following.starts_with(b"ID3") {
        return true;
    }
    FrameHeader::parse(following)
        .is_some_and(|h| h.version == header.version && h.sample_rate == header.sample_rate)
}
