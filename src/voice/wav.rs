//! PCM to WAV container conversion

/// Size of the canonical RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

/// Sample rate assumed when a PCM payload does not declare one
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Channel count assumed when a PCM payload does not declare one
pub const DEFAULT_CHANNELS: u16 = 1;

/// Bit depth assumed when a PCM payload does not declare one
pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

/// Layout of a raw PCM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
        }
    }
}

impl PcmFormat {
    /// Bytes per single-channel sample, rounded up to whole bytes
    #[must_use]
    pub const fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample.div_ceil(8)
    }

    /// `channels * bytes_per_sample`
    #[must_use]
    pub const fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bytes_per_sample())
    }

    /// `sample_rate * channels * bytes_per_sample`
    #[must_use]
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }
}

/// Wrap raw little-endian PCM bytes in a WAV container.
///
/// Produces a 44-byte `RIFF`/`WAVE`/`fmt `/`data` header (PCM format tag 1)
/// followed by the payload copied verbatim. Sizes wider than 32 bits
/// saturate at `u32::MAX`.
#[must_use]
pub fn pcm_to_wav(pcm: &[u8], format: PcmFormat) -> Vec<u8> {
    let data_size = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let chunk_size = data_size.saturating_add(36);

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    // RIFF descriptor
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&chunk_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&format.channels.to_le_bytes());
    wav.extend_from_slice(&format.sample_rate.to_le_bytes());
    wav.extend_from_slice(&format.byte_rate().to_le_bytes());
    wav.extend_from_slice(&format.block_align().to_le_bytes());
    wav.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}
