use opus::{Channels, Decoder};

use crate::error::VoiceError;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Largest Opus frame: 120ms at 48kHz, per channel.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Stateful Opus decoder producing interleaved stereo f32 PCM.
pub struct AudioDecoder {
    decoder: Decoder,
}

impl AudioDecoder {
    /// Creates the decoder. Failure here means the codec is unavailable,
    /// which is fatal for the media transport.
    pub fn new() -> Result<Self, VoiceError> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| VoiceError::Decode(format!("failed to create Opus decoder: {e:?}")))?;
        Ok(Self { decoder })
    }

    /// Decodes one Opus frame into interleaved PCM samples.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>, VoiceError> {
        let mut pcm = vec![0.0f32; MAX_FRAME_SAMPLES * CHANNELS];
        let samples = self
            .decoder
            .decode_float(frame, &mut pcm, false)
            .map_err(|e| VoiceError::Decode(format!("failed to decode Opus frame: {e:?}")))?;
        pcm.truncate(samples * CHANNELS);
        Ok(pcm)
    }
}
