//! Video encoders feeding the outbound track.

use super::Frame;
use crate::error::EncodeError;
use bytes::Bytes;
use std::time::Duration;

/// Result of encoding a single frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded H.264 data in Annex B format (with start codes)
    pub data: Bytes,
    pub is_keyframe: bool,
    pub pts: u64,
    pub duration: Duration,
}

/// Compresses frames for the transport. One instance per session.
pub trait VideoEncoder: Send + 'static {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EncodeError>;

    /// Makes the next frame an IDR frame.
    fn force_keyframe(&mut self) {}
}

#[cfg(feature = "h264")]
pub use self::h264::H264Encoder;

#[cfg(feature = "h264")]
mod h264 {
    use super::{EncodedFrame, VideoEncoder};
    use crate::capture::convert::rgb24_to_i420;
    use crate::capture::Frame;
    use crate::error::EncodeError;
    use bytes::Bytes;
    use openh264::encoder::{Encoder, FrameType};
    use openh264::formats::YUVBuffer;

    /// H.264 encoder using openh264
    pub struct H264Encoder {
        encoder: Encoder,
        width: u32,
        height: u32,
        frame_count: u64,
    }

    impl H264Encoder {
        /// Dimensions are fixed for the lifetime of the encoder.
        pub fn new(width: u32, height: u32) -> Result<Self, EncodeError> {
            let encoder = Encoder::new().map_err(|e| EncodeError::Init(e.to_string()))?;
            Ok(Self {
                encoder,
                width,
                height,
                frame_count: 0,
            })
        }

        pub fn frame_count(&self) -> u64 {
            self.frame_count
        }
    }

    impl VideoEncoder for H264Encoder {
        fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
            let expected = (self.width * self.height * 3) as usize;
            if frame.width != self.width || frame.height != self.height || frame.data.len() != expected {
                return Err(EncodeError::InvalidFrame {
                    expected,
                    actual: frame.data.len(),
                });
            }

            let yuv = rgb24_to_i420(&frame.data, self.width, self.height);
            let yuv = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);
            let bitstream = self
                .encoder
                .encode(&yuv)
                .map_err(|e| EncodeError::Encode(e.to_string()))?;

            self.frame_count += 1;
            let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

            Ok(EncodedFrame {
                data: Bytes::from(bitstream.to_vec()),
                is_keyframe,
                pts: frame.pts,
                duration: frame.duration(),
            })
        }

        fn force_keyframe(&mut self) {
            self.encoder.force_intra_frame();
        }
    }

}
