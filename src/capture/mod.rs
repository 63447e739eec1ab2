//! Paced capture of a display region into encoded video frames.
//!
//! Every session owns its own [`FrameSource`] (grabber + pacing cursor) and
//! [`VideoEncoder`]; nothing in this module is shared between sessions.

pub mod convert;
pub mod encoder;
pub mod frame_source;
pub mod grabber;

pub use encoder::{EncodedFrame, VideoEncoder};
pub use frame_source::FrameSource;
pub use grabber::ScreenGrabber;

use crate::error::{CaptureError, EncodeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rectangle of the display surface that is streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl MonitorRegion {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        MonitorRegion {
            left,
            top,
            width,
            height,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for MonitorRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}x{}", self.left, self.top, self.width, self.height)
    }
}

impl FromStr for MonitorRegion {
    type Err = String;

    /// Parses `left,top,WIDTHxHEIGHT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("expected LEFT,TOP,WIDTHxHEIGHT, got '{s}'");
        let mut parts = s.split(',');
        let (Some(left), Some(top), Some(size), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let (width, height) = size.split_once(['x', 'X']).ok_or_else(bad)?;
        Ok(MonitorRegion {
            left: left.trim().parse().map_err(|_| bad())?,
            top: top.trim().parse().map_err(|_| bad())?,
            width: width.trim().parse().map_err(|_| bad())?,
            height: height.trim().parse().map_err(|_| bad())?,
        })
    }
}

/// Byte order of one pixel in a captured buffer, as declared by the grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// B, G, R, A
    Bgra8,
    /// B, G, R, unused (X11 24-bit depth on a little-endian server)
    Bgrx8,
    /// R, G, B, A
    Rgba8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Unconverted pixels straight from the display surface.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

/// Presentation time base of a source: `num / den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub fn per_frame(frame_rate_hz: u32) -> Self {
        TimeBase {
            num: 1,
            den: frame_rate_hz,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.num) / f64::from(self.den))
    }
}

/// One captured frame in packed RGB24, ready for the encoder.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Equal to the source's frame index when the frame was produced.
    pub pts: u64,
    pub time_base: TimeBase,
}

impl Frame {
    pub fn duration(&self) -> Duration {
        self.time_base.tick()
    }
}

/// Builds the per-session capture and encoding stages.
pub trait MediaFactory: Send + Sync + 'static {
    /// Called on the blocking pool; may connect to the display server.
    fn grabber(&self) -> Result<Box<dyn ScreenGrabber>, CaptureError>;

    fn encoder(&self, region: &MonitorRegion) -> Result<Box<dyn VideoEncoder>, EncodeError>;
}

/// X11 capture and openh264 encoding, subject to the enabled features.
#[derive(Debug, Clone, Default)]
pub struct SystemMedia {
    display: Option<String>,
}

impl SystemMedia {
    pub fn new(display: Option<String>) -> Self {
        SystemMedia { display }
    }
}

impl MediaFactory for SystemMedia {
    fn grabber(&self) -> Result<Box<dyn ScreenGrabber>, CaptureError> {
        #[cfg(feature = "x11")]
        {
            Ok(Box::new(grabber::X11Grabber::connect(self.display.as_deref())?))
        }
        #[cfg(not(feature = "x11"))]
        {
            let _ = &self.display;
            Err(CaptureError::DisplayUnavailable(
                "built without the x11 feature".into(),
            ))
        }
    }

    fn encoder(&self, region: &MonitorRegion) -> Result<Box<dyn VideoEncoder>, EncodeError> {
        #[cfg(feature = "h264")]
        {
            Ok(Box::new(encoder::H264Encoder::new(region.width, region.height)?))
        }
        #[cfg(not(feature = "h264"))]
        {
            let _ = region;
            Err(EncodeError::Init("built without the h264 feature".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_and_prints() {
        let region: MonitorRegion = "10,-20,1280x720".parse().unwrap();
        assert_eq!(region, MonitorRegion::new(10, -20, 1280, 720));
        assert_eq!(region.to_string(), "10,-20,1280x720");
        assert_eq!(region.pixel_count(), 1280 * 720);
    }

    #[test]
    fn region_rejects_garbage() {
        assert!("1280x720".parse::<MonitorRegion>().is_err());
        assert!("0,0,1280".parse::<MonitorRegion>().is_err());
        assert!("0,0,1280x720,5".parse::<MonitorRegion>().is_err());
        assert!("a,0,1280x720".parse::<MonitorRegion>().is_err());
    }

    #[test]
    fn time_base_tick() {
        let tb = TimeBase::per_frame(30);
        assert_eq!(tb, TimeBase { num: 1, den: 30 });
        let tick = tb.tick().as_secs_f64();
        assert!((tick - 1.0 / 30.0).abs() < 1e-9);
    }
}
