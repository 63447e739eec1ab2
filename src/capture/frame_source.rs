use super::convert;
use super::{Frame, MonitorRegion, ScreenGrabber, TimeBase};
use crate::error::CaptureError;
use futures::Stream;
use std::time::Duration;
use tokio::time::Instant;

/// Paced producer of RGB24 frames for one session.
///
/// `next_frame` is the only suspension point: it waits out the frame period,
/// grabs on the blocking pool, converts, and stamps the frame with the next
/// index. The source cannot be rewound.
pub struct FrameSource {
    region: MonitorRegion,
    frame_rate_hz: u32,
    time_base: TimeBase,
    period: Duration,
    frame_index: u64,
    last_capture: Option<Instant>,
    // None while a grab is in flight, or for good after a worker panic
    grabber: Option<Box<dyn ScreenGrabber>>,
}

impl FrameSource {
    pub fn new(grabber: Box<dyn ScreenGrabber>, region: MonitorRegion, frame_rate_hz: u32) -> Self {
        let frame_rate_hz = frame_rate_hz.max(1);
        let time_base = TimeBase::per_frame(frame_rate_hz);
        FrameSource {
            region,
            frame_rate_hz,
            time_base,
            period: time_base.tick(),
            frame_index: 0,
            last_capture: None,
            grabber: Some(grabber),
        }
    }

    pub fn region(&self) -> MonitorRegion {
        self.region
    }

    pub fn frame_rate_hz(&self) -> u32 {
        self.frame_rate_hz
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Index the next produced frame will carry.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if let Some(last) = self.last_capture {
            tokio::time::sleep_until(last + self.period).await;
        }

        let mut grabber = self.grabber.take().ok_or(CaptureError::SourceExhausted)?;
        let region = self.region;
        let started = Instant::now();
        let (grabber, result) = tokio::task::spawn_blocking(move || {
            let result = grabber.grab(&region).and_then(|raw| {
                if raw.width != region.width || raw.height != region.height {
                    return Err(CaptureError::Grab(format!(
                        "grabbed {}x{}, expected {}x{}",
                        raw.width, raw.height, region.width, region.height
                    )));
                }
                convert::to_rgb24(&raw)
            });
            (grabber, result)
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))?;
        self.grabber = Some(grabber);

        let data = result?;
        self.last_capture = Some(started);
        let pts = self.frame_index;
        self.frame_index += 1;

        Ok(Frame {
            width: region.width,
            height: region.height,
            data,
            pts,
            time_base: self.time_base,
        })
    }

    /// Endless stream of capture results; errors do not end it.
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame, CaptureError>> {
        futures::stream::unfold(self, |mut source| async move {
            let frame = source.next_frame().await;
            Some((frame, source))
        })
    }
}
