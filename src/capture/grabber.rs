use super::{MonitorRegion, RawImage};
use crate::error::CaptureError;

/// Blocking access to the display surface.
///
/// Implementations are driven from tokio's blocking pool, one grabber per
/// session, so they may block on the display server freely.
pub trait ScreenGrabber: Send + 'static {
    fn grab(&mut self, region: &MonitorRegion) -> Result<RawImage, CaptureError>;
}

#[cfg(feature = "x11")]
pub use self::x11::X11Grabber;

#[cfg(feature = "x11")]
mod x11 {
    use super::ScreenGrabber;
    use crate::capture::{MonitorRegion, PixelLayout, RawImage};
    use crate::error::CaptureError;
    use x11rb::connection::Connection;
    use x11rb::protocol::xproto::{ConnectionExt, ImageFormat, ImageOrder, Window};
    use x11rb::rust_connection::RustConnection;

    /// Reads the root window of an X display with `GetImage`.
    pub struct X11Grabber {
        conn: RustConnection,
        root: Window,
        layout: PixelLayout,
    }

    impl X11Grabber {
        pub fn connect(display: Option<&str>) -> Result<Self, CaptureError> {
            let (conn, screen_num) = x11rb::connect(display)
                .map_err(|e| CaptureError::DisplayUnavailable(e.to_string()))?;

            let setup = conn.setup();
            let screen = setup.roots.get(screen_num).ok_or_else(|| {
                CaptureError::DisplayUnavailable(format!("screen {screen_num} does not exist"))
            })?;
            let depth = screen.root_depth;
            let bits_per_pixel = setup
                .pixmap_formats
                .iter()
                .find(|f| f.depth == depth)
                .map(|f| f.bits_per_pixel);
            if bits_per_pixel != Some(32) {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "root depth {depth} stored with {bits_per_pixel:?} bits per pixel"
                )));
            }
            if setup.image_byte_order != ImageOrder::LSB_FIRST {
                return Err(CaptureError::UnsupportedFormat(
                    "MSB-first image byte order".into(),
                ));
            }
            let layout = if depth == 32 {
                PixelLayout::Bgra8
            } else {
                PixelLayout::Bgrx8
            };
            let root = screen.root;

            tracing::debug!(screen = screen_num, depth, ?layout, "connected to X display");
            Ok(X11Grabber { conn, root, layout })
        }
    }

    impl ScreenGrabber for X11Grabber {
        fn grab(&mut self, region: &MonitorRegion) -> Result<RawImage, CaptureError> {
            let out_of_range = || {
                CaptureError::Grab(format!("region {region} exceeds X11 coordinate range"))
            };
            let x = i16::try_from(region.left).map_err(|_| out_of_range())?;
            let y = i16::try_from(region.top).map_err(|_| out_of_range())?;
            let width = u16::try_from(region.width).map_err(|_| out_of_range())?;
            let height = u16::try_from(region.height).map_err(|_| out_of_range())?;

            let reply = self
                .conn
                .get_image(ImageFormat::Z_PIXMAP, self.root, x, y, width, height, !0)
                .map_err(|e| CaptureError::Grab(e.to_string()))?
                .reply()
                .map_err(|e| CaptureError::Grab(e.to_string()))?;

            Ok(RawImage {
                width: region.width,
                height: region.height,
                layout: self.layout,
                data: reply.data,
            })
        }
    }
}
