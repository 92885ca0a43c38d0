// SPDX-License-Identifier: MPL-2.0
//! Single-slot handoff of decoded frames to the presentation side.
//!
//! The decode thread checks [`FrameSlot::is_occupied`] before doing any
//! expensive per-frame work and offers at most one frame at a time. The
//! consumer takes the frame, which frees the slot for the next one.
//!
//! A staged frame either owns copied planes or owns a reference to the
//! decoder's hardware surface ([`SurfaceFrame`]). Surface references are
//! released when the frame is dropped, on whichever thread drops it.

use super::hw_surface::{is_hardware_format, surface_sw_format};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pixel layouts the presentation side accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Nv12,
    Yuv420p,
    Bgra,
}

impl FrameFormat {
    pub fn from_pixel(format: Pixel) -> Option<Self> {
        match format {
            Pixel::NV12 => Some(Self::Nv12),
            Pixel::YUV420P => Some(Self::Yuv420p),
            Pixel::BGRA => Some(Self::Bgra),
            _ => None,
        }
    }
}

/// One image plane in system memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// Owned reference to a decoded hardware surface.
///
/// Holding it keeps the surface out of the decoder's pool; dropping it gives
/// the surface back.
pub struct SurfaceFrame {
    frame: frame::Video,
    layout: FrameFormat,
}

impl std::fmt::Debug for SurfaceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceFrame")
            .field("hw_format", &self.hw_format())
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl SurfaceFrame {
    /// Takes ownership of a decoded hardware frame whose surface layout the
    /// presentation side understands. Anything else is handed back unchanged.
    pub fn adopt(frame: frame::Video) -> Result<Self, frame::Video> {
        if !is_hardware_format(frame.format()) {
            return Err(frame);
        }
        match surface_sw_format(&frame).and_then(FrameFormat::from_pixel) {
            Some(layout) => Ok(Self { frame, layout }),
            None => Err(frame),
        }
    }

    /// Hardware pixel format, e.g. `D3D11` or `VAAPI`.
    pub fn hw_format(&self) -> Pixel {
        self.frame.format()
    }

    /// Layout of the pixels inside the surface.
    pub fn layout(&self) -> FrameFormat {
        self.layout
    }

    /// Native handles, borrowed for as long as this frame is alive.
    pub fn handle(&self) -> SurfaceHandle<'_> {
        // SAFETY: the frame is valid and its data pointers stay valid while
        // `self` holds the reference.
        let data = unsafe { (*self.frame.as_ptr()).data };
        SurfaceHandle {
            format: self.hw_format(),
            data: [data[0], data[1], data[2], data[3]],
            _owner: PhantomData,
        }
    }

    /// The underlying FFmpeg frame, e.g. for `av_hwframe_map`.
    pub fn as_frame(&self) -> &frame::Video {
        &self.frame
    }

    /// Gives up the guard and transfers the reference to the caller.
    pub fn into_frame(self) -> frame::Video {
        self.frame
    }
}

/// Borrowed view of a surface's native handles.
///
/// FFmpeg conventions apply: `D3D11` keeps the texture in `data[0]` and the
/// array slice in `data[1]`; `VAAPI`, `DXVA2` and `VIDEOTOOLBOX` keep the
/// surface in `data[3]`; `CUDA` keeps device pointers per plane.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandle<'a> {
    pub format: Pixel,
    pub data: [*mut u8; 4],
    _owner: PhantomData<&'a SurfaceFrame>,
}

/// Where the pixels of a staged frame live.
#[derive(Debug)]
pub enum FrameData {
    /// Copies in system memory.
    Planes(Vec<Plane>),
    /// The decoder's own surface, not copied.
    Surface(SurfaceFrame),
}

/// A frame staged for presentation.
#[derive(Debug)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: FrameData,
    /// Presentation time in seconds.
    pub pts_secs: f64,
}

impl PresentedFrame {
    /// Wraps a hardware surface without copying it.
    pub fn from_surface(surface: SurfaceFrame, pts_secs: f64) -> Self {
        Self {
            width: surface.frame.width(),
            height: surface.frame.height(),
            format: surface.layout,
            data: FrameData::Surface(surface),
            pts_secs,
        }
    }

    /// System-memory planes, or `None` for a surface frame.
    pub fn planes(&self) -> Option<&[Plane]> {
        match &self.data {
            FrameData::Planes(planes) => Some(planes),
            FrameData::Surface(_) => None,
        }
    }

    pub fn surface(&self) -> Option<&SurfaceFrame> {
        match &self.data {
            FrameData::Surface(surface) => Some(surface),
            FrameData::Planes(_) => None,
        }
    }

    /// Copies a decoded system-memory frame. Returns `None` for formats the
    /// presentation side cannot display or for frames without plane data.
    pub fn copy_from(source: &frame::Video, pts_secs: f64) -> Option<Self> {
        let format = FrameFormat::from_pixel(source.format())?;
        let planes = (0..source.planes())
            .map(|index| Plane {
                data: source.data(index).to_vec(),
                stride: source.stride(index),
            })
            .collect::<Vec<_>>();
        if planes.is_empty() || planes.iter().any(|plane| plane.data.is_empty()) {
            return None;
        }
        Some(Self {
            width: source.width(),
            height: source.height(),
            format,
            data: FrameData::Planes(planes),
            pts_secs,
        })
    }
}

/// Display surface notified when a frame is waiting in the slot.
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self, width: u32, height: u32);
}

/// Holds at most one frame awaiting presentation.
#[derive(Default)]
pub struct FrameSlot {
    occupied: AtomicBool,
    frame: Mutex<Option<PresentedFrame>>,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("occupied", &self.is_occupied())
            .finish_non_exhaustive()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(&self) -> MutexGuard<'_, Option<PresentedFrame>> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }

    /// Offers a frame. Returns false, dropping the frame, if the slot is full.
    pub fn try_offer(&self, frame: PresentedFrame) -> bool {
        if self
            .occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let (width, height) = (frame.width, frame.height);
        *self.frame() = Some(frame);

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.frame_ready(width, height);
        }
        true
    }

    /// Takes the pending frame and frees the slot.
    pub fn take(&self) -> Option<PresentedFrame> {
        let frame = self.frame().take();
        if frame.is_some() {
            self.occupied.store(false, Ordering::Release);
        }
        frame
    }

    /// Discards any pending frame.
    pub fn clear(&self) {
        self.frame().take();
        self.occupied.store(false, Ordering::Release);
    }
}
