// SPDX-License-Identifier: MPL-2.0
//! Hardware surface negotiation and transfer.
//!
//! The decoder offers a list of pixel formats through its `get_format`
//! callback. The choice is made by [`negotiate_pixel_format`], a pure function,
//! so the policy can be tested without a decoder. Frames that end up in GPU
//! memory are either handed to the renderer as they are (zero-copy) or copied
//! back with [`HardwareTransfer`] when they need CPU work.

use super::failure_run::{FailureReport, FailureRun};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use std::ffi::CString;
use std::os::raw::c_void;
use std::ptr;

/// `AV_PIX_FMT_FLAG_HWACCEL` from libavutil/pixdesc.h.
const PIX_FMT_FLAG_HWACCEL: u64 = 1 << 3;

/// System-memory formats the presentation side consumes directly.
pub const FAST_SYSTEM_FORMATS: [Pixel; 3] = [Pixel::NV12, Pixel::YUV420P, Pixel::BGRA];

/// 10-bit system-memory formats that require tone mapping.
pub const TEN_BIT_FORMATS: [Pixel; 2] = [Pixel::YUV420P10LE, Pixel::P010LE];

/// Device types tried, in order, when none is configured.
#[cfg(target_os = "windows")]
const DEFAULT_DEVICE_TYPES: &[&str] = &["d3d11va", "dxva2"];
#[cfg(target_os = "macos")]
const DEFAULT_DEVICE_TYPES: &[&str] = &["videotoolbox"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_DEVICE_TYPES: &[&str] = &["vaapi", "cuda", "vdpau"];

/// Returns true for formats whose data lives in a hardware surface.
pub fn is_hardware_format(format: Pixel) -> bool {
    if format == Pixel::None {
        return false;
    }
    // SAFETY: av_pix_fmt_desc_get returns a pointer into a static table or null.
    unsafe {
        let desc = ffi::av_pix_fmt_desc_get(format.into());
        !desc.is_null() && ((*desc).flags & PIX_FMT_FLAG_HWACCEL) != 0
    }
}

/// Chooses an output pixel format from the decoder's offer.
///
/// Order of preference:
/// 1. the first offered NV12, YUV420P or BGRA format
/// 2. when only 10-bit system formats are offered, a hardware surface format,
///    unless `force_software_hdr` asks for the 10-bit system path
/// 3. any 10-bit system format
/// 4. the first offered format
///
/// Returns `None` only for an empty offer.
///
/// # Example
///
/// ```
/// use ffmpeg_next::format::Pixel;
/// use vidlens::video_player::negotiate_pixel_format;
///
/// let offered = [Pixel::YUV420P10LE, Pixel::NV12];
/// assert_eq!(negotiate_pixel_format(&offered, false), Some(Pixel::NV12));
/// ```
pub fn negotiate_pixel_format(offered: &[Pixel], force_software_hdr: bool) -> Option<Pixel> {
    if let Some(fast) = offered
        .iter()
        .find(|format| FAST_SYSTEM_FORMATS.contains(format))
    {
        return Some(*fast);
    }

    let has_ten_bit = offered.iter().any(|format| TEN_BIT_FORMATS.contains(format));
    if has_ten_bit && !force_software_hdr {
        if let Some(hardware) = offered.iter().find(|format| is_hardware_format(**format)) {
            return Some(*hardware);
        }
    }

    if let Some(ten_bit) = offered.iter().find(|format| TEN_BIT_FORMATS.contains(format)) {
        return Some(*ten_bit);
    }

    offered.first().copied()
}

/// Policy read by the `get_format` callback through the codec context's opaque pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfacePolicy {
    pub force_software_hdr: bool,
    /// The renderer takes hardware surfaces directly.
    pub zero_copy: bool,
}

/// Chooses an output pixel format under a surface policy.
///
/// With `zero_copy` an offered hardware surface format wins so frames stay in
/// GPU memory. Otherwise this is [`negotiate_pixel_format`].
pub fn negotiate_surface_format(offered: &[Pixel], policy: SurfacePolicy) -> Option<Pixel> {
    if policy.zero_copy {
        if let Some(hardware) = offered.iter().find(|format| is_hardware_format(**format)) {
            return Some(*hardware);
        }
    }
    negotiate_pixel_format(offered, policy.force_software_hdr)
}

/// Pixel layout inside a hardware surface, read from its frames context.
pub fn surface_sw_format(frame: &frame::Video) -> Option<Pixel> {
    if !is_hardware_format(frame.format()) {
        return None;
    }
    // SAFETY: hardware frames keep their frames context alive; its data is an
    // AVHWFramesContext by contract of libavutil.
    unsafe {
        let frames_ctx = (*frame.as_ptr()).hw_frames_ctx;
        if frames_ctx.is_null() || (*frames_ctx).data.is_null() {
            return None;
        }
        let ctx = (*frames_ctx).data as *const ffi::AVHWFramesContext;
        Some(Pixel::from((*ctx).sw_format))
    }
}

/// `get_format` callback installed on hardware-enabled decoders.
///
/// # Safety
///
/// Called by libavcodec with a valid context and an `AV_PIX_FMT_NONE`
/// terminated list. `opaque` is either null or points to a [`SurfacePolicy`]
/// that outlives the decoder.
pub unsafe extern "C" fn get_format(
    ctx: *mut ffi::AVCodecContext,
    fmts: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    if fmts.is_null() {
        return ffi::AVPixelFormat::AV_PIX_FMT_NONE;
    }

    let mut offered = Vec::new();
    let mut i = 0usize;
    loop {
        let fmt = *fmts.add(i);
        if fmt == ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            break;
        }
        offered.push(Pixel::from(fmt));
        i += 1;
    }

    let policy = if ctx.is_null() || (*ctx).opaque.is_null() {
        tracing::warn!("get_format called without surface policy, using defaults");
        SurfacePolicy::default()
    } else {
        *((*ctx).opaque as *const SurfacePolicy)
    };

    tracing::debug!(?offered, "decoder offered pixel formats");
    match negotiate_surface_format(&offered, policy) {
        Some(chosen) => {
            tracing::debug!(?chosen, hardware = is_hardware_format(chosen), "selected pixel format");
            chosen.into()
        }
        None => ffi::AVPixelFormat::AV_PIX_FMT_NONE,
    }
}

/// Owned reference to an FFmpeg hardware device context.
pub struct HwDeviceContext {
    ptr: *mut ffi::AVBufferRef,
    name: String,
}

impl HwDeviceContext {
    /// Creates a device of the named type (e.g. "vaapi", "d3d11va").
    pub fn create(type_name: &str) -> Option<Self> {
        let c_name = CString::new(type_name).ok()?;
        // SAFETY: c_name is a valid NUL-terminated string for the duration of the call.
        let device_type = unsafe { ffi::av_hwdevice_find_type_by_name(c_name.as_ptr()) };
        if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            tracing::debug!(device = type_name, "unknown hardware device type");
            return None;
        }

        let mut device: *mut ffi::AVBufferRef = ptr::null_mut();
        // SAFETY: device is an out-pointer; null device name and options select defaults.
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut device, device_type, ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || device.is_null() {
            tracing::debug!(device = type_name, error = ret, "hardware device creation failed");
            return None;
        }

        tracing::info!(device = type_name, "hardware device context created");
        Some(Self {
            ptr: device,
            name: type_name.to_string(),
        })
    }

    /// Creates the configured device, or the first platform default that works.
    pub fn create_preferred(configured: Option<&str>) -> Option<Self> {
        match configured {
            Some(name) => Self::create(name),
            None => DEFAULT_DEVICE_TYPES.iter().find_map(|name| Self::create(name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds this device and the format callback to a codec context that has not
    /// been opened yet. `policy` must outlive the opened decoder.
    pub fn attach(&self, context: &mut ffmpeg::codec::Context, policy: &SurfacePolicy) {
        // SAFETY: the context is not yet opened; av_buffer_ref gives the decoder its
        // own reference so dropping self later is fine.
        unsafe {
            let ctx = context.as_mut_ptr();
            (*ctx).hw_device_ctx = ffi::av_buffer_ref(self.ptr);
            (*ctx).get_format = Some(get_format);
            (*ctx).opaque = policy as *const SurfacePolicy as *mut c_void;
        }
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr came from av_hwdevice_ctx_create and is released once.
            unsafe { ffi::av_buffer_unref(&mut self.ptr) };
        }
    }
}

// SAFETY: the device reference is owned exclusively and only touched by the
// decode thread that owns the session.
unsafe impl Send for HwDeviceContext {}

/// Returns true when a frame has usable geometry and plane pointers.
///
/// Hardware frames carry a surface handle instead of strides, so only the
/// first data pointer is checked for them.
pub fn is_frame_valid(frame: &frame::Video) -> bool {
    if frame.width() == 0 || frame.height() == 0 {
        return false;
    }
    // SAFETY: as_ptr is valid for the lifetime of the frame.
    unsafe {
        let raw = frame.as_ptr();
        if raw.is_null() || (*raw).data[0].is_null() {
            return false;
        }
        if is_hardware_format(frame.format()) {
            return true;
        }
        (*raw).linesize[0] > 0
    }
}

/// GPU to system memory copies with consecutive-failure accounting.
#[derive(Debug, Default)]
pub struct HardwareTransfer {
    failures: FailureRun,
}

impl HardwareTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies a hardware frame into system memory, keeping pts and properties.
    ///
    /// Returns `None` when the transfer failed. The caller drops the frame.
    pub fn transfer(&mut self, hw_frame: &frame::Video) -> Option<frame::Video> {
        let mut sw_frame = frame::Video::empty();
        // SAFETY: both frames are valid; sw_frame is empty so libavutil allocates it.
        let ret = unsafe {
            let ret = ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), hw_frame.as_ptr(), 0);
            if ret >= 0 {
                ffi::av_frame_copy_props(sw_frame.as_mut_ptr(), hw_frame.as_ptr())
            } else {
                ret
            }
        };

        if ret < 0 {
            let error = ffmpeg::Error::from(ret);
            match self.failures.record_failure() {
                FailureReport::Transient => tracing::debug!(
                    %error,
                    attempt = self.failures.count(),
                    "hardware frame transfer failed"
                ),
                FailureReport::Persistent => tracing::warn!(
                    %error,
                    "hardware frame transfers keep failing, frames are being skipped"
                ),
                FailureReport::Suppressed => {}
            }
            return None;
        }

        self.failures.record_success();
        Some(sw_frame)
    }
}
