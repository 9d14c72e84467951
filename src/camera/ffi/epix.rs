// EPIX XCLIB bindings
// Links against the XCLIB runtime shipped with the PIXCI driver.

use crate::camera::frame_grabber::{GrabberDriver, STATUS_FORMAT_FILE_MISSING};
use std::ffi::{c_char, c_int, c_long, c_uchar, c_uint, c_ushort, CString};
use std::path::Path;

/// Board selection bitmap: first (only) PIXCI board.
const UNIT: c_int = 0x1;

#[link(name = "XCLIBW64")]
extern "C" {
    fn pxd_PIXCIopen(driverparms: *const c_char, formatname: *const c_char, formatfile: *const c_char) -> c_int;
    fn pxd_PIXCIclose() -> c_int;
    fn pxd_capturedBuffer(unitmap: c_int) -> c_long;
    fn pxd_capturedFieldCount(unitmap: c_int) -> c_uint;
    fn pxd_imageXdim() -> c_int;
    fn pxd_imageYdim() -> c_int;
    fn pxd_imageBdim() -> c_int;
    fn pxd_readuchar(
        unitmap: c_int,
        framebuf: c_long,
        ulx: c_int,
        uly: c_int,
        lrx: c_int,
        lry: c_int,
        membase: *mut c_uchar,
        cnt: usize,
        colorspace: *const c_char,
    ) -> c_int;
    fn pxd_readushort(
        unitmap: c_int,
        framebuf: c_long,
        ulx: c_int,
        uly: c_int,
        lrx: c_int,
        lry: c_int,
        membase: *mut c_ushort,
        cnt: usize,
        colorspace: *const c_char,
    ) -> c_int;
    fn pxd_goLiveSeq(
        unitmap: c_int,
        startbuf: c_long,
        endbuf: c_long,
        incbuf: c_long,
        numbuf: c_long,
        period: c_int,
    ) -> c_int;
    fn pxd_goUnLive(unitmap: c_int) -> c_int;
    fn pxd_goneLive(unitmap: c_int, rsvd: c_int) -> c_int;
}

/// Driver backed by the XCLIB shared library.
#[derive(Debug, Default)]
pub struct XclibDriver {
    _private: (),
}

impl XclibDriver {
    /// Bind to the loaded library. The board itself is opened by [`GrabberDriver::open`].
    pub fn new() -> Self {
        Self::default()
    }
}

fn gray() -> &'static [u8] {
    b"Gray\0"
}

// Reads return the number of samples copied, or a negative status.
fn read_status(code: c_int) -> i32 {
    if code < 0 {
        code
    } else {
        0
    }
}

impl GrabberDriver for XclibDriver {
    fn open(&mut self, format_file: &Path) -> i32 {
        let Ok(file) = CString::new(format_file.to_string_lossy().into_owned()) else {
            return STATUS_FORMAT_FILE_MISSING;
        };
        let empty = b"\0";
        // SAFETY: all three arguments are NUL-terminated and outlive the call.
        unsafe {
            pxd_PIXCIopen(
                empty.as_ptr().cast(),
                empty.as_ptr().cast(),
                file.as_ptr(),
            )
        }
    }

    fn close(&mut self) -> i32 {
        // SAFETY: no arguments; XCLIB reports -25 when not open.
        unsafe { pxd_PIXCIclose() }
    }

    fn captured_buffer(&mut self) -> usize {
        // SAFETY: plain query on an opened board.
        let buf = unsafe { pxd_capturedBuffer(UNIT) };
        usize::try_from(buf).unwrap_or(0)
    }

    fn captured_count(&mut self) -> u64 {
        // SAFETY: plain query on an opened board.
        u64::from(unsafe { pxd_capturedFieldCount(UNIT) })
    }

    fn image_dims(&mut self) -> (u32, u32, u8) {
        // SAFETY: plain queries on an opened board.
        let (x, y, b) = unsafe { (pxd_imageXdim(), pxd_imageYdim(), pxd_imageBdim()) };
        (
            u32::try_from(x).unwrap_or(0),
            u32::try_from(y).unwrap_or(0),
            u8::try_from(b).unwrap_or(8),
        )
    }

    fn read_u8(&mut self, buffer: usize, out: &mut [u8]) -> i32 {
        // SAFETY: `out` is valid for `out.len()` bytes; -1 selects the full image extent.
        let code = unsafe {
            pxd_readuchar(
                UNIT,
                buffer as c_long,
                0,
                0,
                -1,
                -1,
                out.as_mut_ptr(),
                out.len(),
                gray().as_ptr().cast(),
            )
        };
        read_status(code)
    }

    fn read_u16(&mut self, buffer: usize, out: &mut [u16]) -> i32 {
        // SAFETY: `out` is valid for `out.len()` samples; -1 selects the full image extent.
        let code = unsafe {
            pxd_readushort(
                UNIT,
                buffer as c_long,
                0,
                0,
                -1,
                -1,
                out.as_mut_ptr(),
                out.len(),
                gray().as_ptr().cast(),
            )
        };
        read_status(code)
    }

    fn go_live_seq(&mut self, start: usize, end: usize, count: usize) -> i32 {
        // SAFETY: buffer indices are plain integers validated by the driver.
        unsafe { pxd_goLiveSeq(UNIT, start as c_long, end as c_long, 1, count as c_long, 1) }
    }

    fn go_unlive(&mut self) -> i32 {
        // SAFETY: plain command on an opened board.
        unsafe { pxd_goUnLive(UNIT) }
    }

    fn gone_live(&mut self) -> bool {
        // SAFETY: plain query on an opened board.
        unsafe { pxd_goneLive(UNIT, 0) != 0 }
    }
}
