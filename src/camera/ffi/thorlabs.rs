// Thorlabs uc480 camera and Kinesis KCube piezo bindings

use crate::camera::usb::{MmiParams, PiezoDriver, StageOptions, UsbCameraDriver};
use std::ffi::{c_char, c_double, c_int, c_short, c_uint, c_void, CString};
use std::ptr;

type Hids = c_uint;

const IS_PIXELCLOCK_CMD_SET: c_uint = 6;
const IS_CM_MONO8: c_int = 6;
const IS_AOI_IMAGE_SET_POS: c_uint = 3;
const IS_AOI_IMAGE_GET_POS: c_uint = 4;
const IS_AOI_IMAGE_SET_SIZE: c_uint = 5;
const IS_AOI_IMAGE_GET_SIZE: c_uint = 6;
const IS_EXPOSURE_CMD_SET_EXPOSURE: c_uint = 12;
const IS_WAIT: c_int = 1;

#[repr(C)]
#[derive(Default)]
struct IsSize2d {
    width: c_int,
    height: c_int,
}

#[repr(C)]
#[derive(Default)]
struct IsPoint2d {
    x: c_int,
    y: c_int,
}

#[link(name = "uc480_64")]
extern "C" {
    fn is_InitCamera(handle: *mut Hids, hwnd: *mut c_void) -> c_int;
    fn is_ExitCamera(handle: Hids) -> c_int;
    fn is_PixelClock(handle: Hids, command: c_uint, param: *mut c_void, size: c_uint) -> c_int;
    fn is_SetColorMode(handle: Hids, mode: c_int) -> c_int;
    fn is_AOI(handle: Hids, command: c_uint, param: *mut c_void, size: c_uint) -> c_int;
    fn is_Exposure(handle: Hids, command: c_uint, param: *mut c_void, size: c_uint) -> c_int;
    fn is_SetFrameRate(handle: Hids, fps: c_double, new_fps: *mut c_double) -> c_int;
    fn is_SetAllocatedImageMem(
        handle: Hids,
        width: c_int,
        height: c_int,
        bits: c_int,
        mem: *mut c_char,
        mem_id: *mut c_int,
    ) -> c_int;
    fn is_SetImageMem(handle: Hids, mem: *mut c_char, mem_id: c_int) -> c_int;
    fn is_FreeImageMem(handle: Hids, mem: *mut c_char, mem_id: c_int) -> c_int;
    fn is_CaptureVideo(handle: Hids, wait: c_int) -> c_int;
    fn is_StopLiveVideo(handle: Hids, wait: c_int) -> c_int;
}

/// uc480 driver. Owns the image memory the camera writes into.
pub struct Uc480Driver {
    handle: Hids,
    memory: Vec<u8>,
    mem_id: c_int,
}

impl Uc480Driver {
    /// Unopened driver.
    pub fn new() -> Self {
        Self {
            handle: 0,
            memory: Vec::new(),
            mem_id: 0,
        }
    }

    fn free_memory(&mut self) {
        if self.memory.is_empty() {
            return;
        }
        // SAFETY: the buffer was registered with this handle and mem id.
        unsafe {
            is_FreeImageMem(self.handle, self.memory.as_mut_ptr().cast(), self.mem_id);
        }
        self.memory = Vec::new();
    }
}

impl Default for Uc480Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbCameraDriver for Uc480Driver {
    fn init_camera(&mut self) -> i32 {
        self.handle = 0;
        // SAFETY: handle is a valid out pointer; no window is attached.
        unsafe { is_InitCamera(&mut self.handle, ptr::null_mut()) }
    }

    fn exit_camera(&mut self) -> i32 {
        self.free_memory();
        // SAFETY: handle came from is_InitCamera.
        unsafe { is_ExitCamera(self.handle) }
    }

    fn set_pixel_clock(&mut self, mhz: u32) -> i32 {
        let mut clock: c_uint = mhz;
        // SAFETY: param points at a c_uint of the advertised size.
        unsafe {
            is_PixelClock(
                self.handle,
                IS_PIXELCLOCK_CMD_SET,
                (&mut clock as *mut c_uint).cast(),
                std::mem::size_of::<c_uint>() as c_uint,
            )
        }
    }

    fn set_mono8(&mut self) -> i32 {
        // SAFETY: plain command on an opened camera.
        unsafe { is_SetColorMode(self.handle, IS_CM_MONO8) }
    }

    fn set_aoi_size(&mut self, width: u32, height: u32) -> i32 {
        let mut size = IsSize2d {
            width: width as c_int,
            height: height as c_int,
        };
        // SAFETY: param points at an IS_SIZE_2D of the advertised size.
        unsafe {
            is_AOI(
                self.handle,
                IS_AOI_IMAGE_SET_SIZE,
                (&mut size as *mut IsSize2d).cast(),
                std::mem::size_of::<IsSize2d>() as c_uint,
            )
        }
    }

    fn aoi_size(&mut self) -> (u32, u32) {
        let mut size = IsSize2d::default();
        // SAFETY: param points at an IS_SIZE_2D of the advertised size.
        unsafe {
            is_AOI(
                self.handle,
                IS_AOI_IMAGE_GET_SIZE,
                (&mut size as *mut IsSize2d).cast(),
                std::mem::size_of::<IsSize2d>() as c_uint,
            );
        }
        (size.width.max(0) as u32, size.height.max(0) as u32)
    }

    fn set_aoi_pos(&mut self, x: u32, y: u32) -> i32 {
        let mut pos = IsPoint2d {
            x: x as c_int,
            y: y as c_int,
        };
        // SAFETY: param points at an IS_POINT_2D of the advertised size.
        unsafe {
            is_AOI(
                self.handle,
                IS_AOI_IMAGE_SET_POS,
                (&mut pos as *mut IsPoint2d).cast(),
                std::mem::size_of::<IsPoint2d>() as c_uint,
            )
        }
    }

    fn aoi_pos(&mut self) -> (u32, u32) {
        let mut pos = IsPoint2d::default();
        // SAFETY: param points at an IS_POINT_2D of the advertised size.
        unsafe {
            is_AOI(
                self.handle,
                IS_AOI_IMAGE_GET_POS,
                (&mut pos as *mut IsPoint2d).cast(),
                std::mem::size_of::<IsPoint2d>() as c_uint,
            );
        }
        (pos.x.max(0) as u32, pos.y.max(0) as u32)
    }

    fn set_exposure(&mut self, ms: f64) -> f64 {
        let mut exposure: c_double = ms;
        // SAFETY: the driver writes the applied exposure back into the same double.
        unsafe {
            is_Exposure(
                self.handle,
                IS_EXPOSURE_CMD_SET_EXPOSURE,
                (&mut exposure as *mut c_double).cast(),
                std::mem::size_of::<c_double>() as c_uint,
            );
        }
        exposure
    }

    fn set_frame_rate(&mut self, fps: f64) -> f64 {
        let mut applied: c_double = 0.0;
        // SAFETY: applied is a valid out pointer.
        unsafe {
            is_SetFrameRate(self.handle, fps, &mut applied);
        }
        applied
    }

    fn allocate_image_memory(&mut self, width: u32, height: u32) -> i32 {
        self.free_memory();
        self.memory = vec![0u8; width as usize * height as usize];
        let mut mem_id: c_int = 0;
        // SAFETY: the buffer lives in self.memory until free_memory; its length matches
        // width * height at 8 bits per pixel.
        let code = unsafe {
            is_SetAllocatedImageMem(
                self.handle,
                width as c_int,
                height as c_int,
                8,
                self.memory.as_mut_ptr().cast(),
                &mut mem_id,
            )
        };
        if code != 0 {
            self.memory = Vec::new();
            return code;
        }
        self.mem_id = mem_id;
        // SAFETY: buffer and id were registered above.
        unsafe { is_SetImageMem(self.handle, self.memory.as_mut_ptr().cast(), mem_id) }
    }

    fn copy_image(&mut self, out: &mut [u8]) -> i32 {
        if out.len() != self.memory.len() {
            return -1;
        }
        // SAFETY: the driver may write into memory concurrently; a volatile copy keeps the
        // read from being elided and a torn frame is acceptable for live display.
        unsafe {
            let src = self.memory.as_ptr();
            for (i, px) in out.iter_mut().enumerate() {
                *px = ptr::read_volatile(src.add(i));
            }
        }
        0
    }

    fn capture_video(&mut self) -> i32 {
        // SAFETY: plain command on an opened camera.
        unsafe { is_CaptureVideo(self.handle, IS_WAIT) }
    }

    fn stop_live_video(&mut self) -> i32 {
        // SAFETY: plain command on an opened camera.
        unsafe { is_StopLiveVideo(self.handle, IS_WAIT) }
    }
}

#[link(name = "Thorlabs.MotionControl.DeviceManager")]
extern "C" {
    fn TLI_BuildDeviceList() -> c_short;
}

#[link(name = "Thorlabs.MotionControl.KCube.Piezo")]
extern "C" {
    fn PCC_Open(serial: *const c_char) -> c_short;
    fn PCC_Close(serial: *const c_char);
    fn PCC_StartPolling(serial: *const c_char, ms: c_int) -> bool;
    fn PCC_StopPolling(serial: *const c_char);
    fn PCC_SetMaxOutputVoltage(serial: *const c_char, tenths: c_short) -> c_short;
    fn PCC_SetFeedbackLoopPIconsts(serial: *const c_char, prop: c_short, integral: c_short) -> c_short;
    fn PCC_SetPositionControlMode(serial: *const c_char, mode: c_int) -> c_short;
    fn PCC_SetVoltageSource(serial: *const c_char, source: c_int) -> c_short;
    fn PCC_SetHubAnalogInput(serial: *const c_char, input: c_int) -> c_short;
    fn PCC_SetMMIParams(
        serial: *const c_char,
        mode: c_short,
        rate: c_short,
        step: i32,
        direction: c_short,
        preset1: i32,
        preset2: i32,
        intensity: i16,
    ) -> c_short;
    fn PCC_GetMMIParams(
        serial: *const c_char,
        mode: *mut c_short,
        rate: *mut c_short,
        step: *mut i32,
        direction: *mut c_short,
        preset1: *mut i32,
        preset2: *mut i32,
        intensity: *mut i16,
    ) -> c_short;
    fn PCC_Enable(serial: *const c_char) -> c_short;
    fn PCC_Disable(serial: *const c_char) -> c_short;
    fn PCC_Disconnect(serial: *const c_char) -> c_short;
    fn PCC_SetOutputVoltage(serial: *const c_char, volts: c_short) -> c_short;
    fn PCC_GetOutputVoltage(serial: *const c_char) -> c_short;
}

/// KCube piezo controller driven through Kinesis.
#[derive(Default)]
pub struct KinesisPiezo {
    serial: CString,
}

impl KinesisPiezo {
    /// Unconnected controller.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PiezoDriver for KinesisPiezo {
    fn open(&mut self, serial: &str) -> i32 {
        let Ok(serial) = CString::new(serial) else {
            return -1;
        };
        self.serial = serial;
        // SAFETY: serial is NUL-terminated and owned by self.
        unsafe {
            TLI_BuildDeviceList();
            i32::from(PCC_Open(self.serial.as_ptr()))
        }
    }

    fn configure(&mut self, options: &StageOptions) -> i32 {
        let s = self.serial.as_ptr();
        // SAFETY: s stays valid for the whole block.
        unsafe {
            PCC_StartPolling(s, options.poll_ms as c_int);
            let steps = [
                PCC_SetMaxOutputVoltage(s, options.max_voltage_tenths as c_short),
                PCC_SetFeedbackLoopPIconsts(s, options.proportional, options.integral),
                PCC_SetPositionControlMode(s, c_int::from(options.loop_mode)),
                PCC_SetVoltageSource(s, c_int::from(options.voltage_source)),
                PCC_SetHubAnalogInput(s, c_int::from(options.input_source)),
                PCC_Enable(s),
            ];
            steps.into_iter().find(|&c| c != 0).map_or(0, i32::from)
        }
    }

    fn set_output_voltage(&mut self, raw: i32) -> i32 {
        // SAFETY: serial is NUL-terminated and owned by self.
        i32::from(unsafe { PCC_SetOutputVoltage(self.serial.as_ptr(), raw.clamp(0, i32::from(c_short::MAX)) as c_short) })
    }

    fn output_voltage(&mut self) -> i32 {
        // SAFETY: serial is NUL-terminated and owned by self.
        i32::from(unsafe { PCC_GetOutputVoltage(self.serial.as_ptr()) })
    }

    fn set_mmi_params(&mut self, p: &MmiParams) -> i32 {
        // SAFETY: serial is NUL-terminated and owned by self.
        i32::from(unsafe {
            PCC_SetMMIParams(
                self.serial.as_ptr(),
                p.joystick_mode,
                p.joystick_rate,
                p.step,
                p.direction,
                p.preset1,
                p.preset2,
                p.display_intensity,
            )
        })
    }

    fn mmi_params(&mut self) -> MmiParams {
        let mut p = MmiParams::default();
        // SAFETY: every out pointer refers to a field of `p`.
        unsafe {
            PCC_GetMMIParams(
                self.serial.as_ptr(),
                &mut p.joystick_mode,
                &mut p.joystick_rate,
                &mut p.step,
                &mut p.direction,
                &mut p.preset1,
                &mut p.preset2,
                &mut p.display_intensity,
            );
        }
        p
    }

    fn shutdown(&mut self) {
        let s = self.serial.as_ptr();
        // SAFETY: s stays valid for the whole block.
        unsafe {
            PCC_Disable(s);
            PCC_StopPolling(s);
            PCC_Disconnect(s);
            PCC_Close(s);
        }
    }
}
