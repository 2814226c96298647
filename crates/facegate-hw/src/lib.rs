//! facegate-hw — webcam capture for the live verification loop.
//!
//! Provides V4L2-based camera access and conversion of the common webcam
//! pixel formats to RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::Frame;
