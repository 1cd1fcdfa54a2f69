//! Test utilities for usb-courier
//!
//! Provides mock devices and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mounted_device;
//!
//! # fn main() {
//! let device = create_mounted_device("/dev/sdb", "/media/usb");
//! assert!(device.is_mounted());
//! # }
//! ```

use crate::device::Device;
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create an unmounted removable device
pub fn create_mock_device(id: &str) -> Device {
    Device::new(id).with_description(format!("Mock Storage {}", id))
}

/// Create a removable device with one mount location
///
/// # Example
/// ```
/// use common::test_utils::create_mounted_device;
///
/// let device = create_mounted_device("/dev/sdb", "/Volumes/MY DRIVE");
/// assert_eq!(device.mountpoints.len(), 1);
/// ```
pub fn create_mounted_device(id: &str, mountpoint: &str) -> Device {
    create_mock_device(id).with_mountpoint(mountpoint)
}

/// Create a fixed (non-removable) disk
pub fn create_fixed_device(id: &str, mountpoint: &str) -> Device {
    Device::new(id)
        .with_description("Internal Disk")
        .with_mountpoint(mountpoint)
        .removable(false)
}

/// Create `count` unmounted devices named `/dev/sdb`, `/dev/sdc`, ...
pub fn create_mock_device_list(count: u8) -> Vec<Device> {
    (0..count)
        .map(|i| create_mock_device(&format!("/dev/sd{}", (b'b' + i) as char)))
        .collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
