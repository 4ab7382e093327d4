//! Camera permission derived from device-node access.
//!
//! Linux has no interactive camera prompt: access is decided by the
//! permissions on `/dev/videoN`, so the state is always already decided.

use std::ffi::CString;
use std::future::Future;
use yoonit_core::{PermissionState, PermissionStore};

pub struct DevicePermissionStore {
    device_paths: Vec<String>,
}

impl DevicePermissionStore {
    pub fn new(device_paths: Vec<String>) -> Self {
        Self { device_paths }
    }

    fn check(path: &str) -> PermissionState {
        let Ok(c_path) = CString::new(path) else {
            return PermissionState::Denied;
        };
        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
        let ret = unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) };
        if ret == 0 {
            return PermissionState::Granted;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::EPERM) | Some(libc::EROFS) => PermissionState::Restricted,
            _ => PermissionState::Denied,
        }
    }
}

impl PermissionStore for DevicePermissionStore {
    /// Granted only if every configured device node is readable and writable.
    fn status(&self) -> PermissionState {
        let mut state = PermissionState::Granted;
        for path in &self.device_paths {
            match Self::check(path) {
                PermissionState::Granted => {}
                other => {
                    tracing::debug!(device = %path, ?other, "camera device not accessible");
                    state = other;
                    break;
                }
            }
        }
        state
    }

    fn prompt(&self, explanation: &str) -> impl Future<Output = PermissionState> + Send {
        tracing::debug!(explanation, "device permissions cannot prompt; reporting current state");
        std::future::ready(self.status())
    }
}
