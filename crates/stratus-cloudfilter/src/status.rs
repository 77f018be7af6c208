//! Platform status codes (HRESULT / NTSTATUS) carried verbatim through errors.

use std::fmt;

/// A status code returned by, or handed to, the Cloud Files facility.
///
/// Zero is success. HRESULTs and NTSTATUS values share the same 32-bit
/// space here because transfer completions accept either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformStatus(pub i32);

/// `HRESULT_FROM_WIN32`.
pub const fn from_win32(code: u32) -> PlatformStatus {
    if code == 0 {
        PlatformStatus(0)
    } else {
        PlatformStatus(((code & 0xFFFF) | 0x8007_0000) as i32)
    }
}

pub const SUCCESS: PlatformStatus = PlatformStatus(0);

pub const E_FAIL: PlatformStatus = PlatformStatus(0x8000_4005_u32 as i32);
pub const E_INVALIDARG: PlatformStatus = PlatformStatus(0x8007_0057_u32 as i32);
pub const E_OUTOFMEMORY: PlatformStatus = PlatformStatus(0x8007_000E_u32 as i32);

pub const STATUS_UNSUCCESSFUL: PlatformStatus = PlatformStatus(0xC000_0001_u32 as i32);
pub const STATUS_IO_TIMEOUT: PlatformStatus = PlatformStatus(0xC000_00B5_u32 as i32);

pub const ERROR_FILE_NOT_FOUND: PlatformStatus = from_win32(2);
pub const ERROR_PATH_NOT_FOUND: PlatformStatus = from_win32(3);
pub const ERROR_ACCESS_DENIED: PlatformStatus = from_win32(5);
pub const ERROR_INVALID_HANDLE: PlatformStatus = from_win32(6);
pub const ERROR_SHARING_VIOLATION: PlatformStatus = from_win32(32);
pub const ERROR_ALREADY_EXISTS: PlatformStatus = from_win32(183);
pub const ERROR_DIRECTORY: PlatformStatus = from_win32(267);
pub const ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING: PlatformStatus = from_win32(362);
pub const ERROR_CLOUD_FILE_ALREADY_CONNECTED: PlatformStatus = from_win32(365);
pub const ERROR_NOT_A_CLOUD_FILE: PlatformStatus = from_win32(376);
pub const ERROR_CLOUD_FILE_INVALID_REQUEST: PlatformStatus = from_win32(380);
pub const ERROR_CLOUD_FILE_IN_USE: PlatformStatus = from_win32(391);
pub const ERROR_NOT_FOUND: PlatformStatus = from_win32(1168);
pub const ERROR_NO_SYSTEM_RESOURCES: PlatformStatus = from_win32(1450);

impl PlatformStatus {
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// Statuses the facility uses when a connection or transfer key no
    /// longer refers to anything live.
    pub fn is_stale_key(self) -> bool {
        matches!(
            self,
            ERROR_CLOUD_FILE_INVALID_REQUEST
                | ERROR_CLOUD_FILE_PROVIDER_NOT_RUNNING
                | ERROR_INVALID_HANDLE
        )
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<i32> for PlatformStatus {
    fn from(code: i32) -> Self {
        PlatformStatus(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_codes_map_to_hresults() {
        assert_eq!(ERROR_ALREADY_EXISTS.as_u32(), 0x8007_00B7);
        assert_eq!(ERROR_PATH_NOT_FOUND.as_u32(), 0x8007_0003);
        assert_eq!(ERROR_NOT_FOUND.as_u32(), 0x8007_0490);
        assert_eq!(from_win32(0), SUCCESS);
    }

    #[test]
    fn success_and_failure() {
        assert!(SUCCESS.is_success());
        assert!(!E_FAIL.is_success());
        assert!(!STATUS_IO_TIMEOUT.is_success());
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(E_FAIL.to_string(), "0x80004005");
        assert_eq!(STATUS_UNSUCCESSFUL.to_string(), "0xC0000001");
    }

    #[test]
    fn stale_key_classification() {
        assert!(ERROR_CLOUD_FILE_INVALID_REQUEST.is_stale_key());
        assert!(!ERROR_ACCESS_DENIED.is_stale_key());
    }
}
