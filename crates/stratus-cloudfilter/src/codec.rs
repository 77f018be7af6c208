//! Identity and time encodings required by the Cloud Files facility.
//!
//! Everything here is pure: no shared buffers, safe to call from any
//! callback thread.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Provider identity registered with every sync root. Never regenerated.
pub const PROVIDER_ID: Uuid = Uuid::from_u128(0x5f3c9a1e_7b24_4d8e_a6c1_2e9fb0d47c13);

/// Largest file identity blob the facility accepts (`CF_PLACEHOLDER_MAX_FILE_IDENTITY_LENGTH`).
pub const MAX_FILE_IDENTITY_LENGTH: usize = 4096;

/// Seconds between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_EPOCH_DELTA_SECS: i64 = 11_644_473_600;

/// 100-ns intervals per second.
pub const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x80;

/// Opaque, engine-chosen identity stored in a placeholder and echoed back
/// in every fetch callback. Length-prefixed, never null-terminated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity(Bytes);

impl FileIdentity {
    pub fn new(blob: impl Into<Bytes>) -> Self {
        FileIdentity(blob.into())
    }

    /// Copy a blob that is only valid for the current callback.
    pub fn copy_from_slice(blob: &[u8]) -> Self {
        FileIdentity(Bytes::copy_from_slice(blob))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length as the facility expects it.
    pub fn len_u32(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fits_platform_limit(&self) -> bool {
        self.0.len() <= MAX_FILE_IDENTITY_LENGTH
    }

    /// Lossy text view for logs.
    pub fn display_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for FileIdentity {
    fn from(s: &str) -> Self {
        FileIdentity(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for FileIdentity {
    fn from(s: String) -> Self {
        FileIdentity(Bytes::from(s))
    }
}

impl From<Vec<u8>> for FileIdentity {
    fn from(v: Vec<u8>) -> Self {
        FileIdentity(Bytes::from(v))
    }
}

/// Whole Unix seconds to 100-ns ticks since 1601. Saturates instead of
/// wrapping for values the format cannot represent.
pub fn unix_to_filetime(unix_secs: i64) -> i64 {
    unix_secs
        .saturating_add(FILETIME_UNIX_EPOCH_DELTA_SECS)
        .saturating_mul(FILETIME_TICKS_PER_SEC)
}

/// 100-ns ticks since 1601 back to whole Unix seconds (sub-second truncated).
pub fn filetime_to_unix(filetime: i64) -> i64 {
    filetime.div_euclid(FILETIME_TICKS_PER_SEC) - FILETIME_UNIX_EPOCH_DELTA_SECS
}

/// Whole Unix seconds of a `SystemTime`; times before 1970 are negative.
pub fn system_time_to_unix(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// UTF-16 with a trailing NUL, as every `PCWSTR` parameter requires.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Inverse of [`to_wide`]; stops at the first NUL.
pub fn from_wide(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}
