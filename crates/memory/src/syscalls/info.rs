//! Platform memory information

use std::sync::OnceLock;

use crate::core::types::alignment::PAGE_SIZE;

static PAGE_SIZE_CACHE: OnceLock<usize> = OnceLock::new();

/// Get system page size (cached after the first query)
pub fn get_page_size() -> usize {
    *PAGE_SIZE_CACHE.get_or_init(query_page_size)
}

fn query_page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: FFI call to libc::sysconf.
        // - _SC_PAGESIZE is a valid sysconf parameter
        // - sysconf returns page size or -1 on error, handled below
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 && (size as usize).is_power_of_two() {
            size as usize
        } else {
            PAGE_SIZE
        }
    }

    #[cfg(windows)]
    {
        use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

        // SAFETY: FFI call to Windows GetSystemInfo.
        // - SYSTEM_INFO initialized with zeroed() (all zero bytes are valid)
        // - GetSystemInfo fills the structure with valid system information
        // - dwPageSize field contains the page size
        let page = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        };
        if page.is_power_of_two() {
            page
        } else {
            PAGE_SIZE
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        PAGE_SIZE
    }
}
