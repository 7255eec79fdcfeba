pub use multiboot_core::HostInfo;

pub fn host_info() -> HostInfo {
    HostInfo {
        os: std::env::consts::OS.to_string(),
        os_version: read_os_version(),
        machine: read_machine(),
    }
}

#[cfg(target_os = "macos")]
fn read_os_version() -> String {
    sysctl_string("kern.osproductversion")
        .or_else(|| sysctl_string("kern.osrelease"))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "macos")]
fn read_machine() -> String {
    sysctl_string("hw.model")
        .or_else(|| sysctl_string("kern.hostname"))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(target_os = "macos"))]
fn read_os_version() -> String {
    "unknown".to_string()
}

#[cfg(not(target_os = "macos"))]
fn read_machine() -> String {
    "unknown".to_string()
}

#[cfg(target_os = "macos")]
fn sysctl_string(name: &str) -> Option<String> {
    use libc::sysctlbyname;
    use std::ffi::CString;
    use std::ptr;

    let c_name = CString::new(name).ok()?;
    let mut size = 0usize;
    let res = unsafe { sysctlbyname(c_name.as_ptr(), ptr::null_mut(), &mut size, ptr::null_mut(), 0) };
    if res != 0 || size == 0 {
        return None;
    }

    let mut buffer = vec![0u8; size];
    let res = unsafe {
        sysctlbyname(
            c_name.as_ptr(),
            buffer.as_mut_ptr() as *mut _,
            &mut size,
            ptr::null_mut(),
            0,
        )
    };
    if res != 0 {
        return None;
    }
    buffer.truncate(size);
    while buffer.last() == Some(&0) {
        buffer.pop();
    }
    String::from_utf8(buffer).ok()
}
