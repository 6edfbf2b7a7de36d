use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Mount syscalls behind a seam so callers can be exercised without root.
pub trait Mounter {
    fn mount(&mut self, device: &str, target: &Path, fstype: &str, flags: u64) -> io::Result<()>;
    fn unmount(&mut self, target: &Path, flags: i32) -> io::Result<()>;
}

/// Calls `mount(2)` and `umount2(2)` directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMounter;

fn c_string(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl Mounter for SystemMounter {
    fn mount(&mut self, device: &str, target: &Path, fstype: &str, flags: u64) -> io::Result<()> {
        let device = c_string(device.as_bytes())?;
        let target = c_string(target.as_os_str().as_bytes())?;
        let fstype = c_string(fstype.as_bytes())?;
        // SAFETY: every pointer refers to a live NUL-terminated string and no
        // filesystem-specific data is passed.
        let rc = unsafe {
            libc::mount(
                device.as_ptr(),
                target.as_ptr(),
                fstype.as_ptr(),
                flags as libc::c_ulong,
                std::ptr::null(),
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn unmount(&mut self, target: &Path, flags: i32) -> io::Result<()> {
        let target = c_string(target.as_os_str().as_bytes())?;
        // SAFETY: `target` is a live NUL-terminated string.
        let rc = unsafe { libc::umount2(target.as_ptr(), flags) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
