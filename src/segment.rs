//! POSIX shared-memory segments used for one-shot request/response handoff.
//!
//! A [`Segment`] is exclusively owned by the single notification-handling
//! call that opened it: opened, validated, mapped, read/written, unmapped and
//! closed within that one call, never retained across calls. The fd closes
//! when the `Segment` drops and the mapping is released when the
//! [`SegmentView`] drops, so every exit path releases both.
//!
//! All access to the mapped region goes through the bounds-checked
//! [`SegmentView`] API; raw pointers never escape this module.

use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::ftruncate;

use crate::error::{BridgeError, Result};
use crate::protocol::LENGTH_PREFIX_LEN;
use crate::security::Identity;

/// An open shared-memory object.
#[derive(Debug)]
pub struct Segment {
    name: String,
    fd: OwnedFd,
}

impl Segment {
    /// Open an existing segment for full access.
    pub fn open(name: &str) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(BridgeError::HandleOpenFailed)?;
        Ok(Self {
            name: name.to_string(),
            fd,
        })
    }

    /// Create a fresh segment of `len` bytes.
    ///
    /// This is the client side of the handoff; the bridge itself only ever
    /// opens pre-existing segments.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(BridgeError::HandleOpenFailed)?;
        ftruncate(&fd, len as i64).map_err(|e| BridgeError::MappingFailed(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            fd,
        })
    }

    /// Remove a segment name from the namespace.
    pub fn unlink(name: &str) -> Result<()> {
        shm_unlink(name).map_err(BridgeError::HandleOpenFailed)
    }

    /// The name this segment was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owner identity recorded on the kernel object.
    pub fn owner(&self) -> Result<Identity> {
        let stat = fstat(self.fd.as_raw_fd()).map_err(BridgeError::HandleOpenFailed)?;
        Ok(Identity(stat.st_uid))
    }

    /// Size of the underlying object in bytes.
    pub fn len(&self) -> Result<usize> {
        let stat = fstat(self.fd.as_raw_fd()).map_err(BridgeError::HandleOpenFailed)?;
        Ok(stat.st_size as usize)
    }

    /// Map the whole segment read/write.
    pub fn map(&self) -> Result<SegmentView> {
        let len = self.len()?;
        let len = NonZeroUsize::new(len)
            .ok_or_else(|| BridgeError::MappingFailed("segment is empty".to_string()))?;

        // SAFETY: mapping the full object returned by fstat, released in
        // SegmentView::drop.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.fd,
                0,
            )
        }
        .map_err(|e| BridgeError::MappingFailed(e.to_string()))?;

        Ok(SegmentView {
            ptr,
            len: len.get(),
        })
    }
}

/// A bounds-checked view over a mapped segment.
///
/// Every read and write validates the requested range against the actual
/// mapped size before touching memory.
#[derive(Debug)]
pub struct SegmentView {
    ptr: NonNull<std::ffi::c_void>,
    len: usize,
}

// SAFETY: the view is exclusively owned by the one notification call that
// mapped it; nothing else aliases the mapping while it lives.
unsafe impl Send for SegmentView {}

impl SegmentView {
    /// Size of the mapped view in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the view maps zero bytes (never the case for a valid map).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe the live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len) }
    }

    /// Decode the 4-byte big-endian payload length at the start of the view.
    pub fn payload_len(&self) -> Result<u32> {
        let bytes = self.read(LENGTH_PREFIX_LEN)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Borrow the first `len` bytes of the view.
    pub fn read(&self, len: usize) -> Result<&[u8]> {
        if len > self.len {
            return Err(BridgeError::MappingFailed(format!(
                "requested {len} bytes from a {}-byte view",
                self.len
            )));
        }
        Ok(&self.as_slice()[..len])
    }

    /// Overwrite the view from offset 0 with `data`.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.len {
            return Err(BridgeError::MappingFailed(format!(
                "writing {} bytes into a {}-byte view",
                data.len(),
                self.len
            )));
        }
        self.as_mut_slice()[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for SegmentView {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from the mmap call in Segment::map.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(error = %e, "failed to unmap segment view");
        }
    }
}
