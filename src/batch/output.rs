use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::error::{RenderError, Result};

pub const CHANNELS: usize = 4;

// Owns the allocation; slices write through raw pointers into disjoint ranges.
struct SharedPixels {
    ptr: *mut u8,
    len: usize,
}

// Writers only ever touch the disjoint range of their own PixelSlice, and the
// allocation is read back only after every slice has been dropped.
unsafe impl Send for SharedPixels {}
unsafe impl Sync for SharedPixels {}

impl SharedPixels {
    fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let len = boxed.len();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Self { ptr, len }
    }

    fn into_vec(self) -> Vec<u8> {
        let this = ManuallyDrop::new(self);
        let slice = std::ptr::slice_from_raw_parts_mut(this.ptr, this.len);
        unsafe { Box::from_raw(slice) }.into_vec()
    }
}

impl Drop for SharedPixels {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr, self.len);
        unsafe { drop(Box::from_raw(slice)) };
    }
}

/// Exclusive write access to one view's `H * W * 4` bytes of the shared
/// output allocation.
pub struct PixelSlice {
    pixels: Arc<SharedPixels>,
    offset: usize,
    len: usize,
}

impl PixelSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // offset + len <= allocation length is established in `allocate`.
        unsafe { std::slice::from_raw_parts_mut(self.pixels.ptr.add(self.offset), self.len) }
    }
}

impl std::fmt::Debug for PixelSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelSlice")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// One contiguous `views * H * W * 4` RGBA8 allocation.
pub struct PixelBuffer {
    pixels: Arc<SharedPixels>,
}

impl PixelBuffer {
    pub fn allocate(views: usize, width: u32, height: u32) -> Result<(Self, Vec<PixelSlice>)> {
        let per_view = bytes_per_view(width, height)?;
        let total = per_view.checked_mul(views).ok_or_else(|| {
            RenderError::shape(format!(
                "output buffer size overflow ({views} views of {width}x{height})"
            ))
        })?;

        let pixels = Arc::new(SharedPixels::zeroed(total));
        let slices = (0..views)
            .map(|i| PixelSlice {
                pixels: Arc::clone(&pixels),
                offset: i * per_view,
                len: per_view,
            })
            .collect();
        Ok((Self { pixels }, slices))
    }

    pub fn len(&self) -> usize {
        self.pixels.len
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.len == 0
    }

    pub fn live_writers(&self) -> usize {
        Arc::strong_count(&self.pixels) - 1
    }

    /// Reclaims the bytes; fails (returning `self`) while any slice is alive.
    pub fn into_vec(self) -> std::result::Result<Vec<u8>, Self> {
        match Arc::try_unwrap(self.pixels) {
            Ok(shared) => Ok(shared.into_vec()),
            Err(pixels) => Err(Self { pixels }),
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.len())
            .field("live_writers", &self.live_writers())
            .finish()
    }
}

pub fn bytes_per_view(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|p| p.checked_mul(CHANNELS))
        .ok_or_else(|| RenderError::shape(format!("image size {width}x{height} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slices_are_disjoint_and_ordered() {
        let (buffer, mut slices) = PixelBuffer::allocate(3, 2, 2).expect("allocate");
        assert_eq!(buffer.len(), 3 * 2 * 2 * 4);
        assert_eq!(buffer.live_writers(), 3);
        for (i, slice) in slices.iter_mut().enumerate() {
            assert_eq!(slice.len(), 16);
            slice.as_mut_slice().fill(i as u8 + 1);
        }
        drop(slices);
        let bytes = buffer.into_vec().expect("no writers left");
        assert!(bytes[..16].iter().all(|&b| b == 1));
        assert!(bytes[16..32].iter().all(|&b| b == 2));
        assert!(bytes[32..].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_reclaim_fails_while_writers_live() {
        let (buffer, slices) = PixelBuffer::allocate(2, 1, 1).expect("allocate");
        let buffer = buffer.into_vec().unwrap_err();
        assert_eq!(buffer.live_writers(), 2);
        drop(slices);
        assert_eq!(buffer.into_vec().expect("reclaim").len(), 8);
    }

    #[test]
    fn test_writes_from_worker_threads() {
        let (buffer, slices) = PixelBuffer::allocate(8, 4, 4).expect("allocate");
        let handles: Vec<_> = slices
            .into_iter()
            .enumerate()
            .map(|(i, mut slice)| {
                std::thread::spawn(move || slice.as_mut_slice().fill(i as u8))
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        let bytes = buffer.into_vec().expect("reclaim");
        for (i, chunk) in bytes.chunks_exact(64).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_empty_batch() {
        let (buffer, slices) = PixelBuffer::allocate(0, 8, 8).expect("allocate");
        assert!(slices.is_empty());
        assert!(buffer.is_empty());
        assert!(buffer.into_vec().expect("reclaim").is_empty());
    }
}
