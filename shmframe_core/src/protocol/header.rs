//! Fixed binary header at offset 0 of every frame region
//!
//! The layout is the packed little-endian C struct
//! `magic:u32 version:u32 seq:i32 width:u32 height:u32 channels:u32
//! frame_size:u32 frame_index:u64 mapping_size:u64 reserved:[u8; 48]`
//! (92 bytes), and the data area starts at the next 64-byte boundary.
//!
//! Every field sits on a 4-byte boundary, so each is accessed through a
//! 32-bit atomic. The two 64-bit counters are not 8-aligned in the packed
//! layout and are kept as low/high 32-bit halves.

use super::format::{FrameFormat, FrameMetadata};
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

#[cfg(target_endian = "big")]
compile_error!("the shared header layout is little-endian only");

/// 'SHDM'
pub const SHARED_MAGIC: u32 = 0x5348_444D;

/// Protocol revision
pub const PROTOCOL_VERSION: u32 = 1;

/// Bytes of the packed header struct
pub const RAW_HEADER_SIZE: usize = mem::size_of::<SharedHeader>();

/// Header size rounded up to the 64-byte boundary where the data area begins
pub const HEADER_SIZE: usize = RAW_HEADER_SIZE.div_ceil(64) * 64;

/// Smallest payload area a region may be created with
pub const MIN_PAYLOAD: usize = 4;

/// Header for shared frame regions
#[repr(C)]
pub struct SharedHeader {
    magic: AtomicU32,
    version: AtomicU32,
    seq: AtomicI32,
    width: AtomicU32,
    height: AtomicU32,
    channels: AtomicU32,
    frame_size: AtomicU32,
    frame_index: [AtomicU32; 2],
    mapping_size: [AtomicU32; 2],
    _reserved: [u8; 48],
}

const _: () = {
    assert!(RAW_HEADER_SIZE == 92);
    assert!(HEADER_SIZE == 128);
    assert!(mem::offset_of!(SharedHeader, seq) == 8);
    assert!(mem::offset_of!(SharedHeader, frame_size) == 24);
    assert!(mem::offset_of!(SharedHeader, frame_index) == 28);
    assert!(mem::offset_of!(SharedHeader, mapping_size) == 36);
};

#[inline]
fn load_u64(halves: &[AtomicU32; 2], order: Ordering) -> u64 {
    let lo = halves[0].load(order) as u64;
    let hi = halves[1].load(order) as u64;
    (hi << 32) | lo
}

#[inline]
fn store_u64(halves: &[AtomicU32; 2], value: u64, order: Ordering) {
    halves[0].store(value as u32, order);
    halves[1].store((value >> 32) as u32, order);
}

impl SharedHeader {
    /// View the start of a mapping as a header
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned and point to at least `HEADER_SIZE`
    /// mapped bytes that stay mapped for the returned lifetime.
    pub unsafe fn from_ptr<'a>(base: *const u8) -> &'a SharedHeader {
        debug_assert!(base as usize % mem::align_of::<SharedHeader>() == 0);
        &*(base as *const SharedHeader)
    }

    /// Stamp a fresh header over zeroed memory
    ///
    /// # Safety
    ///
    /// Same requirements as [`SharedHeader::from_ptr`], and no other process
    /// may have validated the header yet (creator only).
    pub unsafe fn initialize<'a>(
        base: *mut u8,
        format: Option<FrameFormat>,
        mapping_size: u64,
    ) -> &'a SharedHeader {
        std::ptr::write_bytes(base, 0, HEADER_SIZE);
        let header = Self::from_ptr(base);
        let format = format.unwrap_or_default();

        header.version.store(PROTOCOL_VERSION, Ordering::Relaxed);
        header.seq.store(0, Ordering::Relaxed);
        header.width.store(format.width, Ordering::Relaxed);
        header.height.store(format.height, Ordering::Relaxed);
        header.channels.store(format.channels, Ordering::Relaxed);
        header.frame_size.store(0, Ordering::Relaxed);
        store_u64(&header.frame_index, 0, Ordering::Relaxed);
        store_u64(&header.mapping_size, mapping_size, Ordering::Relaxed);

        // Magic goes last: openers treat a zero magic as "still initializing"
        header.magic.store(SHARED_MAGIC, Ordering::Release);
        header
    }

    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether magic and version match this protocol
    pub fn is_compatible(&self) -> bool {
        self.magic() == SHARED_MAGIC && self.version() == PROTOCOL_VERSION
    }

    pub fn seq(&self) -> &AtomicI32 {
        &self.seq
    }

    pub fn mapping_size(&self) -> u64 {
        load_u64(&self.mapping_size, Ordering::Relaxed)
    }

    /// Raw field reads; only meaningful inside a seqlock read section
    pub fn frame_size(&self) -> u32 {
        self.frame_size.load(Ordering::Relaxed)
    }

    pub fn frame_index(&self) -> u64 {
        load_u64(&self.frame_index, Ordering::Relaxed)
    }

    pub fn format(&self) -> FrameFormat {
        FrameFormat {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            channels: self.channels.load(Ordering::Relaxed),
        }
    }

    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            format: self.format(),
            frame_size: self.frame_size(),
            frame_index: self.frame_index(),
            mapping_size: self.mapping_size(),
        }
    }

    /// Field writes; callers must hold a seqlock write section
    pub(crate) fn set_format(&self, format: FrameFormat) {
        self.width.store(format.width, Ordering::Relaxed);
        self.height.store(format.height, Ordering::Relaxed);
        self.channels.store(format.channels, Ordering::Relaxed);
    }

    pub(crate) fn set_frame_size(&self, frame_size: u32) {
        self.frame_size.store(frame_size, Ordering::Relaxed);
    }

    /// Plain load/add/store of the 64-bit index. Safe only because the
    /// seqlock write section excludes readers and the protocol assumes a
    /// single writer; this is not a general-purpose atomic increment.
    pub(crate) fn bump_frame_index(&self) -> u64 {
        let next = self.frame_index().wrapping_add(1);
        store_u64(&self.frame_index, next, Ordering::Relaxed);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Backing([u8; HEADER_SIZE]);

    #[test]
    fn test_magic_is_shdm() {
        assert_eq!(SHARED_MAGIC.to_be_bytes(), *b"SHDM");
    }

    #[test]
    fn test_initialize_layout_bytes() {
        let mut backing = Backing([0xAA; HEADER_SIZE]);
        let format = FrameFormat::new(640, 480, 3);
        let header =
            unsafe { SharedHeader::initialize(backing.0.as_mut_ptr(), Some(format), 0x1_0000_0002) };
        assert!(header.is_compatible());
        assert_eq!(header.format(), format);
        assert_eq!(header.frame_index(), 0);
        assert_eq!(header.mapping_size(), 0x1_0000_0002);

        let bytes = &backing.0;
        assert_eq!(&bytes[0..4], &0x5348_444Du32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &640u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &480u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(&bytes[36..44], &0x1_0000_0002u64.to_le_bytes());
        // Reserved area and padding are zeroed
        assert!(bytes[44..HEADER_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frame_index_crosses_word_boundary() {
        let mut backing = Backing([0; HEADER_SIZE]);
        let header = unsafe { SharedHeader::initialize(backing.0.as_mut_ptr(), None, 0) };
        store_u64(&header.frame_index, u32::MAX as u64, Ordering::Relaxed);
        assert_eq!(header.bump_frame_index(), 1 << 32);
        assert_eq!(&backing.0[28..36], &(1u64 << 32).to_le_bytes());
    }
}
