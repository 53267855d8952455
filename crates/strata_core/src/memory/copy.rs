//! # Copy Routines
//!
//! Byte copies used by arena pushes and slot writes.
//!
//! The aligned path is picked once per process: AVX2 when the CPU reports it,
//! a plain byte copy otherwise.

// SAFETY: Copies operate on raw pointers supplied by the allocators.
#![allow(unsafe_code)]

use std::sync::OnceLock;

use super::align::is_aligned;

/// Copy strategy selected by runtime feature detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyPath {
    /// 256-bit AVX2 loads and stores.
    Avx2,
    /// Byte-wise copy.
    Scalar,
}

static COPY_PATH: OnceLock<CopyPath> = OnceLock::new();

/// Returns the aligned copy strategy for this CPU.
#[must_use]
pub fn copy_path() -> CopyPath {
    *COPY_PATH.get_or_init(detect)
}

fn detect() -> CopyPath {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return CopyPath::Avx2;
        }
    }
    CopyPath::Scalar
}

/// Copies `len` bytes from `src` to `dst`.
///
/// # Safety
///
/// - src and dst must be valid for `len` bytes
/// - regions must not overlap
#[inline]
pub unsafe fn copy_bytes(dst: *mut u8, src: *const u8, len: usize) {
    std::ptr::copy_nonoverlapping(src, dst, len);
}

/// Copies `len` bytes, taking the vectorized path when both ends are
/// [`super::ALIGNMENT`]-aligned.
///
/// Functionally identical to [`copy_bytes`]; only the strategy differs.
/// Misaligned pointers fall back to [`copy_bytes`].
///
/// # Safety
///
/// - src and dst must be valid for `len` bytes
/// - regions must not overlap
#[inline]
pub unsafe fn copy_aligned(dst: *mut u8, src: *const u8, len: usize) {
    if !is_aligned(dst) || !is_aligned(src) {
        copy_bytes(dst, src, len);
        return;
    }

    match copy_path() {
        #[cfg(target_arch = "x86_64")]
        CopyPath::Avx2 => avx2_copy(dst, src, len),
        _ => scalar_copy(dst, src, len),
    }
}

#[inline]
unsafe fn scalar_copy(dst: *mut u8, src: *const u8, len: usize) {
    for i in 0..len {
        *dst.add(i) = *src.add(i);
    }
}

/// AVX2 copy, 64 bytes per iteration.
///
/// Uses UNALIGNED loads/stores: they cost nothing extra on aligned
/// addresses, and an aligned store to a misaligned address is a SIGSEGV.
///
/// # Safety
///
/// Caller must have checked AVX2 support.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn avx2_copy(dst: *mut u8, src: *const u8, len: usize) {
    use std::arch::x86_64::{__m256i, _mm256_loadu_si256, _mm256_storeu_si256};

    let mut offset = 0;

    while offset + 64 <= len {
        let chunk0 = _mm256_loadu_si256(src.add(offset).cast::<__m256i>());
        let chunk1 = _mm256_loadu_si256(src.add(offset + 32).cast::<__m256i>());
        _mm256_storeu_si256(dst.add(offset).cast::<__m256i>(), chunk0);
        _mm256_storeu_si256(dst.add(offset + 32).cast::<__m256i>(), chunk1);
        offset += 64;
    }

    if offset + 32 <= len {
        let chunk = _mm256_loadu_si256(src.add(offset).cast::<__m256i>());
        _mm256_storeu_si256(dst.add(offset).cast::<__m256i>(), chunk);
        offset += 32;
    }

    if offset < len {
        std::ptr::copy_nonoverlapping(src.add(offset), dst.add(offset), len - offset);
    }
}
