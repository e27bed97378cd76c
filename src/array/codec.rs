//! Blosc chunk compression.
//!
//! Chunk payloads are encoded with c-blosc through `blosc-sys`. Every call
//! uses the `_ctx` variants, which are thread safe and take the full
//! configuration explicitly rather than relying on blosc's global state.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};

use blosc_sys::{blosc_cbuffer_validate, blosc_compress_ctx, blosc_decompress_ctx};

use crate::error::StorageError;

use super::metadata::BloscConfig;

/// The fixed blosc frame overhead in bytes (`BLOSC_MAX_OVERHEAD`).
const MAX_OVERHEAD: usize = 16;

/// c-blosc rejects type sizes above 255; larger records compress
/// unshuffled with a unit type size.
const MAX_TYPESIZE: usize = 255;

const SHUFFLE_NONE: c_int = 0;
const SHUFFLE_BYTE: c_int = 1;
const SHUFFLE_BIT: c_int = 2;

fn resolve_shuffle(shuffle: i8, typesize: usize) -> c_int {
    match shuffle {
        0 => SHUFFLE_NONE,
        2 => SHUFFLE_BIT,
        1 => SHUFFLE_BYTE,
        // -1: automatic, bit shuffle for single-byte types.
        _ => {
            if typesize == 1 {
                SHUFFLE_BIT
            } else {
                SHUFFLE_BYTE
            }
        }
    }
}

/// Compress a chunk payload.
///
/// `typesize` is the element width in bytes and drives the shuffle filter.
///
/// # Errors
/// Returns [`StorageError::Codec`] if blosc reports a failure.
pub(crate) fn compress(
    data: &[u8],
    config: &BloscConfig,
    typesize: usize,
) -> Result<Vec<u8>, StorageError> {
    let typesize = if typesize == 0 || typesize > MAX_TYPESIZE {
        1
    } else {
        typesize
    };
    let shuffle = resolve_shuffle(config.shuffle, typesize);
    let compressor = CString::new(config.cname.as_str())
        .map_err(|err| StorageError::Codec(err.to_string()))?;
    let mut destination = vec![0u8; data.len() + MAX_OVERHEAD];
    let written = unsafe {
        blosc_compress_ctx(
            c_int::from(config.clevel),
            shuffle,
            typesize,
            data.len(),
            data.as_ptr().cast::<c_void>(),
            destination.as_mut_ptr().cast::<c_void>(),
            destination.len(),
            compressor.as_ptr().cast::<c_char>(),
            config.blocksize.max(0) as usize,
            1,
        )
    };
    if written <= 0 {
        return Err(StorageError::Codec(format!(
            "blosc compression failed with status {written}"
        )));
    }
    destination.truncate(written as usize);
    Ok(destination)
}

/// Decompress a chunk payload.
///
/// # Errors
/// Returns [`StorageError::Codec`] if the payload is not a valid blosc
/// buffer or decompression fails.
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoded_bytes: usize = 0;
    let valid = unsafe {
        blosc_cbuffer_validate(
            data.as_ptr().cast::<c_void>(),
            data.len(),
            std::ptr::addr_of_mut!(decoded_bytes),
        )
    };
    if valid < 0 {
        return Err(StorageError::Codec(
            "chunk is not a valid blosc buffer".to_string(),
        ));
    }
    let mut destination = vec![0u8; decoded_bytes];
    let read = unsafe {
        blosc_decompress_ctx(
            data.as_ptr().cast::<c_void>(),
            destination.as_mut_ptr().cast::<c_void>(),
            destination.len(),
            1,
        )
    };
    if read < 0 || read as usize != decoded_bytes {
        return Err(StorageError::Codec(format!(
            "blosc decompression failed with status {read}"
        )));
    }
    Ok(destination)
}
