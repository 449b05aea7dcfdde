// SPDX-License-Identifier: Apache-2.0
//
// Copyright (C) 2024, ARM Limited and contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may
// not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed access to the linear memory of the observed guest module.

use core::str::from_utf8;

use crate::abi::{Address, MemAlign, MemOffset, MemSize};

/// Error raised by [MemCursor] and [MemWriter] accesses.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum MemError {
    #[error(
        "Access of {requested} bytes at offset {offset} crosses the end of the {len} bytes buffer"
    )]
    OutOfBounds {
        offset: MemOffset,
        requested: MemSize,
        len: MemSize,
    },

    #[error("No NUL terminator found between offset {offset} and the end of the buffer")]
    UnterminatedString { offset: MemOffset },

    #[error("Could not decode UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: MemOffset },
}

macro_rules! read_N {
    ($name:ident, $typ:ty, $from_bytes:ident, $order:literal) => {
        #[doc = concat!(
            "Read a [", stringify!($typ), "] in ", $order,
            " byte order and advance past it."
        )]
        #[inline]
        pub fn $name(&mut self) -> Result<$typ, MemError> {
            let arr = self.advance(size_of::<$typ>())?;
            Ok(<$typ>::$from_bytes(arr.try_into().unwrap()))
        }
    };
}

/// Positioned reader of typed values inside a linear memory buffer.
///
/// A cursor borrows the buffer and owns nothing but its own offset, so
/// forking one is cheap and forked cursors can scan the same buffer
/// concurrently (e.g. one walking a format string while another consumes the
/// variadic-argument region) without invalidating each other.
///
/// [MemCursor::jump_to] and [MemCursor::skip] reposition without any bounds
/// check: validation happens when bytes are actually accessed, and a read
/// that would cross the end of the buffer fails with
/// [MemError::OutOfBounds] without moving the offset.
#[derive(Debug, Clone, Copy)]
pub struct MemCursor<'a> {
    buf: &'a [u8],
    offset: MemOffset,
}

impl<'a> MemCursor<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        MemCursor { buf, offset: 0 }
    }

    /// Current offset from the beginning of the buffer.
    #[inline]
    pub fn offset(&self) -> MemOffset {
        self.offset
    }

    /// Reposition the cursor. No bounds check: an out-of-range offset only
    /// fails at the next access.
    #[inline]
    pub fn jump_to(&mut self, offset: MemOffset) {
        self.offset = offset;
    }

    /// Advance over `count` bytes without inspecting them, e.g. padding
    /// inserted to satisfy argument alignment.
    #[inline]
    pub fn skip(&mut self, count: MemSize) {
        self.offset += count;
    }

    /// Round the offset up to the next multiple of `align` (a power of two),
    /// skipping the zero-filled padding the compiler inserted.
    #[inline]
    pub fn align_to(&mut self, align: MemAlign) {
        self.offset = (self.offset + (align - 1)) & !(align - 1);
    }

    /// Fork an independent cursor at the same position, sharing the buffer.
    #[inline]
    pub fn fork(&self) -> Self {
        *self
    }

    /// Fork an independent cursor positioned at the guest address `addr`.
    #[inline]
    pub fn fork_at(&self, addr: Address) -> Self {
        MemCursor {
            buf: self.buf,
            offset: addr as MemOffset,
        }
    }

    #[inline]
    fn advance(&mut self, count: MemSize) -> Result<&'a [u8], MemError> {
        match self.buf.get(self.offset..self.offset + count) {
            Some(window) => {
                self.offset += count;
                Ok(window)
            }
            None => Err(MemError::OutOfBounds {
                offset: self.offset,
                requested: count,
                len: self.buf.len(),
            }),
        }
    }

    read_N!(read_i32_le, i32, from_le_bytes, "little-endian");
    read_N!(read_u32_le, u32, from_le_bytes, "little-endian");
    read_N!(read_i64_le, i64, from_le_bytes, "little-endian");
    read_N!(read_u64_le, u64, from_le_bytes, "little-endian");
    read_N!(read_f64_le, f64, from_le_bytes, "little-endian");

    // The target ABI is little-endian. The big-endian variants only exist to
    // cross-check decoded fixtures in tests.
    read_N!(read_i32_be, i32, from_be_bytes, "big-endian");
    read_N!(read_u32_be, u32, from_be_bytes, "big-endian");

    /// Read one unsigned byte and advance past it.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, MemError> {
        Ok(self.advance(1)?[0])
    }

    /// Read one byte and advance past it, mapping any non-zero value to
    /// [true].
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, MemError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a 4-byte guest pointer, advance past it, and return a new cursor
    /// positioned at the pointed-to address.
    ///
    /// The returned cursor shares the buffer. A pointer resolving outside
    /// the buffer is not an error here: it only fails at the next access
    /// through the returned cursor, since dereferencing is nothing more than
    /// an offset reassignment.
    #[inline]
    pub fn read_deref_pointer(&mut self) -> Result<Self, MemError> {
        let addr = self.read_u32_le()?;
        Ok(self.fork_at(addr))
    }

    /// Scan forward for the first NUL byte and decode everything before it
    /// as UTF-8, leaving the cursor one past the terminator.
    ///
    /// Fails with [MemError::UnterminatedString] if the end of the buffer is
    /// reached first, and with [MemError::InvalidUtf8] if the bytes do not
    /// decode. The offset is left unchanged on failure.
    pub fn read_null_terminated(&mut self) -> Result<&'a str, MemError> {
        let start = self.offset;
        let tail = self.buf.get(start..).ok_or(MemError::OutOfBounds {
            offset: start,
            requested: 1,
            len: self.buf.len(),
        })?;
        let end = tail
            .iter()
            .position(|x| *x == 0)
            .ok_or(MemError::UnterminatedString { offset: start })?;
        let s = from_utf8(&tail[..end]).map_err(|_| MemError::InvalidUtf8 { offset: start })?;
        self.offset = start + end + 1;
        Ok(s)
    }

    /// Expose a window of `len` bytes as a live view into the shared buffer
    /// and advance past it.
    #[inline]
    pub fn read_slice(&mut self, len: MemSize) -> Result<&'a [u8], MemError> {
        self.advance(len)
    }

    /// Same as [MemCursor::read_slice] but returns an independent copy of
    /// the bytes.
    #[inline]
    pub fn read_slice_copy(&mut self, len: MemSize) -> Result<Vec<u8>, MemError> {
        Ok(self.advance(len)?.to_vec())
    }
}

/// Positioned writer over a linear memory buffer.
///
/// Only used to craft memory images for fixtures and tests; the decode path
/// never mutates guest memory.
#[derive(Debug)]
pub struct MemWriter<'a> {
    buf: &'a mut [u8],
    offset: MemOffset,
}

impl<'a> MemWriter<'a> {
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        MemWriter { buf, offset: 0 }
    }

    /// Reposition the writer. Same contract as [MemCursor::jump_to].
    #[inline]
    pub fn jump_to(&mut self, offset: MemOffset) {
        self.offset = offset;
    }

    /// Copy `src` at the current offset and advance past it.
    pub fn write_all(&mut self, src: &[u8]) -> Result<(), MemError> {
        match self.buf.get_mut(self.offset..self.offset + src.len()) {
            Some(window) => {
                window.copy_from_slice(src);
                self.offset += src.len();
                Ok(())
            }
            None => Err(MemError::OutOfBounds {
                offset: self.offset,
                requested: src.len(),
                len: self.buf.len(),
            }),
        }
    }

    /// Write a [u32] in little-endian byte order and advance past it.
    #[inline]
    pub fn write_u32_le(&mut self, x: u32) -> Result<(), MemError> {
        self.write_all(&x.to_le_bytes())
    }
}
