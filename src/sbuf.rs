//! Safer buffers.
//!
//! An [`SBuf`] is a bounded, position-tagged view over binary evidence. The
//! backing bytes live in a reference-counted root cell, so a child view can
//! never outlive its bytes; the root additionally keeps a live-children
//! counter so a scanner that leaks a view is caught at dispatch time rather
//! than silently.
//!
//! The leading `pagesize` bytes of a view are the *page*, the authoritative
//! region for feature emission. The trailing `[pagesize, bufsize)` bytes are
//! the *margin*: enough overlap with the next buffer to complete features
//! that straddle the boundary, but suppressed from emission because the next
//! page will scan them again.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bstr::Finder;
use bytes::Bytes;
use memmap2::Mmap;
use parking_lot::Mutex;
use snafu::Snafu;
use tracing::error;

use crate::digest::HashAlgorithm;
use crate::pos0::Pos0;

/// Errors raised by bounds-checked reads. Recoverable at the caller.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum SBufError {
    #[snafu(display("read past end of sbuf: offset {offset} width {width} bufsize {bufsize}"))]
    ReadPastEnd {
        offset: usize,
        width: usize,
        bufsize: usize,
    },
    #[snafu(display("invalid sbuf range: offset {offset} len {len} bufsize {bufsize}"))]
    InvalidRange {
        offset: usize,
        len: usize,
        bufsize: usize,
    },
}

/// Runtime byte-order selector for the typed readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

enum Storage {
    Owned(Bytes),
    Mapped(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(b) => b,
            Storage::Mapped(m) => m,
        }
    }
}

struct Root {
    storage: Storage,
    children: AtomicUsize,
}

/// A bounded view over evidence bytes. See the module docs.
pub struct SBuf {
    pos0: Pos0,
    root: Arc<Root>,
    off: usize,
    bufsize: usize,
    pagesize: usize,
    is_child: bool,
    hash_memo: Mutex<Option<(HashAlgorithm, String)>>,
}

impl SBuf {
    fn from_storage(pos0: Pos0, storage: Storage) -> Self {
        let len = storage.as_slice().len();
        SBuf {
            pos0,
            root: Arc::new(Root {
                storage,
                children: AtomicUsize::new(0),
            }),
            off: 0,
            bufsize: len,
            pagesize: len,
            is_child: false,
            hash_memo: Mutex::new(None),
        }
    }

    /// A root buffer owning `body`. `Bytes::from_static` wraps borrowed
    /// static memory without a copy; owned vectors and string literals also
    /// convert.
    pub fn new(pos0: Pos0, body: impl Into<Bytes>) -> Self {
        Self::from_storage(pos0, Storage::Owned(body.into()))
    }

    /// Map `path` into memory as a root buffer at position 0.
    pub fn map_file(path: &Path) -> io::Result<Self> {
        Self::map_file_at(path, Pos0::default())
    }

    pub fn map_file_at(path: &Path, pos0: Pos0) -> io::Result<Self> {
        let file = File::open(path)?;
        // The mapping stays valid after `file` drops; the kernel keeps the
        // backing object alive for the life of the map.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::from_storage(pos0, Storage::Mapped(mmap)))
    }

    /// Read `path` fully into an owned root buffer.
    pub fn read_file(path: &Path) -> io::Result<Self> {
        Ok(Self::new(Pos0::default(), std::fs::read(path)?))
    }

    /// A child view starting `off` bytes in, sharing this buffer's bytes.
    ///
    /// The page shrinks with the view; once `off` passes the page boundary
    /// the child is all margin.
    pub fn child(&self, off: usize) -> Self {
        let off = off.min(self.bufsize);
        self.root.children.fetch_add(1, Ordering::AcqRel);
        SBuf {
            pos0: &self.pos0 + off as u64,
            root: Arc::clone(&self.root),
            off: self.off + off,
            bufsize: self.bufsize - off,
            pagesize: self.pagesize.saturating_sub(off),
            is_child: true,
            hash_memo: Mutex::new(None),
        }
    }

    /// A child view of at most `len` bytes starting at `off`; `len` is
    /// clamped to what the parent actually has.
    pub fn child_range(&self, off: usize, len: usize) -> Self {
        let mut child = self.child(off);
        child.bufsize = child.bufsize.min(len);
        child.pagesize = child.pagesize.min(child.bufsize);
        child
    }

    /// A fresh root carrying bytes decoded from offset `off` of this view,
    /// positioned one stage deeper on the forensic path.
    pub fn decoded_child(&self, off: usize, stage: &str, body: impl Into<Bytes>) -> Self {
        Self::new((&self.pos0 + off as u64).decoded(stage), body)
    }

    pub fn pos0(&self) -> &Pos0 {
        &self.pos0
    }

    pub fn depth(&self) -> u32 {
        self.pos0.depth()
    }

    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    pub fn is_empty(&self) -> bool {
        self.bufsize == 0
    }

    /// Shrink the page, leaving `[pagesize, bufsize)` as margin. Used by
    /// drivers that overlap successive buffers.
    pub fn set_pagesize(&mut self, pagesize: usize) {
        assert!(pagesize <= self.bufsize, "pagesize may not exceed bufsize");
        self.pagesize = pagesize;
    }

    /// Live views derived from this buffer's bytes. Nonzero only ever on
    /// the root: derived views register on the root, however deep the
    /// derivation chain.
    pub fn children(&self) -> usize {
        if self.is_child {
            0
        } else {
            self.root.children.load(Ordering::Acquire)
        }
    }

    /// The whole view.
    pub fn as_slice(&self) -> &[u8] {
        &self.root.storage.as_slice()[self.off..self.off + self.bufsize]
    }

    /// The page portion only.
    pub fn page(&self) -> &[u8] {
        &self.as_slice()[..self.pagesize]
    }

    /// The byte at `i`, or 0 when out of range. Deliberately non-failing:
    /// scanners doing look-ahead read junk zeros instead of carrying bounds
    /// ceremony at every probe.
    pub fn at(&self, i: usize) -> u8 {
        self.as_slice().get(i).copied().unwrap_or(0)
    }

    pub fn substr(&self, off: usize, len: usize) -> Result<&[u8], SBufError> {
        match off.checked_add(len).and_then(|end| self.as_slice().get(off..end)) {
            Some(s) => Ok(s),
            None => InvalidRangeSnafu {
                offset: off,
                len,
                bufsize: self.bufsize,
            }
            .fail(),
        }
    }

    /// A fixed-size array at `off`, or `None` out of range. The safe
    /// equivalent of casting a struct pointer into the buffer.
    pub fn array_at<const N: usize>(&self, off: usize) -> Option<&[u8; N]> {
        off.checked_add(N)
            .and_then(|end| self.as_slice().get(off..end))
            .map(|s| s.try_into().expect("slice length equals N"))
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], SBufError> {
        match offset
            .checked_add(N)
            .and_then(|end| self.as_slice().get(offset..end))
        {
            Some(s) => Ok(s.try_into().expect("slice length equals N")),
            None => ReadPastEndSnafu {
                offset,
                width: N,
                bufsize: self.bufsize,
            }
            .fail(),
        }
    }

    pub fn get_u8(&self, offset: usize) -> Result<u8, SBufError> {
        Ok(u8::from_le_bytes(self.read_array(offset)?))
    }

    pub fn get_i8(&self, offset: usize) -> Result<i8, SBufError> {
        Ok(self.get_u8(offset)? as i8)
    }

    pub fn get_u16_le(&self, offset: usize) -> Result<u16, SBufError> {
        Ok(u16::from_le_bytes(self.read_array(offset)?))
    }

    pub fn get_u16_be(&self, offset: usize) -> Result<u16, SBufError> {
        Ok(u16::from_be_bytes(self.read_array(offset)?))
    }

    pub fn get_u32_le(&self, offset: usize) -> Result<u32, SBufError> {
        Ok(u32::from_le_bytes(self.read_array(offset)?))
    }

    pub fn get_u32_be(&self, offset: usize) -> Result<u32, SBufError> {
        Ok(u32::from_be_bytes(self.read_array(offset)?))
    }

    pub fn get_u64_le(&self, offset: usize) -> Result<u64, SBufError> {
        Ok(u64::from_le_bytes(self.read_array(offset)?))
    }

    pub fn get_u64_be(&self, offset: usize) -> Result<u64, SBufError> {
        Ok(u64::from_be_bytes(self.read_array(offset)?))
    }

    pub fn get_i16_le(&self, offset: usize) -> Result<i16, SBufError> {
        Ok(self.get_u16_le(offset)? as i16)
    }

    pub fn get_i16_be(&self, offset: usize) -> Result<i16, SBufError> {
        Ok(self.get_u16_be(offset)? as i16)
    }

    pub fn get_i32_le(&self, offset: usize) -> Result<i32, SBufError> {
        Ok(self.get_u32_le(offset)? as i32)
    }

    pub fn get_i32_be(&self, offset: usize) -> Result<i32, SBufError> {
        Ok(self.get_u32_be(offset)? as i32)
    }

    pub fn get_i64_le(&self, offset: usize) -> Result<i64, SBufError> {
        Ok(self.get_u64_le(offset)? as i64)
    }

    pub fn get_i64_be(&self, offset: usize) -> Result<i64, SBufError> {
        Ok(self.get_u64_be(offset)? as i64)
    }

    pub fn get_u16(&self, offset: usize, order: ByteOrder) -> Result<u16, SBufError> {
        match order {
            ByteOrder::LittleEndian => self.get_u16_le(offset),
            ByteOrder::BigEndian => self.get_u16_be(offset),
        }
    }

    pub fn get_u32(&self, offset: usize, order: ByteOrder) -> Result<u32, SBufError> {
        match order {
            ByteOrder::LittleEndian => self.get_u32_le(offset),
            ByteOrder::BigEndian => self.get_u32_be(offset),
        }
    }

    pub fn get_u64(&self, offset: usize, order: ByteOrder) -> Result<u64, SBufError> {
        match order {
            ByteOrder::LittleEndian => self.get_u64_le(offset),
            ByteOrder::BigEndian => self.get_u64_be(offset),
        }
    }

    pub fn get_i16(&self, offset: usize, order: ByteOrder) -> Result<i16, SBufError> {
        Ok(self.get_u16(offset, order)? as i16)
    }

    pub fn get_i32(&self, offset: usize, order: ByteOrder) -> Result<i32, SBufError> {
        Ok(self.get_u32(offset, order)? as i32)
    }

    pub fn get_i64(&self, offset: usize, order: ByteOrder) -> Result<i64, SBufError> {
        Ok(self.get_u64(offset, order)? as i64)
    }

    /// First occurrence of `b` at or after `start`.
    pub fn find_byte(&self, b: u8, start: usize) -> Option<usize> {
        self.as_slice()
            .get(start..)?
            .iter()
            .position(|&x| x == b)
            .map(|i| i + start)
    }

    /// First occurrence of `needle` at or after `start`.
    pub fn find(&self, needle: &[u8], start: usize) -> Option<usize> {
        if needle.is_empty() {
            return None;
        }
        Finder::new(needle)
            .find(self.as_slice().get(start..)?)
            .map(|i| i + start)
    }

    /// Whether `[off, off+len)` is in range and every byte equals `b`.
    pub fn is_constant(&self, off: usize, len: usize, b: u8) -> bool {
        self.substr(off, len)
            .map(|s| s.iter().all(|&x| x == b))
            .unwrap_or(false)
    }

    /// The smallest period `k ≤ max_ngram` such that the whole view repeats
    /// with period `k` (the ngram occurring at least twice), or 0 if the
    /// view is not periodic. A 1024-byte run of `A` has ngram size 1.
    pub fn find_ngram_size(&self, max_ngram: usize) -> usize {
        let buf = self.as_slice();
        for k in 1..=max_ngram {
            if k * 2 > buf.len() {
                break;
            }
            if (k..buf.len()).all(|i| buf[i] == buf[i - k]) {
                return k;
            }
        }
        0
    }

    /// Iterator over the newline-delimited lines of the page, yielding
    /// `(offset, line)` without the terminator. A final unterminated line
    /// is yielded too. The margin is never visited.
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            page: self.page(),
            pos: 0,
        }
    }

    /// Hex digest of the whole view under `alg`, memoized: repeat calls
    /// with the same algorithm return the cached string.
    pub fn hash(&self, alg: HashAlgorithm) -> String {
        let mut memo = self.hash_memo.lock();
        if let Some((cached_alg, digest)) = memo.as_ref() {
            if *cached_alg == alg {
                return digest.clone();
            }
        }
        let digest = alg.hash_hex(self.as_slice());
        *memo = Some((alg, digest.clone()));
        digest
    }

    /// Write `[off, off+len)` to `w`; out-of-range turns into
    /// `InvalidInput`.
    pub fn write_range_to(&self, w: &mut dyn Write, off: usize, len: usize) -> io::Result<usize> {
        let bytes = self
            .substr(off, len)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        w.write_all(bytes)?;
        Ok(bytes.len())
    }

    /// Write the whole view to `w`.
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<usize> {
        w.write_all(self.as_slice())?;
        Ok(self.bufsize)
    }

    /// Dump the whole view into a new file at `path`.
    pub fn write_to_path(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.as_slice())
    }

    /// Classic offset/hex/ascii dump, 16 bytes per row. Debug aid.
    pub fn hex_dump(&self, w: &mut dyn Write) -> io::Result<()> {
        for (row, chunk) in self.as_slice().chunks(16).enumerate() {
            write!(w, "{:08x}  ", row * 16)?;
            for i in 0..16 {
                match chunk.get(i) {
                    Some(b) => write!(w, "{:02x} ", b)?,
                    None => write!(w, "   ")?,
                }
            }
            write!(w, " ")?;
            for &b in chunk {
                let c = if (0x20..0x7f).contains(&b) { b as char } else { '.' };
                write!(w, "{}", c)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

impl Drop for SBuf {
    fn drop(&mut self) {
        if self.is_child {
            self.root.children.fetch_sub(1, Ordering::AcqRel);
        } else {
            let live = self.root.children.load(Ordering::Acquire);
            if live != 0 {
                // The Arc keeps the bytes alive, so this is a leak rather
                // than a use-after-free; it still marks a scanner bug.
                error!(
                    message = "sbuf dropped with live child views",
                    pos0 = %self.pos0,
                    children = live,
                );
            }
        }
    }
}

// The storage body is elided from Debug output.
impl fmt::Debug for SBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SBuf")
            .field("pos0", &self.pos0.to_string())
            .field("bufsize", &self.bufsize)
            .field("pagesize", &self.pagesize)
            .field("children", &self.children())
            .finish()
    }
}

/// See [`SBuf::lines`].
pub struct Lines<'a> {
    page: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.page.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.page[start..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                self.pos = start + i + 1;
                Some((start, &rest[..i]))
            }
            None => {
                self.pos = self.page.len();
                Some((start, rest))
            }
        }
    }
}
