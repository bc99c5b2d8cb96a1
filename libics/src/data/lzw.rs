//! Decoder for legacy `compress` (`.Z`) streams
//!
//! Codes start 9 bits wide and grow by one bit each time the dictionary fills up to the current
//! width, up to the maximum declared in the stream header (at most 16). In block mode, code 256
//! clears the dictionary. Codes of one width are written in groups of `n_bits` bytes, so the bit
//! position is rounded up to a whole group whenever the width changes.

use std::io::{self, Read};

use tracing::{debug, trace};

use crate::{error::alloc_buffer, Error, Result, BUF_SIZE};

const MAGIC: [u8; 2] = [0x1f, 0x9d];
const BIT_MASK: u8 = 0x1f;
const BLOCK_MODE: u8 = 0x80;
const INIT_BITS: u32 = 9;
const MAX_BITS: u32 = 16;
const CLEAR: usize = 256;
const FIRST: usize = 257;
const TABLE_SIZE: usize = 1 << MAX_BITS;
// refill the window when fewer bytes than this remain unread
const WINDOW_SLACK: usize = 64;

/// Rolling input window codes are read from
struct BitWindow<R> {
    inner: R,
    buf: Vec<u8>,
    len: usize,
    pos: usize,
    last_read: usize,
}

impl<R: Read> BitWindow<R> {
    fn new(inner: R) -> Result<Self> {
        // a code may straddle up to two bytes past the end of the valid data
        let buf = alloc_buffer(BUF_SIZE + WINDOW_SLACK + 2)?;
        let mut window = Self {
            inner,
            buf,
            len: 0,
            pos: 0,
            last_read: 0,
        };
        window.read_more()?;
        Ok(window)
    }

    fn read_more(&mut self) -> Result<()> {
        let target = &mut self.buf[self.len..self.len + BUF_SIZE];
        let mut read = 0;
        while read < target.len() {
            match self.inner.read(&mut target[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Io {
                        context: "reading compressed data",
                        source,
                    })
                }
            }
        }
        self.len += read;
        self.last_read = read;
        Ok(())
    }

    /// Drops the bytes already consumed and tops the window up
    fn refill(&mut self) -> Result<()> {
        let offset = self.pos >> 3;
        if offset >= self.len {
            self.len = 0;
        } else {
            self.buf.copy_within(offset..self.len, 0);
            self.len -= offset;
        }
        self.pos = 0;
        if self.len < WINDOW_SLACK {
            self.read_more()?;
        }
        Ok(())
    }

    /// Bit position up to which whole codes of `n_bits` can be read
    fn limit(&self, n_bits: u32) -> usize {
        let n_bits = n_bits as usize;
        if self.last_read > 0 {
            (self.len - self.len % n_bits) << 3
        } else {
            (self.len << 3).saturating_sub(n_bits - 1)
        }
    }

    fn code(&mut self, n_bits: u32) -> usize {
        let i = self.pos >> 3;
        let bits = usize::from(self.buf[i])
            | usize::from(self.buf[i + 1]) << 8
            | usize::from(self.buf[i + 2]) << 16;
        let code = (bits >> (self.pos & 7)) & ((1 << n_bits) - 1);
        self.pos += n_bits as usize;
        code
    }

    /// Skips to the end of the current group of `n_bits`-wide codes
    fn align(&mut self, n_bits: u32) {
        let group = n_bits as usize * 8;
        self.pos = self.pos.div_ceil(group) * group;
    }
}

/// Dictionary of the decoder
///
/// Entry `code` stands for the string of entry `prefix[code]` followed by `suffix[code]`. Codes
/// below 256 are literal bytes.
struct Table {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
}

impl Table {
    #[allow(clippy::cast_possible_truncation)]
    fn new() -> Result<Self> {
        let mut prefix = Vec::new();
        prefix
            .try_reserve_exact(TABLE_SIZE)
            .map_err(|_| Error::Alloc(TABLE_SIZE * 2))?;
        prefix.resize(TABLE_SIZE, 0);
        let mut suffix = alloc_buffer(TABLE_SIZE)?;
        for (code, slot) in suffix.iter_mut().take(256).enumerate() {
            *slot = code as u8;
        }
        Ok(Self { prefix, suffix })
    }

    fn clear(&mut self) {
        self.prefix[..256].fill(0);
    }
}

const fn code_limit(n_bits: u32, max_bits: u32) -> usize {
    if n_bits == max_bits {
        1 << max_bits
    } else {
        (1 << n_bits) - 1
    }
}

/// Decodes a `compress` stream from `inner` into `out`
///
/// Decoding stops as soon as `out` is full, anything left in the stream is ignored. Returns the
/// number of bytes written, fewer than `out.len()` when the stream ends first.
///
/// # Errors
///
/// - [`Error::CorruptedStream`] on a bad header or an invalid code
/// - [`Error::Io`] if reading fails
/// - [`Error::Alloc`] if the dictionary cannot be allocated
#[allow(clippy::cast_possible_truncation)]
pub fn decode<R: Read>(inner: R, out: &mut [u8]) -> Result<usize> {
    let mut window = BitWindow::new(inner)?;
    if window.len < 3 || window.buf[..2] != MAGIC {
        return Err(Error::CorruptedStream("bad compress magic"));
    }
    let max_bits = u32::from(window.buf[2] & BIT_MASK);
    let block_mode = window.buf[2] & BLOCK_MODE != 0;
    if !(INIT_BITS..=MAX_BITS).contains(&max_bits) {
        return Err(Error::CorruptedStream("unsupported compress code width"));
    }
    debug!(max_bits, block_mode, "decoding compress stream");
    if out.is_empty() {
        return Ok(0);
    }
    let max_max_code = 1usize << max_bits;
    window.pos = 3 << 3;

    let mut table = Table::new()?;
    let mut stack = Vec::new();
    stack
        .try_reserve(TABLE_SIZE)
        .map_err(|_| Error::Alloc(TABLE_SIZE))?;

    let mut n_bits = INIT_BITS;
    let mut max_code = code_limit(n_bits, max_bits);
    let mut free_ent = if block_mode { FIRST } else { CLEAR };
    let mut old_code: Option<usize> = None;
    let mut fin_char = 0u8;
    let mut filled = 0;

    'refill: loop {
        window.refill()?;
        let limit = window.limit(n_bits);
        while window.pos < limit {
            if free_ent > max_code {
                window.align(n_bits);
                n_bits += 1;
                max_code = code_limit(n_bits, max_bits);
                trace!(n_bits, free_ent, "code width increased");
                continue 'refill;
            }
            let code = window.code(n_bits);

            let Some(prev) = old_code else {
                if code >= CLEAR {
                    return Err(Error::CorruptedStream("first code is not a literal"));
                }
                old_code = Some(code);
                fin_char = code as u8;
                out[filled] = fin_char;
                filled += 1;
                if filled == out.len() {
                    return Ok(filled);
                }
                continue;
            };

            if code == CLEAR && block_mode {
                table.clear();
                free_ent = FIRST - 1;
                window.align(n_bits);
                n_bits = INIT_BITS;
                max_code = code_limit(n_bits, max_bits);
                trace!("dictionary cleared");
                continue 'refill;
            }

            stack.clear();
            let mut walk = code;
            if walk >= free_ent {
                if walk > free_ent {
                    return Err(Error::CorruptedStream("code beyond the dictionary"));
                }
                // the string being defined by this very code
                stack.push(fin_char);
                walk = prev;
            }
            while walk >= CLEAR {
                if stack.len() >= TABLE_SIZE {
                    return Err(Error::CorruptedStream("looping dictionary entry"));
                }
                stack.push(table.suffix[walk]);
                walk = usize::from(table.prefix[walk]);
            }
            fin_char = table.suffix[walk];
            stack.push(fin_char);

            let n = stack.len().min(out.len() - filled);
            for (dst, &byte) in out[filled..filled + n].iter_mut().zip(stack.iter().rev()) {
                *dst = byte;
            }
            filled += n;
            if filled == out.len() {
                return Ok(filled);
            }

            if free_ent < max_max_code {
                table.prefix[free_ent] = prev as u16;
                table.suffix[free_ent] = fin_char;
                free_ent += 1;
            }
            old_code = Some(code);
        }
        if window.last_read == 0 {
            break;
        }
    }
    debug!(filled, capacity = out.len(), "compress stream ended early");
    Ok(filled)
}
