// src/ring_buffer.rs

use crate::error::Error;
use log::debug;

/// Returns true iff `n` is a power of two usable as a ring capacity (`n >= 2`).
pub fn is_power_of_two(n: u32) -> bool {
    n >= 2 && n & (n - 1) == 0
}

/// Smallest power of two `>= n`, with 0 and 1 mapping to 2.
///
/// Returns `None` when the result does not fit in a `u32`.
pub fn round_up_power_of_two(n: u32) -> Option<u32> {
    if n < 2 {
        return Some(2);
    }
    n.checked_next_power_of_two()
}

fn allocate_storage(capacity: usize) -> Result<Box<[u8]>, Error> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(capacity)
        .map_err(|_| Error::Allocation { requested: capacity })?;
    storage.resize(capacity, 0);
    Ok(storage.into_boxed_slice())
}

/// Fixed-capacity circular byte buffer for staging streamed I/O.
///
/// The read and write cursors count bytes since creation and are never
/// masked when stored. They wrap modulo 2^32; because the capacity is a
/// power of two no larger than 2^31, `write_cursor - read_cursor` (wrapping)
/// is always the exact fill level and `cursor & (capacity - 1)` is always the
/// physical index.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_cursor: u32,
    write_cursor: u32,
    capacity: u32,
}

impl RingBuffer {
    /// Creates an empty buffer, rounding `requested_capacity` up to a power of two.
    pub fn new(requested_capacity: usize) -> Result<Self, Error> {
        let capacity = u32::try_from(requested_capacity)
            .ok()
            .and_then(round_up_power_of_two)
            .ok_or(Error::CapacityTooLarge(requested_capacity as u64))?;
        let storage = allocate_storage(capacity as usize)?;
        debug!(
            "Ring buffer created: requested {} bytes, capacity {}",
            requested_capacity, capacity
        );
        Ok(Self {
            storage,
            read_cursor: 0,
            write_cursor: 0,
            capacity,
        })
    }

    /// Releases the backing storage.
    pub fn destroy(self) {
        debug!("Ring buffer of capacity {} destroyed", self.capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn len(&self) -> usize {
        self.write_cursor.wrapping_sub(self.read_cursor) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == self.read_cursor
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Free space available for appending.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }

    fn physical(&self, cursor: u32) -> usize {
        (cursor & (self.capacity - 1)) as usize
    }

    /// Appends all of `data` or nothing at all.
    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        let size = data.len();
        let remaining = self.remaining();
        if size > remaining {
            return Err(Error::BufferFull { requested: size, remaining });
        }

        let pos = self.physical(self.write_cursor);
        let first = size.min(self.capacity() - pos);
        self.storage[pos..pos + first].copy_from_slice(&data[..first]);
        self.storage[..size - first].copy_from_slice(&data[first..]);

        self.write_cursor = self.write_cursor.wrapping_add(size as u32);
        Ok(())
    }

    /// Copies up to `out.len()` bytes out of the buffer.
    ///
    /// Returns the number of bytes copied, which is less than requested when
    /// fewer bytes are buffered. Calling this on an empty buffer is a caller
    /// bug and yields `Error::Empty`; check `is_empty()` first at end of stream.
    pub fn remove(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let size = out.len().min(self.len());

        let pos = self.physical(self.read_cursor);
        let first = size.min(self.capacity() - pos);
        out[..first].copy_from_slice(&self.storage[pos..pos + first]);
        out[first..size].copy_from_slice(&self.storage[..size - first]);

        self.read_cursor = self.read_cursor.wrapping_add(size as u32);
        Ok(size)
    }

    /// Discards up to `requested` bytes without copying them.
    pub fn drain(&mut self, requested: usize) -> usize {
        let size = requested.min(self.len());
        self.read_cursor = self.read_cursor.wrapping_add(size as u32);
        size
    }

    /// Advances past `n` bytes previously obtained from `contiguous_view`.
    pub fn consume(&mut self, n: usize) -> usize {
        self.drain(n)
    }

    /// Empties the buffer and resets both cursors.
    pub fn clear(&mut self) {
        self.read_cursor = 0;
        self.write_cursor = 0;
    }

    /// Looks for `separator` in the buffered bytes.
    ///
    /// Returns the distance from the read position to just past the end of
    /// the first match, or 0 when there is no match. An empty separator never
    /// matches.
    pub fn search(&self, separator: &[u8]) -> usize {
        let seplen = separator.len();
        let len = self.len();
        if seplen == 0 || seplen > len {
            return 0;
        }

        let capacity = self.capacity();
        for i in 0..=len - seplen {
            let pos = self.physical(self.read_cursor.wrapping_add(i as u32));
            let matched = if pos + seplen > capacity {
                // Candidate straddles the physical end of storage.
                let tail = capacity - pos;
                self.storage[pos..] == separator[..tail]
                    && self.storage[..seplen - tail] == separator[tail..]
            } else {
                self.storage[pos..pos + seplen] == *separator
            };
            if matched {
                return i + seplen;
            }
        }
        0
    }

    /// `search` with `None` in place of the 0 sentinel.
    pub fn find(&self, separator: &[u8]) -> Option<usize> {
        match self.search(separator) {
            0 => None,
            end => Some(end),
        }
    }

    /// Returns the buffered bytes as up to two slices in logical order.
    ///
    /// The second slice is empty unless the data wraps past the physical end.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let len = self.len();
        let pos = self.physical(self.read_cursor);
        let capacity = self.capacity();
        if pos + len <= capacity {
            (&self.storage[pos..pos + len], &[])
        } else {
            let first = capacity - pos;
            (&self.storage[pos..], &self.storage[..len - first])
        }
    }

    /// Returns all buffered bytes as one contiguous slice.
    ///
    /// When the data wraps, the storage is replaced by a fresh allocation
    /// holding the same bytes from index 0 and the cursors are rebased to
    /// `0..len`. The slice is valid until the next mutation; follow a write of
    /// its bytes with `consume`. On allocation failure the buffer is unchanged.
    pub fn contiguous_view(&mut self) -> Result<&[u8], Error> {
        let len = self.len();
        let rpos = self.physical(self.read_cursor);
        let capacity = self.capacity();
        if rpos + len <= capacity {
            return Ok(&self.storage[rpos..rpos + len]);
        }

        let mut relaid = allocate_storage(capacity)?;
        let tail = capacity - rpos;
        relaid[..tail].copy_from_slice(&self.storage[rpos..]);
        relaid[tail..len].copy_from_slice(&self.storage[..len - tail]);
        self.storage = relaid;
        self.read_cursor = 0;
        self.write_cursor = len as u32;
        debug!("Relaid out {} wrapped bytes ({} from the tail)", len, tail);

        Ok(&self.storage[..len])
    }

    #[cfg(test)]
    pub(crate) fn storage_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }

    #[cfg(test)]
    fn with_origin(requested_capacity: usize, origin: u32) -> Self {
        let mut buf = Self::new(requested_capacity).unwrap();
        buf.read_cursor = origin;
        buf.write_cursor = origin;
        buf
    }
}
