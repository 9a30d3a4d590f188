use std::ops::Range;

/// Default chunk size in bytes. Both ends of a transfer must agree on it,
/// since it never travels on the wire.
pub const CHUNK_SIZE: u64 = 512_000;

/// Number of chunks needed to cover `file_size` bytes: `ceil(file_size / chunk_size)`.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size) as u32
}

/// Byte offset at which chunk `index` begins.
pub fn chunk_offset(index: u32, chunk_size: u64) -> u64 {
    index as u64 * chunk_size
}

/// Byte range covered by chunk `index` of a file of `file_size` bytes.
/// Empty when the chunk lies past the end of the file.
pub fn chunk_range(index: u32, chunk_size: u64, file_size: u64) -> Range<u64> {
    let start = chunk_offset(index, chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, CHUNK_SIZE), 0);
        assert_eq!(chunk_count(1, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE, CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE + 1, CHUNK_SIZE), 2);
        assert_eq!(chunk_count(600_000, CHUNK_SIZE), 2);
        assert_eq!(chunk_count(10, 3), 4);
    }

    #[test]
    fn test_chunk_count_zero_chunk_size() {
        assert_eq!(chunk_count(100, 0), 0);
    }

    #[test]
    fn test_chunk_ranges_tile_the_file() {
        let size = 600_000;
        assert_eq!(chunk_range(0, CHUNK_SIZE, size), 0..512_000);
        assert_eq!(chunk_range(1, CHUNK_SIZE, size), 512_000..600_000);
        assert_eq!(chunk_range(2, CHUNK_SIZE, size), 600_000..600_000);

        let chunk_size = 7;
        let size = 50;
        let mut next = 0;
        for index in 0..chunk_count(size, chunk_size) {
            let range = chunk_range(index, chunk_size, size);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, size);
    }
}
