//! Chunking of one task's ephemeris into bounded stream messages

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// One stream message worth of points
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    pub stream_chunk_id: u32,
    pub points: Vec<T>,
}

/// Groups a lazy sequence into chunks of at most `size` items.
///
/// Chunk ids start at 0 and increase by one. An empty input still produces a
/// single empty chunk so the consumer sees the stream complete.
#[derive(Debug)]
pub struct Chunker<I> {
    inner: I,
    size: usize,
    next_id: u32,
    done: bool,
}

impl<I: Iterator> Chunker<I> {
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            next_id: 0,
            done: false,
        }
    }
}

impl<I: Iterator> Iterator for Chunker<I> {
    type Item = Chunk<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let points: Vec<_> = self.inner.by_ref().take(self.size).collect();
        if points.len() < self.size {
            self.done = true;
            if points.is_empty() && self.next_id > 0 {
                return None;
            }
        }

        let chunk = Chunk {
            stream_chunk_id: self.next_id,
            points,
        };
        self.next_id += 1;
        Some(chunk)
    }
}

/// Number of chunks a stream of `points` items produces
pub fn chunk_count(points: usize, size: usize) -> usize {
    let size = size.max(1);
    if points == 0 {
        1
    } else {
        points.div_ceil(size)
    }
}
