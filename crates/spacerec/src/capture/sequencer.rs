//! Reorder buffer between concurrent fetches and the output file.
//!
//! Chunks are keyed by their position in the capture (0, 1, 2, ...) and
//! written strictly in that order. Completions that arrive early are parked in
//! a `BTreeMap` until every earlier position has been written.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

pub struct ChunkSequencer<W> {
    writer: W,
    next_position: u64,
    pending: BTreeMap<u64, Bytes>,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> ChunkSequencer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_position: 0,
            pending: BTreeMap::new(),
            bytes_written: 0,
        }
    }

    /// Accept the chunk at `position` and write every chunk that is now
    /// contiguous. Returns how many chunks were written by this call.
    pub async fn push(&mut self, position: u64, data: Bytes) -> std::io::Result<u64> {
        if position < self.next_position || self.pending.contains_key(&position) {
            warn!(position, "Ignoring duplicate chunk");
            return Ok(0);
        }

        self.pending.insert(position, data);

        let mut written = 0;
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next_position {
                trace!(
                    waiting_for = self.next_position,
                    buffered = self.pending.len(),
                    "Chunk buffered out of order"
                );
                break;
            }
            let data = entry.remove();
            self.writer.write_all(&data).await?;
            self.bytes_written += data.len() as u64;
            self.next_position += 1;
            written += 1;
        }
        Ok(written)
    }

    /// Number of chunks written so far.
    pub fn chunks_written(&self) -> u64 {
        self.next_position
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Chunks waiting for an earlier position.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Drop buffered chunks and hand back the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(position: u64) -> Bytes {
        Bytes::from(format!("[{position}]"))
    }

    #[tokio::test]
    async fn out_of_order_completion_is_written_in_order() {
        let mut seq = ChunkSequencer::new(Vec::new());
        let mut flushed = Vec::new();
        for position in [2u64, 0, 4, 1, 3] {
            flushed.push(seq.push(position, chunk(position)).await.unwrap());
        }
        // 2 waits, 0 flushes alone, 4 waits, 1 releases 1 and 2, 3 releases 3 and 4.
        assert_eq!(flushed, vec![0, 1, 0, 2, 2]);
        assert_eq!(seq.buffered(), 0);
        assert_eq!(seq.chunks_written(), 5);
        assert_eq!(seq.into_inner(), b"[0][1][2][3][4]".to_vec());
    }

    #[tokio::test]
    async fn duplicates_are_ignored() {
        let mut seq = ChunkSequencer::new(Vec::new());
        seq.push(0, chunk(0)).await.unwrap();
        assert_eq!(seq.push(0, chunk(0)).await.unwrap(), 0);
        seq.push(2, chunk(2)).await.unwrap();
        assert_eq!(seq.push(2, Bytes::from_static(b"other")).await.unwrap(), 0);
        seq.push(1, chunk(1)).await.unwrap();
        assert_eq!(seq.bytes_written(), 9);
        assert_eq!(seq.into_inner(), b"[0][1][2]".to_vec());
    }

    proptest! {
        #[test]
        fn any_completion_order_yields_ordered_output(
            order in (1usize..40).prop_flat_map(|n| Just((0..n as u64).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let output = rt.block_on(async {
                let mut seq = ChunkSequencer::new(Vec::new());
                for &position in &order {
                    seq.push(position, chunk(position)).await.unwrap();
                }
                assert_eq!(seq.buffered(), 0);
                seq.into_inner()
            });

            let expected: Vec<u8> = (0..order.len() as u64)
                .flat_map(|p| chunk(p).to_vec())
                .collect();
            prop_assert_eq!(output, expected);
        }
    }
}
