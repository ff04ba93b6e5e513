//! Chunked writes that degrade under contention
//!
//! Rows are written in chunks of the first schedule size. A failed chunk is
//! split into chunks of the next size and retried, down to single rows. Only a
//! single row that still fails is reported, with the error that rejected it.
//! Every successful chunk is its own short commit followed by a small pause.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Chunk sizes to try, largest first, always ending at 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSchedule {
    sizes: Vec<usize>,
}

impl ChunkSchedule {
    pub fn new(sizes: Vec<usize>) -> Self {
        let mut sizes: Vec<usize> = sizes.into_iter().filter(|s| *s > 0).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes.dedup();
        if sizes.last() != Some(&1) {
            sizes.push(1);
        }
        Self { sizes }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }
}

impl Default for ChunkSchedule {
    fn default() -> Self {
        Self::new(vec![500, 50, 1])
    }
}

/// Outcome of a chunked write
#[derive(Debug)]
pub struct ChunkedWriteReport<T> {
    /// Rows written
    pub succeeded: usize,
    /// Rows that failed as single-row writes, with the reason
    pub failed: Vec<(T, String)>,
    /// Chunks committed
    pub batches_committed: usize,
    /// Chunks that failed and were split
    pub degraded_batches: usize,
}

impl<T> Default for ChunkedWriteReport<T> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failed: Vec::new(),
            batches_committed: 0,
            degraded_batches: 0,
        }
    }
}

fn split<T>(rows: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(rows.len().div_ceil(size.max(1)));
    let mut current = Vec::with_capacity(size);
    for row in rows {
        current.push(row);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Write `rows` through `write`, shrinking chunk size on failure
pub async fn write_in_chunks<T, F, Fut>(
    rows: Vec<T>,
    schedule: &ChunkSchedule,
    pause: Duration,
    mut write: F,
) -> ChunkedWriteReport<T>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let sizes = schedule.sizes();
    let mut report = ChunkedWriteReport::default();

    // LIFO stack; chunks are pushed in reverse so they are written in order
    let mut pending: Vec<(usize, Vec<T>)> =
        split(rows, sizes[0]).into_iter().rev().map(|c| (0, c)).collect();

    while let Some((level, chunk)) = pending.pop() {
        let len = chunk.len();
        match write(chunk.clone()).await {
            Ok(_) => {
                report.succeeded += len;
                report.batches_committed += 1;
                log::debug!("Committed chunk of {} rows (level {})", len, level);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
            Err(e) if len > 1 && level + 1 < sizes.len() => {
                let next = level + 1;
                log::warn!(
                    "Chunk of {} rows failed ({}); retrying in chunks of {}",
                    len,
                    e,
                    sizes[next]
                );
                report.degraded_batches += 1;
                for sub in split(chunk, sizes[next]).into_iter().rev() {
                    pending.push((next, sub));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                log::warn!("Write of {} row(s) failed after all retries: {}", len, reason);
                report
                    .failed
                    .extend(chunk.into_iter().map(|row| (row, reason.clone())));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EclError;
    use std::sync::Mutex;

    #[test]
    fn test_schedule_normalised() {
        assert_eq!(ChunkSchedule::new(vec![50, 0, 500]).sizes(), &[500, 50, 1]);
        assert_eq!(ChunkSchedule::new(vec![]).sizes(), &[1]);
        assert_eq!(ChunkSchedule::new(vec![10, 10, 1]).sizes(), &[10, 1]);
    }

    #[test]
    fn test_split() {
        let chunks = split((0..7).collect(), 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[tokio::test]
    async fn test_all_rows_written_in_large_chunks() {
        let calls = Mutex::new(Vec::new());
        let report = write_in_chunks(
            (0..1200).collect::<Vec<u32>>(),
            &ChunkSchedule::default(),
            Duration::ZERO,
            |chunk| {
                calls.lock().unwrap().push(chunk.len());
                async move { Ok(chunk.len()) }
            },
        )
        .await;

        assert_eq!(report.succeeded, 1200);
        assert!(report.failed.is_empty());
        assert_eq!(*calls.lock().unwrap(), vec![500, 500, 200]);
    }

    #[tokio::test]
    async fn test_bad_row_isolated_by_cascade() {
        let written = Mutex::new(Vec::new());
        let report = write_in_chunks(
            (0..120).collect::<Vec<u32>>(),
            &ChunkSchedule::new(vec![100, 10, 1]),
            Duration::ZERO,
            |chunk| {
                let ok = !chunk.contains(&37);
                if ok {
                    written.lock().unwrap().extend(chunk.iter().copied());
                }
                async move {
                    if ok {
                        Ok(chunk.len())
                    } else {
                        Err(EclError::Constraint("row 37 rejected".to_string()))
                    }
                }
            },
        )
        .await;

        assert_eq!(report.succeeded, 119);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 37);
        assert!(report.failed[0].1.contains("row 37"));
        // 100-row chunk and 10-row chunk both degraded
        assert_eq!(report.degraded_batches, 2);

        let mut written = written.into_inner().unwrap();
        written.sort_unstable();
        assert_eq!(written.len(), 119);
        assert!(!written.contains(&37));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_at_micro_batch() {
        let attempts = Mutex::new(0usize);
        let report = write_in_chunks(
            (0..20).collect::<Vec<u32>>(),
            &ChunkSchedule::new(vec![20, 5, 1]),
            Duration::ZERO,
            |chunk| {
                let mut n = attempts.lock().unwrap();
                *n += 1;
                let first = *n == 1;
                async move {
                    if first {
                        Err(EclError::Storage("lock timeout".to_string()))
                    } else {
                        Ok(chunk.len())
                    }
                }
            },
        )
        .await;

        assert_eq!(report.succeeded, 20);
        assert!(report.failed.is_empty());
        assert_eq!(report.batches_committed, 4);
    }
}
