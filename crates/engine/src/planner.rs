//! Computes chunk layout from total size and worker count (spec §4.D).

use storage::{Chunk, ChunkStatus};

/// Plan a chunk layout for a file of size `total` bytes, split across
/// `worker_count` workers, given whether the server supports ranges.
///
/// - If `total <= 0` or `range_supported` is false or `worker_count <= 1`,
///   produces a single unbounded chunk `{start: 0, end: -1}`; the worker
///   reads until EOF and the observed byte count becomes the file's total
///   size regardless of what the probe reported (spec §4.E).
/// - Otherwise, splits `[0, total-1]` into `worker_count` contiguous,
///   disjoint chunks, extending the last chunk to cover any remainder.
///
/// Guarantees contiguity, disjointness, full coverage, and stable IDs
/// matching list position (spec §4.D, §8).
pub fn plan(total: Option<u64>, worker_count: u32, range_supported: bool) -> Vec<Chunk> {
    let total = match total {
        Some(t) if t > 0 => t,
        _ => return vec![unbounded_chunk()],
    };

    if !range_supported || worker_count <= 1 {
        return vec![unbounded_chunk()];
    }

    let n = worker_count as u64;
    let base = total / n;
    let mut chunks = Vec::with_capacity(worker_count as usize);
    let mut start = 0u64;

    for i in 0..n {
        let end = if i == n - 1 {
            total - 1
        } else {
            start + base - 1
        };
        chunks.push(Chunk {
            id: i as u32,
            start,
            end: end as i64,
            downloaded: 0,
            status: ChunkStatus::Pending,
        });
        start = end + 1;
    }

    chunks
}

fn unbounded_chunk() -> Chunk {
    Chunk {
        id: 0,
        start: 0,
        end: -1,
        downloaded: 0,
        status: ChunkStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_size_four_workers_contiguous() {
        let chunks = plan(Some(1_048_576), 4, true);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, 262_143);
        assert_eq!(chunks[3].end, 1_048_575);
        for i in 0..chunks.len() - 1 {
            assert_eq!(chunks[i].end + 1, chunks[i + 1].start as i64);
        }
    }

    #[test]
    fn ids_match_list_position() {
        let chunks = plan(Some(1000), 4, true);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id as usize, i);
        }
    }

    #[test]
    fn full_coverage_and_disjointness() {
        let total = 1_000_003u64; // not evenly divisible
        let chunks = plan(Some(total), 7, true);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, (total - 1) as i64);
        let mut covered = 0u64;
        for c in &chunks {
            covered += (c.end - c.start as i64 + 1) as u64;
        }
        assert_eq!(covered, total);
    }

    #[test]
    fn range_unsupported_yields_single_unbounded_chunk() {
        let chunks = plan(Some(1_048_576), 4, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, -1);
    }

    #[test]
    fn unknown_total_size_yields_single_unbounded_chunk() {
        let chunks = plan(None, 8, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, -1);
    }

    #[test]
    fn single_worker_yields_single_unbounded_chunk() {
        let chunks = plan(Some(1_048_576), 1, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, -1);
    }

    #[test]
    fn zero_total_size_yields_single_unbounded_chunk() {
        let chunks = plan(Some(0), 4, true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, -1);
    }
}
