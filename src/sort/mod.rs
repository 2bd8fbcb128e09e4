//! External merge sort for index builds and `ORDER BY` spills too large to
//! hold in memory.
//!
//! Pipeline: incoming pairs accumulate in an in-memory `Ladder`; once the
//! accumulated size crosses `memory_budget`, the ladder is drained to one
//! sorted run and spilled to a temp-file PMA. When every input has been
//! consumed, the PMA runs (plus whatever's left in the ladder) are merged
//! pairwise in batches of at most `MAX_MERGE` using a min-heap over each
//! run's current head — playing the same role as the format's loser tree,
//! just implemented with `BinaryHeap` rather than a literal tournament
//! tree, because Rust's heap already gives O(log k) next-smallest.
//!
//! `finish` hands back a `SortedStream` rather than a materialized `Vec`:
//! the whole point of spilling is that the result may not fit in memory
//! either, so the caller pulls pairs one at a time off the final run.

pub mod ladder;
pub mod pma;

use crate::error::Result;
use crate::sort::ladder::{Ladder, Pair};
use crate::sort::pma::{PmaReader, PmaWriter};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use tempfile::TempDir;

/// Maximum number of runs merged in a single pass, mirroring the format's
/// cap on simultaneously open PMA file descriptors during a merge.
pub const MAX_MERGE: usize = 16;

/// Default in-memory budget before a run spills to disk.
pub const DEFAULT_MEMORY_BUDGET: usize = 4 * 1024 * 1024;

struct HeapEntry {
    pair: Pair,
    run_index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.pair.key == other.pair.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pair.key.cmp(&other.pair.key)
    }
}

/// Accumulates `(key, value)` pairs and produces them back in sorted order,
/// spilling to temp files once the in-memory budget is exceeded.
pub struct Sorter {
    ladder: Ladder,
    memory_budget: usize,
    approx_bytes: usize,
    spill_dir: TempDir,
    runs: Vec<File>,
}

impl Sorter {
    pub fn new(memory_budget: usize) -> Result<Self> {
        Ok(Self {
            ladder: Ladder::new(),
            memory_budget,
            approx_bytes: 0,
            spill_dir: tempfile::tempdir()?,
            runs: Vec::new(),
        })
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.approx_bytes += key.len() + value.len() + 32;
        self.ladder.push(key, value);
        if self.approx_bytes >= self.memory_budget {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.ladder.is_empty() {
            return Ok(());
        }
        let sorted = self.ladder.drain_sorted();
        let file = tempfile_in(&self.spill_dir)?;
        let mut writer = PmaWriter::create(file)?;
        writer.write_sorted_run(&sorted)?;
        self.runs.push(writer.into_inner()?);
        self.approx_bytes = 0;
        Ok(())
    }

    /// Finish accepting input and return a stream that yields every pair in
    /// sorted order. If nothing ever spilled, the stream serves straight out
    /// of the in-memory ladder; otherwise it serves off the final merged run
    /// on disk, one record at a time.
    pub fn finish(mut self) -> Result<SortedStream> {
        let tail = self.ladder.drain_sorted();
        if self.runs.is_empty() {
            return Ok(SortedStream::in_memory(tail));
        }
        if !tail.is_empty() {
            let file = tempfile_in(&self.spill_dir)?;
            let mut writer = PmaWriter::create(file)?;
            writer.write_sorted_run(&tail)?;
            self.runs.push(writer.into_inner()?);
        }

        let mut files = self.runs;
        while files.len() > 1 {
            let mut next_round = Vec::new();
            for batch in files.chunks(MAX_MERGE) {
                let mut readers = Vec::with_capacity(batch.len());
                for file in batch {
                    readers.push(PmaReader::open(file.try_clone()?)?);
                }
                next_round.push(merge_batch(&mut readers, &self.spill_dir)?);
            }
            files = next_round;
        }

        match files.pop() {
            Some(file) => SortedStream::on_disk(file),
            None => Ok(SortedStream::in_memory(Vec::new())),
        }
    }
}

fn tempfile_in(dir: &TempDir) -> Result<File> {
    Ok(tempfile::tempfile_in(dir.path())?)
}

/// Merge up to `MAX_MERGE` readers into one new temp-file run using a
/// min-heap over each run's current head record. Returns the merged run's
/// file, rewound to its start.
fn merge_batch(readers: &mut [PmaReader], spill_dir: &TempDir) -> Result<File> {
    let mut heap = BinaryHeap::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(pair) = reader.next_pair()? {
            heap.push(Reverse(HeapEntry { pair, run_index: i }));
        }
    }

    let out_file = tempfile_in(spill_dir)?;
    let mut writer = PmaWriter::create(out_file)?;
    let mut batch = Vec::new();

    while let Some(Reverse(entry)) = heap.pop() {
        batch.push(entry.pair);
        if batch.len() >= 4096 {
            writer.write_sorted_run(&batch)?;
            batch.clear();
        }
        if let Some(next) = readers[entry.run_index].next_pair()? {
            heap.push(Reverse(HeapEntry { pair: next, run_index: entry.run_index }));
        }
    }
    if !batch.is_empty() {
        writer.write_sorted_run(&batch)?;
    }

    writer.into_inner()
}

/// A sorted sequence of pairs, served either straight out of memory (when the
/// sort never spilled) or off the final merged run on disk — whichever
/// `Sorter::finish` produced. Callers pull one record at a time rather than
/// collecting the whole thing, which is the point: the merged output can be
/// exactly as large as the input that didn't fit in memory to begin with.
pub struct SortedStream {
    inner: StreamKind,
}

enum StreamKind {
    Memory { pairs: Vec<Pair>, pos: usize },
    Disk { file: File, reader: PmaReader },
}

impl SortedStream {
    fn in_memory(pairs: Vec<Pair>) -> Self {
        Self { inner: StreamKind::Memory { pairs, pos: 0 } }
    }

    fn on_disk(mut file: File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let reader = PmaReader::open(file.try_clone()?)?;
        Ok(Self { inner: StreamKind::Disk { file, reader } })
    }

    /// The next pair in ascending key order, or `None` once exhausted.
    pub fn next(&mut self) -> Result<Option<Pair>> {
        match &mut self.inner {
            StreamKind::Memory { pairs, pos } => {
                if *pos < pairs.len() {
                    let pair = pairs[*pos].clone();
                    *pos += 1;
                    Ok(Some(pair))
                } else {
                    Ok(None)
                }
            }
            StreamKind::Disk { reader, .. } => reader.next_pair(),
        }
    }

    /// Start back over from the first pair.
    pub fn rewind(&mut self) -> Result<()> {
        match &mut self.inner {
            StreamKind::Memory { pos, .. } => *pos = 0,
            StreamKind::Disk { file, reader } => {
                file.seek(SeekFrom::Start(0))?;
                *reader = PmaReader::open(file.try_clone()?)?;
            }
        }
        Ok(())
    }

    /// Drain every remaining pair into a `Vec`. Only meant for callers (and
    /// tests) that already know the result is small; the streaming `next`
    /// is the interface large merges are expected to use.
    pub fn collect(mut self) -> Result<Vec<Pair>> {
        let mut out = Vec::new();
        while let Some(pair) = self.next()? {
            out.push(pair);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorter_small_input_stays_in_memory() -> Result<()> {
        let mut sorter = Sorter::new(DEFAULT_MEMORY_BUDGET)?;
        for k in [5u32, 1, 3, 2, 4] {
            sorter.insert(k.to_be_bytes().to_vec(), vec![k as u8])?;
        }
        let sorted = sorter.finish()?.collect()?;
        let keys: Vec<u32> =
            sorted.iter().map(|p| u32::from_be_bytes(p.key[..].try_into().unwrap())).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_sorter_spills_and_merges() -> Result<()> {
        let mut sorter = Sorter::new(256)?;
        let mut expected: Vec<u32> = (0..2000).collect();
        for &k in expected.iter().rev() {
            sorter.insert(k.to_be_bytes().to_vec(), vec![0u8; 16])?;
        }
        let sorted = sorter.finish()?.collect()?;
        let keys: Vec<u32> =
            sorted.iter().map(|p| u32::from_be_bytes(p.key[..].try_into().unwrap())).collect();
        expected.sort();
        assert_eq!(keys, expected);
        Ok(())
    }

    #[test]
    fn test_sorter_many_runs_exceeds_max_merge_fanin() -> Result<()> {
        let mut sorter = Sorter::new(64)?;
        let mut expected: Vec<u32> = (0..2000).collect();
        expected.reverse();
        for &k in &expected {
            sorter.insert(k.to_be_bytes().to_vec(), vec![])?;
        }
        let sorted = sorter.finish()?.collect()?;
        assert_eq!(sorted.len(), 2000);
        let keys: Vec<u32> =
            sorted.iter().map(|p| u32::from_be_bytes(p.key[..].try_into().unwrap())).collect();
        let mut sorted_expected = expected.clone();
        sorted_expected.sort();
        assert_eq!(keys, sorted_expected);
        Ok(())
    }

    #[test]
    fn stream_yields_pairs_one_at_a_time_without_collecting() -> Result<()> {
        let mut sorter = Sorter::new(128)?;
        for k in (0u32..500).rev() {
            sorter.insert(k.to_be_bytes().to_vec(), vec![])?;
        }
        let mut stream = sorter.finish()?;
        let mut prev: Option<u32> = None;
        let mut count = 0;
        while let Some(pair) = stream.next()? {
            let key = u32::from_be_bytes(pair.key[..].try_into().unwrap());
            if let Some(p) = prev {
                assert!(key > p);
            }
            prev = Some(key);
            count += 1;
        }
        assert_eq!(count, 500);
        Ok(())
    }

    #[test]
    fn stream_rewind_replays_from_the_start() -> Result<()> {
        let mut sorter = Sorter::new(64)?;
        for k in (0u32..200).rev() {
            sorter.insert(k.to_be_bytes().to_vec(), vec![])?;
        }
        let mut stream = sorter.finish()?;
        let mut first_pass = 0;
        while stream.next()?.is_some() {
            first_pass += 1;
        }
        stream.rewind()?;
        let mut second_pass = 0;
        while stream.next()?.is_some() {
            second_pass += 1;
        }
        assert_eq!(first_pass, 200);
        assert_eq!(second_pass, 200);
        Ok(())
    }
}
