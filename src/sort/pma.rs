//! Packed memory array: a sorted run spilled to a temp file as a run-length
//! header followed by a sequence of varint-length-prefixed `(key, value)`
//! records, read back sequentially (or skipped wholesale) during a merge
//! pass.

use crate::error::Result;
use crate::sort::ladder::Pair;
use crate::types::{decode_varint, encode_varint};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

/// Width of the run-length header: a varint forced to its full 9-byte form
/// (via continuation bits on every leading byte, same trick `encode_varint`
/// already uses past `u64::MAX >> 8`) so it can be back-patched in place
/// once the run's true length is known, without shifting any record bytes
/// that follow it.
const RUN_HEADER_SIZE: usize = 9;

fn encode_run_header(total_bytes: u64) -> [u8; RUN_HEADER_SIZE] {
    let mut header = [0u8; RUN_HEADER_SIZE];
    header[8] = total_bytes as u8;
    let mut rest = total_bytes >> 8;
    for byte in header[..8].iter_mut().rev() {
        *byte = ((rest & 0x7f) | 0x80) as u8;
        rest >>= 7;
    }
    header
}

pub struct PmaWriter {
    writer: BufWriter<File>,
    bytes_in_run: u64,
}

impl PmaWriter {
    /// Open `file` for writing and reserve the run-length header at its
    /// start; the real length is filled in by `into_inner`.
    pub fn create(mut file: File) -> Result<Self> {
        file.write_all(&[0u8; RUN_HEADER_SIZE])?;
        Ok(Self { writer: BufWriter::new(file), bytes_in_run: 0 })
    }

    /// Append more records to the run. Safe to call more than once per run
    /// (the merge path writes its output in fixed-size batches); the
    /// run-length header tallies every call until `into_inner`.
    pub fn write_sorted_run(&mut self, pairs: &[Pair]) -> Result<()> {
        for pair in pairs {
            let key_len = encode_varint(pair.key.len() as u64);
            let value_len = encode_varint(pair.value.len() as u64);
            self.bytes_in_run +=
                (key_len.len() + pair.key.len() + value_len.len() + pair.value.len()) as u64;
            self.writer.write_all(&key_len)?;
            self.writer.write_all(&pair.key)?;
            self.writer.write_all(&value_len)?;
            self.writer.write_all(&pair.value)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Finalize the run: back-patch its length header and hand back the
    /// file, rewound to the start so the caller can open it for reading.
    pub fn into_inner(mut self) -> Result<File> {
        self.writer.flush()?;
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&encode_run_header(self.bytes_in_run))?;
        self.writer.flush()?;
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

/// Sequential reader over one PMA run, used as one input to a merge pass.
pub struct PmaReader {
    reader: BufReader<File>,
    /// Bytes of record data left unread in this run, per the header.
    remaining: u64,
}

impl PmaReader {
    pub fn open(mut file: File) -> Result<Self> {
        let mut header = [0u8; RUN_HEADER_SIZE];
        file.read_exact(&mut header)?;
        let (run_len, _) =
            decode_varint(&header).expect("run header is always a full 9-byte varint");
        Ok(Self { reader: BufReader::new(file), remaining: run_len })
    }

    /// Bytes of record data this run still has to offer.
    pub fn remaining_bytes(&self) -> u64 {
        self.remaining
    }

    /// Discard the rest of this run without decoding any more records.
    pub fn skip_rest(&mut self) -> Result<()> {
        if self.remaining > 0 {
            self.reader.seek_relative(self.remaining as i64)?;
            self.remaining = 0;
        }
        Ok(())
    }

    /// Read the next record, or `None` at end of run.
    pub fn next_pair(&mut self) -> Result<Option<Pair>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let key = self.read_length_prefixed()?.expect("run header promised more bytes");
        let value = self
            .read_length_prefixed()?
            .expect("value must follow key in a well-formed PMA run");
        Ok(Some(Pair { key, value }))
    }

    fn read_length_prefixed(&mut self) -> Result<Option<Vec<u8>>> {
        let mut varint_buf = [0u8; crate::types::MAX_VARINT_SIZE];
        let mut filled = 0;
        loop {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte)? {
                0 if filled == 0 => return Ok(None),
                0 => break,
                _ => {}
            }
            varint_buf[filled] = byte[0];
            filled += 1;
            if let Some((len, n)) = decode_varint(&varint_buf[..filled]) {
                if n == filled {
                    self.remaining = self.remaining.saturating_sub((n + len as usize) as u64);
                    let mut buf = vec![0u8; len as usize];
                    self.reader.read_exact(&mut buf)?;
                    return Ok(Some(buf));
                }
            }
            if filled == varint_buf.len() {
                break;
            }
        }
        Ok(None)
    }
}
