// src/import/reader.rs
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use super::error::ReadError;
use super::normalizer::{normalize, Columns};
use crate::models::import_task::RowFailure;
use crate::models::product::ProductRecord;

/// One bounded slice of the upload.
#[derive(Debug, Default)]
pub struct Chunk {
    pub index: u64,
    /// Valid rows in file order.
    pub records: Vec<ProductRecord>,
    /// File line of each entry in `records`.
    pub lines: Vec<u64>,
    /// Rows the normalizer refused.
    pub rejected: Vec<RowFailure>,
}

impl Chunk {
    /// Data records consumed from the file for this chunk.
    pub fn consumed(&self) -> u64 {
        (self.records.len() + self.rejected.len()) as u64
    }
}

/// Streams a CSV source as chunks of at most `chunk_size` data records.
///
/// Only the chunk being filled is held in memory. The sequence is finite and
/// cannot be restarted; the first read error ends it.
pub struct ChunkedReader<R: Read> {
    reader: csv::Reader<R>,
    columns: Columns,
    chunk_size: usize,
    record: StringRecord,
    next_index: u64,
    records_read: u64,
    finished: bool,
}

impl ChunkedReader<File> {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, ReadError> {
        Self::new(File::open(path)?, chunk_size)
    }
}

impl<R: Read> ChunkedReader<R> {
    /// Reads the header row. A missing `sku` or `name` column is an error.
    pub fn new(source: R, chunk_size: usize) -> Result<Self, ReadError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let columns = Columns::from_headers(reader.headers()?)?;

        Ok(Self {
            reader,
            columns,
            chunk_size: chunk_size.max(1),
            record: StringRecord::new(),
            next_index: 0,
            records_read: 0,
            finished: false,
        })
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// `Ok(None)` once the source is exhausted or after an error was returned.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, ReadError> {
        if self.finished {
            return Ok(None);
        }

        let mut chunk = Chunk {
            index: self.next_index,
            ..Chunk::default()
        };

        while chunk.consumed() < self.chunk_size as u64 {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(err) => {
                    self.finished = true;
                    return Err(err.into());
                }
            }

            self.records_read += 1;
            let line = self
                .record
                .position()
                .map(|p| p.line())
                .unwrap_or(self.records_read + 1);

            match normalize(&self.record, &self.columns) {
                Ok(record) => {
                    chunk.records.push(record);
                    chunk.lines.push(line);
                }
                Err(err) => chunk.rejected.push(RowFailure {
                    row: line,
                    error: err.to_string(),
                }),
            }
        }

        if chunk.consumed() == 0 {
            return Ok(None);
        }
        self.next_index += 1;
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = Result<Chunk, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Counts data records without decoding them, so progress can show a
/// percentage from the first chunk on.
pub fn count_records(path: &Path) -> Result<u64, ReadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut record = csv::ByteRecord::new();
    let mut count = 0;
    while reader.read_byte_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}
