use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::ExecError;

use super::page::{SortBuffer, SortBufferCursor};

/// A sorted run read one record at a time. `key` and `val` borrow the
/// current record and stay valid until the next `advance`.
pub trait RecordCursor {
    /// Moves to the next record. Returns false once the run is exhausted.
    fn advance(&mut self) -> Result<bool, ExecError>;
    fn key(&self) -> &[u8];
    fn val(&self) -> &[u8];
}

// Run file record layout:
// 4 byte: key length (little endian)
// 4 byte: value length (little endian)
// key bytes, value bytes

/// Writes records to an anonymous temporary file. The file vanishes when
/// the writer, the finished run, or its cursor is dropped.
pub struct RunWriter {
    writer: BufWriter<File>,
    len: u64,
}

impl RunWriter {
    pub fn new(temp_dir: Option<&Path>) -> Result<Self, ExecError> {
        let file = match temp_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            writer: BufWriter::new(file),
            len: 0,
        })
    }

    pub fn append(&mut self, key: &[u8], val: &[u8]) -> Result<(), ExecError> {
        self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
        self.writer.write_all(&(val.len() as u32).to_le_bytes())?;
        self.writer.write_all(key)?;
        self.writer.write_all(val)?;
        self.len += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<RunFile, ExecError> {
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok(RunFile {
            file,
            len: self.len,
        })
    }
}

/// A closed run spilled to temporary storage.
pub struct RunFile {
    file: File,
    len: u64,
}

impl RunFile {
    /// Spills the (already sorted) contents of `sort_buffer`.
    pub fn from_sort_buffer(
        temp_dir: Option<&Path>,
        sort_buffer: &SortBuffer,
    ) -> Result<Self, ExecError> {
        let mut writer = RunWriter::new(temp_dir)?;
        for (key, val) in sort_buffer.iter() {
            writer.append(key, val)?;
        }
        writer.finish()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Reads a spilled run back. The key and value buffers are reused from one
/// record to the next.
pub struct RunFileCursor {
    reader: BufReader<File>,
    remaining: u64,
    key: Vec<u8>,
    val: Vec<u8>,
}

impl RunFileCursor {
    fn read_record(&mut self) -> Result<(), ExecError> {
        let mut lens = [0u8; 8];
        self.reader.read_exact(&mut lens)?;
        let key_len = u32::from_le_bytes([lens[0], lens[1], lens[2], lens[3]]) as usize;
        let val_len = u32::from_le_bytes([lens[4], lens[5], lens[6], lens[7]]) as usize;
        self.key.resize(key_len, 0);
        self.reader.read_exact(&mut self.key)?;
        self.val.resize(val_len, 0);
        self.reader.read_exact(&mut self.val)?;
        Ok(())
    }
}

impl RecordCursor for RunFileCursor {
    fn advance(&mut self) -> Result<bool, ExecError> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.remaining -= 1;
        if let Err(e) = self.read_record() {
            self.remaining = 0;
            return Err(e);
        }
        Ok(true)
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn val(&self) -> &[u8] {
        &self.val
    }
}

/// A run produced by the partition phase (or by an intermediate merge).
pub enum SortedRun {
    /// The whole input fit in one buffer; it never touched the disk.
    Memory(SortBuffer),
    Spilled(RunFile),
}

impl SortedRun {
    pub fn len(&self) -> u64 {
        match self {
            SortedRun::Memory(buffer) => buffer.len() as u64,
            SortedRun::Spilled(file) => file.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_cursor(self) -> RunCursor {
        match self {
            SortedRun::Memory(buffer) => RunCursor::Memory(SortBufferCursor::new(buffer)),
            SortedRun::Spilled(run) => RunCursor::Spilled(RunFileCursor {
                reader: BufReader::new(run.file),
                remaining: run.len,
                key: Vec::new(),
                val: Vec::new(),
            }),
        }
    }
}

pub enum RunCursor {
    Memory(SortBufferCursor),
    Spilled(RunFileCursor),
}

impl RecordCursor for RunCursor {
    fn advance(&mut self) -> Result<bool, ExecError> {
        match self {
            RunCursor::Memory(cursor) => Ok(cursor.advance()),
            RunCursor::Spilled(cursor) => cursor.advance(),
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            RunCursor::Memory(cursor) => cursor.current().0,
            RunCursor::Spilled(cursor) => cursor.key(),
        }
    }

    fn val(&self) -> &[u8] {
        match self {
            RunCursor::Memory(cursor) => cursor.current().1,
            RunCursor::Spilled(cursor) => cursor.val(),
        }
    }
}
