use std::fs::File;
use std::io::{self, SeekFrom, Write};

use bytes::{Buf, BytesMut};

use crate::bbi::bbiread::{
    read_block_data, read_info, BigBedInfo, BigBedOpenError, BigBedReadError, ChromInfo,
};
use crate::bbi::BedRecord;
use crate::utils::reopen::{Reopen, ReopenableFile, SeekableRead};

/// The struct used to read a bigBed file
#[derive(Debug)]
pub struct BigBedRead<R> {
    pub(crate) info: BigBedInfo,
    pub(crate) read: R,
}

impl<R: Reopen> Reopen for BigBedRead<R> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(BigBedRead {
            info: self.info.clone(),
            read: self.read.reopen()?,
        })
    }
}

impl<R: SeekableRead> BigBedRead<R> {
    /// Opens a bigBed file for a given type that implements both `Read`
    /// and `Seek`. The fixed header, chromosome list, and per-chromosome
    /// block lists are all materialized here; they are immutable afterwards.
    pub fn open(mut read: R) -> Result<Self, BigBedOpenError> {
        let info = read_info(&mut read)?;
        Ok(BigBedRead { info, read })
    }

    /// Gets the index built when the file was opened
    pub fn info(&self) -> &BigBedInfo {
        &self.info
    }

    pub fn chroms(&self) -> &[ChromInfo] {
        &self.info.chrom_info
    }

    /// Returns an iterator over every record in the file: chromosomes in id
    /// order, blocks in index order within a chromosome, records in packed
    /// order within a block.
    pub fn records(&mut self) -> RecordIter<'_, R> {
        let cursor = RecordCursor::new(self.info.data_count);
        RecordIter {
            bigbed: self,
            cursor,
        }
    }

    /// Same as [`BigBedRead::records`], but takes ownership of the reader.
    pub fn into_records(self) -> OwnedRecordIter<R> {
        let cursor = RecordCursor::new(self.info.data_count);
        OwnedRecordIter {
            bigbed: self,
            cursor,
        }
    }

    /// Re-emits the original byte image of the whole file.
    ///
    /// The format is self-indexed, so a byte-for-byte copy is the only
    /// write path that does not require rebuilding the indices.
    pub fn copy_raw<W: Write>(&mut self, out: &mut W) -> io::Result<u64> {
        self.read.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.read, out)
    }
}

impl BigBedRead<ReopenableFile> {
    /// Opens a bigBed file
    pub fn open_file(path: &str) -> Result<Self, BigBedOpenError> {
        let reopen = ReopenableFile {
            path: path.to_string(),
            file: File::open(path)?,
        };
        let b = BigBedRead::open(reopen);
        if b.is_err() {
            eprintln!("Error when opening: {}", path);
        }
        b
    }
}

/// Read position carried across pulls: the current chromosome, the next
/// block in its list, and the inflated bytes not yet framed into records.
/// When the residual is non-empty it holds a whole number of records.
struct RecordCursor {
    chrom_ix: usize,
    block_ix: usize,
    residual: BytesMut,
    remaining: u32,
    done: bool,
}

impl RecordCursor {
    fn new(data_count: u32) -> RecordCursor {
        RecordCursor {
            chrom_ix: 0,
            block_ix: 0,
            residual: BytesMut::new(),
            remaining: data_count,
            done: false,
        }
    }

    fn pull<R: SeekableRead>(
        &mut self,
        info: &BigBedInfo,
        read: &mut R,
    ) -> Option<Result<BedRecord, BigBedReadError>> {
        if self.done {
            return None;
        }
        loop {
            if !self.residual.is_empty() {
                let chrom = &info.chrom_info[self.chrom_ix];
                match frame_record(&mut self.residual, chrom) {
                    Ok(record) => {
                        self.remaining = self.remaining.saturating_sub(1);
                        return Some(Ok(record));
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            // A chromosome may have no overlapping blocks at all.
            while self.chrom_ix < info.chrom_info.len()
                && self.block_ix == info.chrom_info[self.chrom_ix].blocks.len()
            {
                self.chrom_ix += 1;
                self.block_ix = 0;
            }
            let chrom = match info.chrom_info.get(self.chrom_ix) {
                Some(chrom) => chrom,
                None => {
                    self.done = true;
                    return None;
                }
            };

            let block = chrom.blocks[self.block_ix];
            self.block_ix += 1;
            match read_block_data(info, read, &block) {
                Ok(data) => self.residual.extend_from_slice(&data),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Consumes one record from the front of the residual buffer.
fn frame_record(
    residual: &mut BytesMut,
    chrom: &ChromInfo,
) -> Result<BedRecord, BigBedReadError> {
    if residual.len() < 12 {
        return Err(BigBedReadError::InvalidFile(
            "Data block ends mid-record.".to_owned(),
        ));
    }
    let chrom_id = residual.get_u32_le();
    let start = residual.get_u32_le();
    let end = residual.get_u32_le();
    if chrom_id != chrom.id {
        eprintln!(
            "Warning: record chromosome id {} does not match block chromosome {} ({}).",
            chrom_id, chrom.id, chrom.name
        );
    }
    let nul = match residual.iter().position(|&b| b == 0) {
        Some(i) => i,
        None => return Err(BigBedReadError::MalformedRecord),
    };
    let rest_bytes = residual.split_to(nul);
    residual.advance(1);
    let rest = match String::from_utf8(rest_bytes.to_vec()) {
        Ok(s) => s,
        Err(_) => {
            return Err(BigBedReadError::InvalidFile(
                "Record rest is not valid UTF-8.".to_owned(),
            ))
        }
    };
    Ok(BedRecord {
        chrom: chrom.name.clone(),
        start,
        end,
        rest,
    })
}

/// An iterator over every record of a bigBed file
pub struct RecordIter<'a, R: SeekableRead> {
    bigbed: &'a mut BigBedRead<R>,
    cursor: RecordCursor,
}

impl<'a, R: SeekableRead> RecordIter<'a, R> {
    /// Records left according to the file's data counter. Starts at
    /// [`BigBedInfo::data_count`] and decrements with every record
    /// produced; it does not drive termination.
    pub fn records_remaining(&self) -> u32 {
        self.cursor.remaining
    }
}

impl<'a, R: SeekableRead> Iterator for RecordIter<'a, R> {
    type Item = Result<BedRecord, BigBedReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let BigBedRead { info, read } = &mut *self.bigbed;
        self.cursor.pull(info, read)
    }
}

/// Same as [`RecordIter`] but owned
pub struct OwnedRecordIter<R: SeekableRead> {
    bigbed: BigBedRead<R>,
    cursor: RecordCursor,
}

impl<R: SeekableRead> OwnedRecordIter<R> {
    /// Records left according to the file's data counter.
    pub fn records_remaining(&self) -> u32 {
        self.cursor.remaining
    }

    /// Releases the underlying reader.
    pub fn into_inner(self) -> BigBedRead<R> {
        self.bigbed
    }
}

impl<R: SeekableRead> Iterator for OwnedRecordIter<R> {
    type Item = Result<BedRecord, BigBedReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let BigBedRead { info, read } = &mut self.bigbed;
        self.cursor.pull(info, read)
    }
}
