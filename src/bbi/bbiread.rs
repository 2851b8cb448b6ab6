use std::io::{self, Read, Seek, SeekFrom};

use byteordered::Endianness;
use bytes::{Buf, BufMut, BytesMut};
use itertools::Either;
use libdeflater::Decompressor;
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

use crate::bbi::{BIGBED_MAGIC, CHROM_TREE_MAGIC, CIR_TREE_MAGIC};
use crate::utils::reopen::SeekableRead;
use crate::utils::tell::Tell;

/// A data block in the payload region, as referenced by the block index.
/// The size is the compressed size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub offset: u64,
    pub size: u64,
}

/// The fixed 64-byte header at the start of a bigBed file.
///
/// All twelve on-disk fields are kept in file order, so the header can be
/// re-serialized byte for byte with [`BBIHeader::to_bytes`].
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    /// The byte order implied by the magic. Recorded only; decoding is
    /// little-endian.
    pub endianness: Endianness,

    pub magic: u32,
    pub version: u16,
    pub zoom_levels: u16,
    pub chromosome_tree_offset: u64,
    pub full_data_offset: u64,
    pub full_index_offset: u64,
    pub field_count: u16,
    pub defined_field_count: u16,
    pub auto_sql_offset: u64,
    pub total_summary_offset: u64,
    pub uncompress_buf_size: u32,
    pub reserved: u64,
}

impl BBIHeader {
    /// Re-serializes the header as the 64 little-endian bytes it was read
    /// from.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        let mut buf = &mut bytes[..];
        buf.put_u32_le(self.magic);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.zoom_levels);
        buf.put_u64_le(self.chromosome_tree_offset);
        buf.put_u64_le(self.full_data_offset);
        buf.put_u64_le(self.full_index_offset);
        buf.put_u16_le(self.field_count);
        buf.put_u16_le(self.defined_field_count);
        buf.put_u64_le(self.auto_sql_offset);
        buf.put_u64_le(self.total_summary_offset);
        buf.put_u32_le(self.uncompress_buf_size);
        buf.put_u64_le(self.reserved);
        bytes
    }

    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

/// Information on a chromosome in a bigBed file, including the data blocks
/// overlapping its full extent.
#[derive(Clone, Debug, PartialEq)]
pub struct ChromInfo {
    pub name: String,
    pub id: u32,
    pub length: u32,
    pub(crate) blocks: Vec<Block>,
}

impl ChromInfo {
    /// The data blocks holding this chromosome's records, in file order
    /// within each index leaf.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

/// The immutable index built when a bigBed file is opened.
#[derive(Clone, Debug)]
pub struct BigBedInfo {
    /// The fixed header
    pub header: BBIHeader,
    /// The chromosomes the file is based on, dense by id
    pub chrom_info: Vec<ChromInfo>,
    /// Total record count, as stored after the chromosome tree
    pub data_count: u32,
}

/// Possible errors encountered when opening a bigBed file
#[derive(Error, Debug)]
pub enum BigBedOpenError {
    #[error("The file is empty.")]
    Empty,
    #[error("Short read in the {}.", .0)]
    Truncated(&'static str),
    #[error("Invalid magic at the {}.", .0)]
    BadMagic(&'static str),
    #[error("The chromosome tree has no entries.")]
    EmptyIndex,
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

impl BigBedOpenError {
    fn io_at(e: io::Error, at: &'static str) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BigBedOpenError::Truncated(at)
        } else {
            BigBedOpenError::IoError(e)
        }
    }
}

/// Possible errors encountered when pulling records from a bigBed file
#[derive(Error, Debug)]
pub enum BigBedReadError {
    #[error("Short read in a data block.")]
    Truncated,
    #[error("Failed to decompress a data block: {:?}", .0)]
    InflateFailed(libdeflater::DecompressionError),
    #[error("Record has no NUL terminator before the end of its block.")]
    MalformedRecord,
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("Error occurred: {}", .0)]
    IoError(#[from] io::Error),
}

pub(crate) fn read_info<R: SeekableRead>(file: &mut R) -> Result<BigBedInfo, BigBedOpenError> {
    if file.seek(SeekFrom::End(0))? == 0 {
        return Err(BigBedOpenError::Empty);
    }
    file.seek(SeekFrom::Start(0))?;

    let mut header_data = BytesMut::zeroed(64);
    file.read_exact(&mut header_data)
        .map_err(|e| BigBedOpenError::io_at(e, "fixed header"))?;

    let magic = header_data.get_u32_le();
    let endianness = if magic == BIGBED_MAGIC {
        Endianness::Little
    } else if magic.swap_bytes() == BIGBED_MAGIC {
        eprintln!(
            "Warning: byte-swapped bigBed magic ({:#010x}); only little-endian files are supported.",
            magic
        );
        Endianness::Big
    } else {
        eprintln!(
            "Warning: unexpected magic {:#010x} in the fixed header (likely not a bigBed file).",
            magic
        );
        Endianness::Little
    };

    let version = header_data.get_u16_le();
    let zoom_levels = header_data.get_u16_le();
    let chromosome_tree_offset = header_data.get_u64_le();
    let full_data_offset = header_data.get_u64_le();
    let full_index_offset = header_data.get_u64_le();
    let field_count = header_data.get_u16_le();
    let defined_field_count = header_data.get_u16_le();
    let auto_sql_offset = header_data.get_u64_le();
    let total_summary_offset = header_data.get_u64_le();
    let uncompress_buf_size = header_data.get_u32_le();
    let reserved = header_data.get_u64_le();

    let header = BBIHeader {
        endianness,
        magic,
        version,
        zoom_levels,
        chromosome_tree_offset,
        full_data_offset,
        full_index_offset,
        field_count,
        defined_field_count,
        auto_sql_offset,
        total_summary_offset,
        uncompress_buf_size,
        reserved,
    };

    let mut chrom_info = read_chrom_tree(file, header.chromosome_tree_offset)?;

    // The data counter sits where the chromosome tree walk ends, immediately
    // before the first block.
    let mut count_data = BytesMut::zeroed(4);
    file.read_exact(&mut count_data)
        .map_err(|e| BigBedOpenError::io_at(e, "data counter"))?;
    let data_count = count_data.get_u32_le();

    read_block_index(file, header.full_index_offset, &mut chrom_info)?;

    Ok(BigBedInfo {
        header,
        chrom_info,
        data_count,
    })
}

fn read_chrom_tree<R: SeekableRead>(
    file: &mut R,
    chromosome_tree_offset: u64,
) -> Result<Vec<ChromInfo>, BigBedOpenError> {
    file.seek(SeekFrom::Start(chromosome_tree_offset))?;

    let mut header_data = BytesMut::zeroed(32);
    file.read_exact(&mut header_data)
        .map_err(|e| BigBedOpenError::io_at(e, "chromosome tree root"))?;

    let magic = header_data.get_u32_le();
    if magic != CHROM_TREE_MAGIC {
        return Err(BigBedOpenError::BadMagic("chromosome tree root"));
    }
    let _block_size = header_data.get_u32_le();
    let key_size = header_data.get_u32_le();
    let val_size = header_data.get_u32_le();
    let item_count = header_data.get_u64_le();
    let _reserved = header_data.get_u64_le();

    if item_count == 0 {
        return Err(BigBedOpenError::EmptyIndex);
    }
    if key_size == 0 {
        return Err(BigBedOpenError::InvalidFile(
            "Chromosome tree key size is 0.".to_owned(),
        ));
    }
    assert_eq!(val_size, 8u32);

    // Leaves are keyed by name, so an entry lands at its id, not at its
    // child index.
    let mut slots: Vec<Option<ChromInfo>> = vec![None; item_count as usize];
    let root = file.tell()?;
    read_chrom_tree_node(file, root, key_size, &mut slots)?;

    let mut chroms = Vec::with_capacity(slots.len());
    for (i, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(chrom) => chroms.push(chrom),
            None => {
                return Err(BigBedOpenError::InvalidFile(format!(
                    "Chromosome id {} has no tree entry.",
                    i
                )))
            }
        }
    }
    Ok(chroms)
}

fn read_chrom_tree_node<R: SeekableRead>(
    file: &mut R,
    node_offset: u64,
    key_size: u32,
    slots: &mut Vec<Option<ChromInfo>>,
) -> Result<(), BigBedOpenError> {
    file.seek(SeekFrom::Start(node_offset))?;

    let mut node_header = BytesMut::zeroed(4);
    file.read_exact(&mut node_header)
        .map_err(|e| BigBedOpenError::io_at(e, "chromosome tree node"))?;
    let isleaf = node_header.get_u8();
    let _reserved = node_header.get_u8();
    let count = node_header.get_u16_le();

    let mut bytes = BytesMut::zeroed((key_size as usize + 8) * (count as usize));
    file.read_exact(&mut bytes)
        .map_err(|e| BigBedOpenError::io_at(e, "chromosome tree node"))?;

    if isleaf == 1 {
        for _ in 0..count {
            let name = match std::str::from_utf8(&bytes[..key_size as usize]) {
                Ok(s) => s.trim_end_matches('\0').to_owned(),
                Err(_) => {
                    return Err(BigBedOpenError::InvalidFile(
                        "Chromosome name is not valid UTF-8.".to_owned(),
                    ))
                }
            };
            bytes.advance(key_size as usize);
            let id = bytes.get_u32_le();
            let length = bytes.get_u32_le();

            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                BigBedOpenError::InvalidFile(format!("Chromosome id {} out of range.", id))
            })?;
            if slot.is_some() {
                return Err(BigBedOpenError::InvalidFile(format!(
                    "Duplicate chromosome id {}.",
                    id
                )));
            }
            *slot = Some(ChromInfo {
                name,
                id,
                length,
                blocks: Vec::new(),
            });
        }
    } else {
        let mut children: Vec<u64> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            bytes.advance(key_size as usize);
            children.push(bytes.get_u64_le());
        }
        for child in children {
            read_chrom_tree_node(file, child, key_size, slots)?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct UnknownMagic;

/// Reads and validates the 48-byte block index header, leaving the file
/// positioned at the root node. Returns the items-per-slot hint.
fn read_cir_tree_header<R: Read + Seek>(
    file: &mut R,
) -> Result<u32, Either<UnknownMagic, io::Error>> {
    let mut header_data = BytesMut::zeroed(48);
    file.read_exact(&mut header_data).map_err(Either::Right)?;

    let magic = header_data.get_u32_le();
    if magic != CIR_TREE_MAGIC {
        return Err(Either::Left(UnknownMagic));
    }
    let _block_size = header_data.get_u32_le();
    let _item_count = header_data.get_u64_le();
    let _start_chrom_ix = header_data.get_u32_le();
    let _start_base = header_data.get_u32_le();
    let _end_chrom_ix = header_data.get_u32_le();
    let _end_base = header_data.get_u32_le();
    let _end_file_offset = header_data.get_u64_le();
    let items_per_slot = header_data.get_u32_le();
    let _reserved = header_data.get_u32_le();

    Ok(items_per_slot)
}

fn read_block_index<R: SeekableRead>(
    file: &mut R,
    full_index_offset: u64,
    chroms: &mut [ChromInfo],
) -> Result<(), BigBedOpenError> {
    file.seek(SeekFrom::Start(full_index_offset))?;
    let items_per_slot = read_cir_tree_header(file).map_err(|e| match e {
        Either::Left(_) => BigBedOpenError::BadMagic("block index root"),
        Either::Right(e) => BigBedOpenError::io_at(e, "block index root"),
    })?;

    let root = file.tell()?;
    for chrom in chroms.iter_mut() {
        chrom.blocks.reserve(items_per_slot as usize);
        search_cir_tree_node(file, root, chrom.id, 0, chrom.length, &mut chrom.blocks)?;
    }
    Ok(())
}

fn search_cir_tree_node<R: SeekableRead>(
    file: &mut R,
    node_offset: u64,
    chrom_ix: u32,
    start: u32,
    end: u32,
    blocks: &mut Vec<Block>,
) -> Result<(), BigBedOpenError> {
    file.seek(SeekFrom::Start(node_offset))?;

    let mut node_header = BytesMut::zeroed(4);
    file.read_exact(&mut node_header)
        .map_err(|e| BigBedOpenError::io_at(e, "block index node"))?;
    let isleaf = node_header.get_u8();
    let _reserved = node_header.get_u8();
    let count = node_header.get_u16_le();

    if isleaf == 1 {
        let mut bytes = BytesMut::zeroed(32 * (count as usize));
        file.read_exact(&mut bytes)
            .map_err(|e| BigBedOpenError::io_at(e, "block index leaf"))?;
        for _ in 0..count {
            let start_chrom_ix = bytes.get_u32_le();
            let start_base = bytes.get_u32_le();
            let end_chrom_ix = bytes.get_u32_le();
            let end_base = bytes.get_u32_le();
            let offset = bytes.get_u64_le();
            let size = bytes.get_u64_le();
            let block_overlaps = overlaps(
                chrom_ix,
                start,
                end,
                start_chrom_ix,
                start_base,
                end_chrom_ix,
                end_base,
            );
            if block_overlaps {
                blocks.push(Block { offset, size });
            }
        }
    } else {
        let mut bytes = BytesMut::zeroed(24 * (count as usize));
        file.read_exact(&mut bytes)
            .map_err(|e| BigBedOpenError::io_at(e, "block index node"))?;
        let mut children: SmallVec<[u64; 4]> = smallvec![];
        for _ in 0..count {
            let start_chrom_ix = bytes.get_u32_le();
            let start_base = bytes.get_u32_le();
            let end_chrom_ix = bytes.get_u32_le();
            let end_base = bytes.get_u32_le();
            let child_offset = bytes.get_u64_le();
            let child_overlaps = overlaps(
                chrom_ix,
                start,
                end,
                start_chrom_ix,
                start_base,
                end_chrom_ix,
                end_base,
            );
            if child_overlaps {
                children.push(child_offset);
            }
        }
        for child in children {
            search_cir_tree_node(file, child, chrom_ix, start, end, blocks)?;
        }
    }
    Ok(())
}

#[inline]
fn compare_position(chrom1: u32, chrom1_base: u32, chrom2: u32, chrom2_base: u32) -> i8 {
    if chrom1 < chrom2 {
        -1
    } else if chrom1 > chrom2 {
        1
    } else if chrom1_base < chrom2_base {
        -1
    } else if chrom1_base > chrom2_base {
        1
    } else {
        0
    }
}

/// Whether the half-open query range overlaps the bounding box. Both
/// comparisons are strict: a box ending exactly at the query start (or
/// starting at the query end) does not overlap.
#[inline]
fn overlaps(
    chromq: u32,
    chromq_start: u32,
    chromq_end: u32,
    chromb1: u32,
    chromb1_start: u32,
    chromb2: u32,
    chromb2_end: u32,
) -> bool {
    compare_position(chromq, chromq_start, chromb2, chromb2_end) < 0
        && compare_position(chromq, chromq_end, chromb1, chromb1_start) > 0
}

/// Reads a block's stored bytes and inflates them when the header says
/// blocks are compressed.
pub(crate) fn read_block_data<R: SeekableRead>(
    info: &BigBedInfo,
    read: &mut R,
    block: &Block,
) -> Result<Vec<u8>, BigBedReadError> {
    let uncompress_buf_size = info.header.uncompress_buf_size as usize;

    read.seek(SeekFrom::Start(block.offset))?;
    let mut raw_data = vec![0u8; block.size as usize];
    read.read_exact(&mut raw_data).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BigBedReadError::Truncated
        } else {
            BigBedReadError::IoError(e)
        }
    })?;

    if uncompress_buf_size == 0 {
        return Ok(raw_data);
    }

    let mut decompressor = Decompressor::new();
    let mut outbuf = vec![0; uncompress_buf_size];
    let decompressed = decompressor
        .zlib_decompress(&raw_data, &mut outbuf)
        .map_err(BigBedReadError::InflateFailed)?;
    outbuf.truncate(decompressed);
    Ok(outbuf)
}
