//! Builds complete bigBed byte images in memory for the read tests.

use byteorder::{LittleEndian, WriteBytesExt};
use libdeflater::{CompressionLvl, Compressor};

pub const BIGBED_MAGIC: u32 = 0x8789_F2EB;
pub const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

#[derive(Copy, Clone)]
pub struct ChromSpec {
    pub name: &'static str,
    pub id: u32,
    pub length: u32,
}

/// (chrom id, start, end, rest)
pub type RecordSpec = (u32, u32, u32, &'static str);

pub struct BuildOpts {
    pub records_per_block: usize,
    pub compress: bool,
    /// Lay the chromosome tree out as an internal root with two leaves.
    pub deep_chrom_tree: bool,
    /// Lay the block index out as an internal root with two leaves.
    pub deep_block_index: bool,
    /// Drop the final record's NUL terminator (malformed-file tests).
    pub strip_final_nul: bool,
}

impl Default for BuildOpts {
    fn default() -> BuildOpts {
        BuildOpts {
            records_per_block: 512,
            compress: true,
            deep_chrom_tree: false,
            deep_block_index: false,
            strip_final_nul: false,
        }
    }
}

pub struct BigBedImage {
    pub bytes: Vec<u8>,
    /// (chrom id, offset, stored size) per written block, in file order
    pub blocks: Vec<(u32, u64, u64)>,
    pub chrom_tree_offset: u64,
    pub full_data_offset: u64,
    pub full_index_offset: u64,
}

struct BlockSpec {
    chrom: u32,
    payload: Vec<u8>,
    min_start: u32,
    max_end: u32,
}

struct WrittenBlock {
    chrom: u32,
    offset: u64,
    size: u64,
    min_start: u32,
    max_end: u32,
}

pub fn build_bigbed(
    chroms: &[ChromSpec],
    records: &[RecordSpec],
    opts: &BuildOpts,
) -> BigBedImage {
    let mut out = vec![0u8; 64];

    // Chromosome B+ tree, keyed by NUL-padded name.
    let chrom_tree_offset = out.len() as u64;
    let key_size = chroms.iter().map(|c| c.name.len()).max().unwrap() as u32;
    let mut by_name: Vec<ChromSpec> = chroms.to_vec();
    by_name.sort_by(|a, b| a.name.cmp(b.name));

    out.write_u32::<LittleEndian>(CHROM_TREE_MAGIC).unwrap();
    out.write_u32::<LittleEndian>(256).unwrap();
    out.write_u32::<LittleEndian>(key_size).unwrap();
    out.write_u32::<LittleEndian>(8).unwrap();
    out.write_u64::<LittleEndian>(chroms.len() as u64).unwrap();
    out.write_u64::<LittleEndian>(0).unwrap();

    if opts.deep_chrom_tree {
        assert!(by_name.len() >= 2, "a deep tree needs at least two leaves");
        let (first, second) = by_name.split_at(by_name.len() / 2);
        let root_pos = out.len();
        let entry = key_size as usize + 8;
        let first_leaf = root_pos + 4 + 2 * entry;
        let second_leaf = first_leaf + 4 + first.len() * entry;

        out.write_u8(0).unwrap();
        out.write_u8(0).unwrap();
        out.write_u16::<LittleEndian>(2).unwrap();
        for (half, offset) in [(first, first_leaf), (second, second_leaf)] {
            write_key(&mut out, half[0].name, key_size);
            out.write_u64::<LittleEndian>(offset as u64).unwrap();
        }
        write_chrom_leaf(&mut out, first, key_size);
        write_chrom_leaf(&mut out, second, key_size);
    } else {
        write_chrom_leaf(&mut out, &by_name, key_size);
    }

    // Data counter, then the blocks: chromosomes in id order, records
    // chunked per block.
    let full_data_offset = out.len() as u64;
    out.write_u32::<LittleEndian>(records.len() as u32).unwrap();

    let mut by_id: Vec<ChromSpec> = chroms.to_vec();
    by_id.sort_by_key(|c| c.id);
    let mut specs: Vec<BlockSpec> = Vec::new();
    for chrom in &by_id {
        let chrom_records: Vec<&RecordSpec> =
            records.iter().filter(|r| r.0 == chrom.id).collect();
        for chunk in chrom_records.chunks(opts.records_per_block) {
            let mut payload = Vec::new();
            for r in chunk {
                let (cid, start, end, rest) = **r;
                payload.write_u32::<LittleEndian>(cid).unwrap();
                payload.write_u32::<LittleEndian>(start).unwrap();
                payload.write_u32::<LittleEndian>(end).unwrap();
                payload.extend_from_slice(rest.as_bytes());
                payload.push(0);
            }
            specs.push(BlockSpec {
                chrom: chrom.id,
                payload,
                min_start: chunk.first().unwrap().1,
                max_end: chunk.iter().map(|r| r.2).max().unwrap(),
            });
        }
    }
    if opts.strip_final_nul {
        specs.last_mut().unwrap().payload.pop();
    }

    let mut written: Vec<WrittenBlock> = Vec::new();
    for spec in specs {
        let stored = if opts.compress {
            zlib_compress(&spec.payload)
        } else {
            spec.payload
        };
        let offset = out.len() as u64;
        out.extend_from_slice(&stored);
        written.push(WrittenBlock {
            chrom: spec.chrom,
            offset,
            size: stored.len() as u64,
            min_start: spec.min_start,
            max_end: spec.max_end,
        });
    }

    // Block index over everything written above.
    let full_index_offset = out.len() as u64;
    let (start_bound, end_bound) = match (written.first(), written.last()) {
        (Some(first), Some(last)) => (
            (first.chrom, first.min_start),
            (last.chrom, last.max_end),
        ),
        _ => ((0, 0), (0, 0)),
    };
    out.write_u32::<LittleEndian>(CIR_TREE_MAGIC).unwrap();
    out.write_u32::<LittleEndian>(256).unwrap();
    out.write_u64::<LittleEndian>(written.len() as u64).unwrap();
    out.write_u32::<LittleEndian>(start_bound.0).unwrap();
    out.write_u32::<LittleEndian>(start_bound.1).unwrap();
    out.write_u32::<LittleEndian>(end_bound.0).unwrap();
    out.write_u32::<LittleEndian>(end_bound.1).unwrap();
    out.write_u64::<LittleEndian>(full_index_offset).unwrap();
    out.write_u32::<LittleEndian>(512).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();

    if opts.deep_block_index {
        assert!(written.len() >= 2, "a deep index needs at least two leaves");
        let (first, second) = written.split_at(written.len() / 2);
        let root_pos = out.len();
        let first_leaf = root_pos + 4 + 2 * 24;
        let second_leaf = first_leaf + 4 + first.len() * 32;

        out.write_u8(0).unwrap();
        out.write_u8(0).unwrap();
        out.write_u16::<LittleEndian>(2).unwrap();
        for (half, offset) in [(first, first_leaf), (second, second_leaf)] {
            let lo = half.first().unwrap();
            let hi = half.last().unwrap();
            out.write_u32::<LittleEndian>(lo.chrom).unwrap();
            out.write_u32::<LittleEndian>(lo.min_start).unwrap();
            out.write_u32::<LittleEndian>(hi.chrom).unwrap();
            out.write_u32::<LittleEndian>(hi.max_end).unwrap();
            out.write_u64::<LittleEndian>(offset as u64).unwrap();
        }
        write_index_leaf(&mut out, first);
        write_index_leaf(&mut out, second);
    } else {
        write_index_leaf(&mut out, &written);
    }

    // Patch the fixed header now that every offset is known.
    let mut header = Vec::with_capacity(64);
    header.write_u32::<LittleEndian>(BIGBED_MAGIC).unwrap();
    header.write_u16::<LittleEndian>(4).unwrap();
    header.write_u16::<LittleEndian>(0).unwrap();
    header.write_u64::<LittleEndian>(chrom_tree_offset).unwrap();
    header.write_u64::<LittleEndian>(full_data_offset).unwrap();
    header.write_u64::<LittleEndian>(full_index_offset).unwrap();
    header.write_u16::<LittleEndian>(12).unwrap();
    header.write_u16::<LittleEndian>(12).unwrap();
    header.write_u64::<LittleEndian>(0).unwrap();
    header.write_u64::<LittleEndian>(0).unwrap();
    header
        .write_u32::<LittleEndian>(if opts.compress { 16384 } else { 0 })
        .unwrap();
    header.write_u64::<LittleEndian>(0).unwrap();
    out[..64].copy_from_slice(&header);

    BigBedImage {
        bytes: out,
        blocks: written.iter().map(|b| (b.chrom, b.offset, b.size)).collect(),
        chrom_tree_offset,
        full_data_offset,
        full_index_offset,
    }
}

fn write_key(out: &mut Vec<u8>, name: &str, key_size: u32) {
    let mut key = name.as_bytes().to_vec();
    key.resize(key_size as usize, 0);
    out.extend_from_slice(&key);
}

fn write_chrom_leaf(out: &mut Vec<u8>, chroms: &[ChromSpec], key_size: u32) {
    out.write_u8(1).unwrap();
    out.write_u8(0).unwrap();
    out.write_u16::<LittleEndian>(chroms.len() as u16).unwrap();
    for chrom in chroms {
        write_key(out, chrom.name, key_size);
        out.write_u32::<LittleEndian>(chrom.id).unwrap();
        out.write_u32::<LittleEndian>(chrom.length).unwrap();
    }
}

fn write_index_leaf(out: &mut Vec<u8>, blocks: &[WrittenBlock]) {
    out.write_u8(1).unwrap();
    out.write_u8(0).unwrap();
    out.write_u16::<LittleEndian>(blocks.len() as u16).unwrap();
    for block in blocks {
        out.write_u32::<LittleEndian>(block.chrom).unwrap();
        out.write_u32::<LittleEndian>(block.min_start).unwrap();
        out.write_u32::<LittleEndian>(block.chrom).unwrap();
        out.write_u32::<LittleEndian>(block.max_end).unwrap();
        out.write_u64::<LittleEndian>(block.offset).unwrap();
        out.write_u64::<LittleEndian>(block.size).unwrap();
    }
}

fn zlib_compress(bytes: &[u8]) -> Vec<u8> {
    let mut compressor = Compressor::new(CompressionLvl::default());
    let max_sz = compressor.zlib_compress_bound(bytes.len());
    let mut compressed = vec![0; max_sz];
    let actual = compressor.zlib_compress(bytes, &mut compressed).unwrap();
    compressed.resize(actual, 0);
    compressed
}
