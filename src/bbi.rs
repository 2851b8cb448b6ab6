pub(crate) mod bbiread;
pub(crate) mod bigbedread;

pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// A single interval record from a bigBed file
#[derive(Clone, Debug, PartialEq)]
pub struct BedRecord {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub rest: String,
}

impl BedRecord {
    /// Renders the record as one line of bed text:
    /// `chrom \t start \t end \t rest \n`.
    pub fn to_bed_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\n",
            self.chrom, self.start, self.end, self.rest
        )
    }
}

pub use bbiread::*;
pub use bigbedread::*;
