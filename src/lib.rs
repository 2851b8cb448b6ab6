/*!
Bigbed provides a streaming, pull-based API for reading bigBed files.

A bigBed file is self-indexed: the fixed header points at a B+ tree of
chromosomes, an R-tree over the compressed data blocks, and the blocks
themselves. The entrypoint to reading is [`BigBedRead::open`], which takes
any type that implements both [`Read`][std::io::Read] and
[`Seek`][std::io::Seek] and materializes the whole index up front. There is
also [`BigBedRead::open_file`], which takes a path and will open a `File`.

Once a [`BigBedRead`] has been constructed, the fixed header and chromosome
list are available through [`BigBedRead::info`]. The main data is read with
[`BigBedRead::records`] (or [`BigBedRead::into_records`]), an `Iterator`
over every [`BedRecord`] in the file in chromosome-id order. Blocks are
fetched and inflated one at a time as the iterator is pulled, so memory
stays bounded by a single uncompressed block.

There is no encoder. [`BigBedRead::copy_raw`] re-emits the byte image that
was read, which is the only faithful way to write a self-indexed file back
out without rebuilding its indices.
*/

mod bbi;
pub mod utils;

pub use bbi::*;
