use std::fs::File;
use std::io::{self, Read, Seek};

/// A helper trait for things that implement both `Read` and `Seek`
pub trait SeekableRead: Seek + Read {}
impl<T> SeekableRead for T where T: Seek + Read {}

/// Indicates something that can be *reopened*. A reopened source has its own
/// file position, independent of seeks and reads on the original, so
/// multiple cursors can read the same file at once.
pub trait Reopen: Sized {
    fn reopen(&self) -> io::Result<Self>;
}

pub struct ReopenableFile {
    pub path: String,
    pub file: File,
}

impl Reopen for ReopenableFile {
    fn reopen(&self) -> io::Result<Self> {
        Ok(ReopenableFile {
            path: self.path.clone(),
            file: File::open(&self.path)?,
        })
    }
}

impl Seek for ReopenableFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Read for ReopenableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.file.read_to_end(buf)
    }
}
