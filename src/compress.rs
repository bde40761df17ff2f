//! Payload compression.
//!
//! `zlib` starts with the new keys, `zlib@openssh.com` is delayed until
//! user authentication has succeeded. The zlib stream is continuous
//! across packets, each packet ending with a sync flush.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::config::MAXIMUM_PACKET_SIZE;
use crate::namelist::Named;
use crate::sshnames::*;

pub trait Compressor: Send {
    /// Compresses `input` to `out`, replacing its contents.
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

pub trait Decompressor: Send {
    /// Decompresses `input` to `out`, replacing its contents.
    fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

pub struct CompressAlgo {
    pub name: &'static str,
    /// Only applied once user authentication succeeds
    pub delayed: bool,
    /// `None` for the identity method
    pub make: Option<CompressMake>,
}

/// Constructors for each direction
pub struct CompressMake {
    pub compressor: fn() -> Box<dyn Compressor>,
    pub decompressor: fn() -> Box<dyn Decompressor>,
}

impl Named for CompressAlgo {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CompressAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressAlgo({})", self.name)
    }
}

pub static NONE: CompressAlgo = CompressAlgo { name: SSH_NAME_NONE, delayed: false, make: None };

pub static ZLIB: CompressAlgo = CompressAlgo {
    name: SSH_NAME_ZLIB,
    delayed: false,
    make: Some(CompressMake { compressor: make_compressor, decompressor: make_decompressor }),
};

pub static ZLIB_OPENSSH: CompressAlgo = CompressAlgo {
    name: SSH_NAME_ZLIB_OPENSSH,
    delayed: true,
    make: Some(CompressMake { compressor: make_compressor, decompressor: make_decompressor }),
};

/// Largest compressed size for `len` input bytes including the sync
/// flush, after zlib's `deflateBound()` with extra room for the flush marker.
pub(crate) fn compress_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13 + 16
}

/// Default compression preference, uncompressed first
pub fn default_compression() -> Vec<&'static CompressAlgo> {
    vec![&NONE, &ZLIB_OPENSSH, &ZLIB]
}

fn make_compressor() -> Box<dyn Compressor> {
    Box::new(ZlibCompressor(Compress::new(Compression::default(), true)))
}

fn make_decompressor() -> Box<dyn Decompressor> {
    Box::new(ZlibDecompressor(Decompress::new(true)))
}

struct ZlibCompressor(Compress);

impl Compressor for ZlibCompressor {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        out.reserve(input.len() + 64);
        let mut consumed = 0;
        loop {
            let before = self.0.total_in();
            self.0
                .compress_vec(&input[consumed..], out, FlushCompress::Sync)
                .map_err(|_| Error::BadCompression)?;
            consumed += (self.0.total_in() - before) as usize;
            // a flush is complete once output stops filling the buffer
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            out.reserve(out.capacity().max(256));
        }
        Ok(())
    }
}

struct ZlibDecompressor(Decompress);

impl Decompressor for ZlibDecompressor {
    fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        out.reserve(input.len() * 4 + 64);
        let mut consumed = 0;
        loop {
            let before = self.0.total_in();
            self.0
                .decompress_vec(&input[consumed..], out, FlushDecompress::Sync)
                .map_err(|_| Error::BadCompression)?;
            consumed += (self.0.total_in() - before) as usize;
            if out.len() > MAXIMUM_PACKET_SIZE {
                return Err(Error::BigPacket { size: out.len() });
            }
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            out.reserve(out.capacity().max(256));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compress::*;

    fn pair() -> (Box<dyn Compressor>, Box<dyn Decompressor>) {
        let m = ZLIB.make.as_ref().unwrap();
        ((m.compressor)(), (m.decompressor)())
    }

    #[test]
    fn stream_continues_across_packets() {
        let (mut c, mut d) = pair();
        let mut z = vec![];
        let mut plain = vec![];
        for i in 0..20u8 {
            let msg: Vec<u8> = (0..(i as usize * 37)).map(|x| (x % 7) as u8 + i).collect();
            c.compress(&msg, &mut z).unwrap();
            d.decompress(&z, &mut plain).unwrap();
            assert_eq!(plain, msg);
        }
    }

    #[test]
    fn large_payload() {
        let (mut c, mut d) = pair();
        let msg = vec![0x41u8; 60_000];
        let mut z = vec![];
        let mut plain = vec![];
        c.compress(&msg, &mut z).unwrap();
        assert!(z.len() < msg.len());
        d.decompress(&z, &mut plain).unwrap();
        assert_eq!(plain.len(), msg.len());
    }

    #[test]
    fn garbage_rejected() {
        let (_, mut d) = pair();
        let mut out = vec![];
        let r = d.decompress(&[0xff, 0xff, 0xff, 0xff, 0xff], &mut out);
        assert!(matches!(r, Err(Error::BadCompression)));
    }

    #[test]
    fn delayed_flag() {
        assert!(ZLIB_OPENSSH.delayed);
        assert!(!ZLIB.delayed);
        assert!(NONE.make.is_none());
    }
}
