//! Compressed-data streams: zip (raw deflate) and zlib.
//!
//! The deflate state is driven chunkwise behind the push/pull filter
//! traits. On decode, input left over after the deflate stream ends is
//! corrupt data: the outer packetizer always closes the packet exactly at
//! end-of-stream.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::filter::{PullFilter, PushFilter};

const WORK_BUF: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressAlgo {
    None,
    Zip,
    Zlib,
    Bzip2,
}

impl CompressAlgo {
    pub fn from_code(code: u8) -> Result<CompressAlgo> {
        match code {
            0 => Ok(CompressAlgo::None),
            1 => Ok(CompressAlgo::Zip),
            2 => Ok(CompressAlgo::Zlib),
            3 => Ok(CompressAlgo::Bzip2),
            _ => {
                tracing::debug!(code, "unknown compression algorithm");
                Err(Error::CorruptData)
            }
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CompressAlgo::None => 0,
            CompressAlgo::Zip => 1,
            CompressAlgo::Zlib => 2,
            CompressAlgo::Bzip2 => 3,
        }
    }

    fn zlib_header(self) -> Result<bool> {
        match self {
            CompressAlgo::Zip => Ok(false),
            CompressAlgo::Zlib => Ok(true),
            _ => Err(Error::Bug),
        }
    }
}

/// Deflate push filter for the encrypt chain.
pub struct CompressPush<'a> {
    next: Box<dyn PushFilter + 'a>,
    cx: Compress,
    buf: Vec<u8>,
}

impl<'a> CompressPush<'a> {
    pub fn new(
        algo: CompressAlgo,
        level: u32,
        next: Box<dyn PushFilter + 'a>,
    ) -> Result<CompressPush<'a>> {
        Ok(CompressPush {
            next,
            cx: Compress::new(Compression::new(level), algo.zlib_header()?),
            buf: vec![0u8; WORK_BUF],
        })
    }
}

impl PushFilter for CompressPush<'_> {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < data.len() {
            let in_before = self.cx.total_in();
            let out_before = self.cx.total_out();
            self.cx
                .compress(&data[pos..], &mut self.buf, FlushCompress::None)
                .map_err(|_| Error::Bug)?;
            let consumed = (self.cx.total_in() - in_before) as usize;
            let produced = (self.cx.total_out() - out_before) as usize;
            if consumed == 0 && produced == 0 {
                return Err(Error::Bug);
            }
            if produced > 0 {
                self.next.push(&self.buf[..produced])?;
            }
            pos += consumed;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            let out_before = self.cx.total_out();
            let status = self
                .cx
                .compress(&[], &mut self.buf, FlushCompress::Finish)
                .map_err(|_| Error::Bug)?;
            let produced = (self.cx.total_out() - out_before) as usize;
            if produced > 0 {
                self.next.push(&self.buf[..produced])?;
            }
            if status == Status::StreamEnd {
                break;
            }
        }
        self.next.flush()
    }
}

/// Inflate pull filter for the decrypt chain.
pub struct DecompressPull<'a> {
    src: &'a mut dyn PullFilter,
    dx: Decompress,
    inbuf: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    outbuf: Vec<u8>,
    out_pos: usize,
    out_len: usize,
    eos: bool,
}

impl<'a> DecompressPull<'a> {
    pub fn new(algo: CompressAlgo, src: &'a mut dyn PullFilter) -> Result<DecompressPull<'a>> {
        Ok(DecompressPull {
            src,
            dx: Decompress::new(algo.zlib_header()?),
            inbuf: vec![0u8; WORK_BUF],
            in_pos: 0,
            in_len: 0,
            outbuf: vec![0u8; WORK_BUF],
            out_pos: 0,
            out_len: 0,
            eos: false,
        })
    }

    fn refill(&mut self) -> Result<()> {
        if self.in_pos == self.in_len {
            let chunk = self.src.pull(WORK_BUF)?;
            if chunk.is_empty() {
                tracing::debug!("decompress: eof inside deflate stream");
                return Err(Error::CorruptData);
            }
            self.inbuf[..chunk.len()].copy_from_slice(chunk);
            self.in_pos = 0;
            self.in_len = chunk.len();
        }

        let in_before = self.dx.total_in();
        let out_before = self.dx.total_out();
        let status = self
            .dx
            .decompress(
                &self.inbuf[self.in_pos..self.in_len],
                &mut self.outbuf,
                FlushDecompress::None,
            )
            .map_err(|_| Error::CorruptData)?;
        let consumed = (self.dx.total_in() - in_before) as usize;
        let produced = (self.dx.total_out() - out_before) as usize;
        self.in_pos += consumed;
        self.out_pos = 0;
        self.out_len = produced;
        if status == Status::StreamEnd {
            self.eos = true;
        } else if consumed == 0 && produced == 0 {
            tracing::debug!("decompress: stalled stream");
            return Err(Error::CorruptData);
        }
        Ok(())
    }
}

impl PullFilter for DecompressPull<'_> {
    fn pull(&mut self, max: usize) -> Result<&[u8]> {
        while self.out_pos >= self.out_len && !self.eos {
            self.refill()?;
        }
        if self.out_pos < self.out_len {
            let n = max.min(self.out_len - self.out_pos);
            let out = &self.outbuf[self.out_pos..self.out_pos + n];
            self.out_pos += n;
            return Ok(out);
        }

        // deflate finished; anything further in the packet is an error
        if self.in_pos < self.in_len {
            tracing::debug!("decompress: data after deflate end");
            return Err(Error::CorruptData);
        }
        crate::filter::expect_end(&mut *self.src)?;
        Ok(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MBuf;

    fn deflate(algo: CompressAlgo, level: u32, data: &[u8]) -> Vec<u8> {
        let mut out = MBuf::new();
        {
            let mut c = CompressPush::new(algo, level, Box::new(&mut out)).unwrap();
            for chunk in data.chunks(1000) {
                c.push(chunk).unwrap();
            }
            c.flush().unwrap();
        }
        out.steal()
    }

    fn inflate(algo: CompressAlgo, data: &[u8]) -> Result<Vec<u8>> {
        let mut src = MBuf::from_slice(data);
        let mut d = DecompressPull::new(algo, &mut src)?;
        let mut out = Vec::new();
        loop {
            let chunk = d.pull(4096)?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(chunk);
        }
    }

    #[test]
    fn roundtrip_zip_and_zlib() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i / 100) as u8).collect();
        for algo in [CompressAlgo::Zip, CompressAlgo::Zlib] {
            for level in [1, 6, 9] {
                let packed = deflate(algo, level, &data);
                assert!(packed.len() < data.len());
                assert_eq!(inflate(algo, &packed).unwrap(), data, "{:?}/{}", algo, level);
            }
        }
    }

    #[test]
    fn roundtrip_empty_and_incompressible() {
        assert!(inflate(CompressAlgo::Zip, &deflate(CompressAlgo::Zip, 6, b""))
            .unwrap()
            .is_empty());
        let noise: Vec<u8> = (0..5000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        assert_eq!(
            inflate(CompressAlgo::Zlib, &deflate(CompressAlgo::Zlib, 6, &noise)).unwrap(),
            noise
        );
    }

    #[test]
    fn trailing_garbage_is_corrupt() {
        let mut packed = deflate(CompressAlgo::Zip, 6, b"payload");
        packed.extend_from_slice(b"JUNK");
        assert_eq!(inflate(CompressAlgo::Zip, &packed).err(), Some(Error::CorruptData));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let packed = deflate(CompressAlgo::Zlib, 6, &[7u8; 10_000]);
        let cut = &packed[..packed.len() / 2];
        assert_eq!(inflate(CompressAlgo::Zlib, cut).err(), Some(Error::CorruptData));
    }

    #[test]
    fn algo_codes() {
        for algo in [
            CompressAlgo::None,
            CompressAlgo::Zip,
            CompressAlgo::Zlib,
            CompressAlgo::Bzip2,
        ] {
            assert_eq!(CompressAlgo::from_code(algo.code()).unwrap(), algo);
        }
        assert_eq!(CompressAlgo::from_code(9).err(), Some(Error::CorruptData));
    }
}
