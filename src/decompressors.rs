use std::io::{Cursor, Write};
use std::time::Instant;

/// Decompressed output is staged through buffers of this size.
const OUTPUT_CHUNK_SIZE: usize = 8192;

/// Default LZMA dictionary memory limit in bytes.
const DEFAULT_LZMA_MEMLIMIT: usize = 1_048_576;
/// Default ceiling on decompressed output for one response.
const DEFAULT_BOMB_LIMIT: u64 = 1_048_576;
/// Compressed-to-decompressed ratio that, together with the output
/// ceiling, marks a response as a decompression bomb.
const DEFAULT_BOMB_RATIO: u64 = 2048;
/// Default number of stacked encodings the parser will decompress.
const DEFAULT_LAYER_LIMIT: usize = 2;
/// Restart attempts before a failing stage degrades to passthrough.
const MAX_RESTARTS: u8 = 3;

/// Content encodings the response body pipeline understands.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ContentEncoding {
    None,
    Gzip,
    /// Raw deflate, negative window bits.
    Deflate,
    /// Deflate wrapped in a zlib envelope.
    Zlib,
    Lzma,
}

/// Decompression options, shared by every stage of a chain.
#[derive(Copy, Clone)]
pub struct Options {
    /// LZMA decoder options, or None when LZMA is disabled.
    lzma: Option<lzma_rs::decompress::Options>,
    /// Output ceiling for bomb detection.
    bomb_limit: u64,
    /// Ratio component of bomb detection.
    bomb_ratio: u64,
    /// How many stacked encodings to decompress; the rest pass through.
    layer_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lzma: Some(lzma_rs::decompress::Options {
                memlimit: Some(DEFAULT_LZMA_MEMLIMIT),
                ..Default::default()
            }),
            bomb_limit: DEFAULT_BOMB_LIMIT,
            bomb_ratio: DEFAULT_BOMB_RATIO,
            layer_limit: DEFAULT_LAYER_LIMIT,
        }
    }
}

impl Options {
    /// The LZMA memory limit; zero means LZMA is disabled.
    pub fn get_lzma_memlimit(&self) -> usize {
        self.lzma.and_then(|o| o.memlimit).unwrap_or(0)
    }

    /// Sets the LZMA memory limit; zero disables LZMA entirely.
    pub fn set_lzma_memlimit(&mut self, memlimit: usize) {
        self.lzma = if memlimit == 0 {
            None
        } else {
            Some(lzma_rs::decompress::Options {
                memlimit: Some(memlimit),
                ..Default::default()
            })
        }
    }

    pub fn get_lzma(&self) -> Option<lzma_rs::decompress::Options> {
        self.lzma
    }

    pub fn get_bomb_limit(&self) -> u64 {
        self.bomb_limit
    }

    pub fn set_bomb_limit(&mut self, bomb_limit: u64) {
        self.bomb_limit = bomb_limit;
    }

    pub fn get_bomb_ratio(&self) -> u64 {
        self.bomb_ratio
    }

    pub fn set_bomb_ratio(&mut self, bomb_ratio: u64) {
        self.bomb_ratio = bomb_ratio;
    }

    pub fn get_layer_limit(&self) -> usize {
        self.layer_limit
    }

    pub fn set_layer_limit(&mut self, layer_limit: usize) {
        self.layer_limit = layer_limit;
    }
}

/// Receives decompressed bytes; a final `None` signals end of stream.
pub type CallbackFn = Box<dyn FnMut(Option<&[u8]>) -> std::io::Result<usize>>;

/// A stage in the decompression pipeline: bytes go in through `Write`,
/// and the stage can be asked to restart, to step aside, or to flush.
pub trait Decompress: Write {
    /// Re-probes the stream after a codec failure, possibly switching
    /// algorithm. Errors once the attempts are used up.
    fn restart(&mut self) -> std::io::Result<()>;
    /// Forward bytes verbatim from here on.
    fn set_passthrough(&mut self, passthrough: bool);
    /// No more input; drain whatever is buffered.
    fn finish(&mut self) -> std::io::Result<()>;
}

/// Terminal stage: hands output to the consumer callback and keeps a
/// running CRC, for observability only.
struct CallbackWriter {
    callback: CallbackFn,
    crc: flate2::Crc,
}

impl CallbackWriter {
    fn new(callback: CallbackFn) -> Self {
        Self {
            callback,
            crc: flate2::Crc::new(),
        }
    }
}

impl Write for CallbackWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.crc.update(data);
        (self.callback)(Some(data))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Decompress for CallbackWriter {
    fn restart(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn set_passthrough(&mut self, _: bool) {}

    fn finish(&mut self) -> std::io::Result<()> {
        (self.callback)(None).map(|_| ())
    }
}

/// Head of a decompressor chain. Owns the stages and tracks how much time
/// the codecs have consumed on this response.
pub struct Decompressor {
    inner: Box<dyn Decompress>,
    time_before: Option<Instant>,
    time_spent: u64,
    nb_callbacks: u32,
}

impl Decompressor {
    fn new(inner: Box<dyn Decompress>) -> Self {
        Self {
            inner,
            time_before: None,
            time_spent: 0,
            nb_callbacks: 0,
        }
    }

    /// Builds a single-stage chain delivering to `callback`.
    pub fn new_with_callback(
        encoding: ContentEncoding,
        callback: CallbackFn,
        options: Options,
    ) -> std::io::Result<Self> {
        Self::new(Box::new(CallbackWriter::new(callback))).prepend(encoding, options)
    }

    /// Adds a stage in front of this chain. Stages are added in the order
    /// the server applied the encodings, callback first, so for
    /// `Content-Encoding: gzip, deflate` the deflate stage is prepended
    /// last and runs first.
    pub fn prepend(self, encoding: ContentEncoding, options: Options) -> std::io::Result<Self> {
        match encoding {
            ContentEncoding::None => Ok(Decompressor::new(self.inner)),
            _ => Ok(Decompressor::new(Box::new(InnerDecompressor::new(
                encoding, self.inner, options,
            )?))),
        }
    }

    /// Feeds compressed bytes through the chain.
    pub fn decompress(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.nb_callbacks = 0;
        self.time_before.replace(Instant::now());

        let result = self.inner.write_all(data).and_then(|_| self.inner.flush());

        if let Some(before) = self.time_before.take() {
            self.time_spent += before.elapsed().as_micros() as u64;
        }
        result
    }

    /// Signals end of stream, flushing every stage.
    pub fn finish(&mut self) -> std::io::Result<()> {
        self.inner.finish()
    }

    /// Microseconds spent inside the codecs for this response.
    pub fn time_spent(&self) -> u64 {
        self.time_spent
    }

    pub fn callback_inc(&mut self) -> u32 {
        self.nb_callbacks = self.nb_callbacks.wrapping_add(1);
        self.nb_callbacks
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("time_spent", &self.time_spent)
            .field("nb_callbacks", &self.nb_callbacks)
            .finish()
    }
}

/// The codec writers stage their output into a fixed buffer which the
/// enclosing stage drains downstream.
trait BufWriter: Write {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>>;
    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>>;
}

fn staging_buffer() -> Cursor<Box<[u8]>> {
    Cursor::new(Box::new([0u8; OUTPUT_CHUNK_SIZE]) as Box<[u8]>)
}

/// Consumes nothing; used when a stage is born in passthrough mode
/// (e.g. LZMA disabled by configuration).
struct NullBufWriter(Cursor<Box<[u8]>>);

impl Write for NullBufWriter {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Ok(0)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BufWriter for NullBufWriter {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(&mut self.0)
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        Ok(self.0)
    }
}

/// A gzip header, parsed by hand so that checksum and extension-field
/// damage does not take the whole stream down with it. Browsers are
/// lenient about gzip errors and evasions exploit that, so the payload is
/// inflated with a raw deflate decoder once the header has been skipped.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct GzHeader {
    extra: Option<Vec<u8>>,
    filename: Option<Vec<u8>>,
    comment: Option<Vec<u8>>,
    operating_system: u8,
    mtime: i32,
    crc: Option<u16>,
    flags: u8,
    xfl: u8,
}

impl GzHeader {
    const FHCRC: u8 = 1 << 1;
    const FEXTRA: u8 = 1 << 2;
    const FNAME: u8 = 1 << 3;
    const FCOMMENT: u8 = 1 << 4;

    fn parse(data: &[u8]) -> nom::IResult<&[u8], Self> {
        use nom::bytes::streaming::{tag, take, take_until};
        use nom::number::streaming::{le_i32, le_u16, le_u8};
        use nom::sequence::tuple;

        let (rest, (_, flags, mtime, xfl, operating_system)) =
            tuple((tag(b"\x1f\x8b\x08"), le_u8, le_i32, le_u8, le_u8))(data)?;

        let (rest, extra) = if flags & Self::FEXTRA != 0 {
            let (rest, len) = le_u16(rest)?;
            let (rest, extra) = take(len as usize)(rest)?;
            (rest, Some(extra.to_vec()))
        } else {
            (rest, None)
        };

        let (rest, filename) = if flags & Self::FNAME != 0 {
            let (rest, (filename, _)) = tuple((take_until(b"\0" as &[u8]), tag(b"\0")))(rest)?;
            (rest, Some(filename.to_vec()))
        } else {
            (rest, None)
        };

        let (rest, comment) = if flags & Self::FCOMMENT != 0 {
            let (rest, (comment, _)) = tuple((take_until(b"\0" as &[u8]), tag(b"\0")))(rest)?;
            (rest, Some(comment.to_vec()))
        } else {
            (rest, None)
        };

        let (rest, crc) = if flags & Self::FHCRC != 0 {
            let (rest, crc) = le_u16(rest)?;
            (rest, Some(crc))
        } else {
            (rest, None)
        };

        Ok((
            rest,
            GzHeader {
                extra,
                filename,
                comment,
                operating_system,
                mtime,
                crc,
                flags,
                xfl,
            },
        ))
    }
}

/// Gzip stage: parse (and forgive) the header, then raw-inflate the rest.
struct GzipBufWriter {
    header_bytes: Vec<u8>,
    header: Option<GzHeader>,
    inner: flate2::write::DeflateDecoder<Cursor<Box<[u8]>>>,
}

impl GzipBufWriter {
    fn new(buf: Cursor<Box<[u8]>>) -> Self {
        Self {
            header_bytes: Vec::with_capacity(10),
            header: None,
            inner: flate2::write::DeflateDecoder::new(buf),
        }
    }

    fn parse_header(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let parse: &[u8] = if self.header_bytes.is_empty() {
            data
        } else {
            self.header_bytes.extend_from_slice(data);
            self.header_bytes.as_ref()
        };

        match GzHeader::parse(parse) {
            Ok((rest, header)) => {
                self.header = Some(header);
                data.len().checked_sub(rest.len()).ok_or_else(|| {
                    // The stored prefix alone would have parsed; it should
                    // have been consumed before it was stored.
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "unexpected gzip header remainder",
                    )
                })
            }
            Err(nom::Err::Incomplete(_)) => {
                if self.header_bytes.is_empty() {
                    self.header_bytes.extend_from_slice(data);
                }
                Ok(data.len())
            }
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid gzip header",
            )),
        }
    }
}

impl Write for GzipBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.header.is_none() {
            self.parse_header(data)
        } else {
            self.inner.write(data)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl BufWriter for GzipBufWriter {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.inner.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.inner.finish()
    }
}

/// Raw deflate stage.
struct DeflateBufWriter(flate2::write::DeflateDecoder<Cursor<Box<[u8]>>>);

impl Write for DeflateBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BufWriter for DeflateBufWriter {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.0.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.0.finish()
    }
}

/// Zlib-wrapped deflate stage.
struct ZlibBufWriter(flate2::write::ZlibDecoder<Cursor<Box<[u8]>>>);

impl Write for ZlibBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BufWriter for ZlibBufWriter {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.0.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.0.finish()
    }
}

/// LZMA1 stage: five bytes of properties plus eight of length up front.
struct LzmaBufWriter(lzma_rs::decompress::Stream<Cursor<Box<[u8]>>>);

impl Write for LzmaBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BufWriter for LzmaBufWriter {
    fn buffer(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        self.0.get_output_mut()
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.0.finish().map_err(|e| match e {
            lzma_rs::error::Error::IoError(e) => e,
            lzma_rs::error::Error::HeaderTooShort(e) => {
                std::io::Error::new(std::io::ErrorKind::Other, format!("{}", e))
            }
            lzma_rs::error::Error::LzmaError(e) | lzma_rs::error::Error::XzError(e) => {
                std::io::Error::new(std::io::ErrorKind::Other, e)
            }
        })
    }
}

/// One decompression stage. Owns a codec writer and the next stage down,
/// and carries the restart protocol: a codec failure re-probes the stream
/// up to three times, first with the declared algorithm again, then
/// rotating through the alternatives, and as the last resort the stage
/// steps aside and passes bytes through untouched.
struct InnerDecompressor {
    writer: Option<Box<dyn BufWriter>>,
    downstream: Option<Box<dyn Decompress>>,
    next_encoding: ContentEncoding,
    passthrough: bool,
    restarts: u8,
    options: Options,
}

impl InnerDecompressor {
    fn writer(
        encoding: ContentEncoding,
        options: &Options,
    ) -> std::io::Result<(Box<dyn BufWriter>, bool)> {
        let buf = staging_buffer();
        match encoding {
            ContentEncoding::Gzip => Ok((Box::new(GzipBufWriter::new(buf)), false)),
            ContentEncoding::Deflate => Ok((
                Box::new(DeflateBufWriter(flate2::write::DeflateDecoder::new(buf))),
                false,
            )),
            ContentEncoding::Zlib => Ok((
                Box::new(ZlibBufWriter(flate2::write::ZlibDecoder::new(buf))),
                false,
            )),
            ContentEncoding::Lzma => match options.lzma {
                Some(options) => Ok((
                    Box::new(LzmaBufWriter(
                        lzma_rs::decompress::Stream::new_with_options(&options, buf),
                    )),
                    false,
                )),
                None => Ok((Box::new(NullBufWriter(staging_buffer())), true)),
            },
            ContentEncoding::None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "expected a compressed encoding",
            )),
        }
    }

    fn new(
        encoding: ContentEncoding,
        downstream: Box<dyn Decompress>,
        options: Options,
    ) -> std::io::Result<Self> {
        let (writer, passthrough) = Self::writer(encoding, &options)?;
        Ok(Self {
            writer: Some(writer),
            downstream: Some(downstream),
            next_encoding: encoding,
            passthrough,
            restarts: 0,
            options,
        })
    }

    /// Switches the stage to passthrough and forwards `data`, reverting
    /// when the downstream refuses it.
    fn try_passthrough(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.set_passthrough(true);
        if let Some(downstream) = &mut self.downstream {
            let result = downstream.write(data);
            if result.is_err() {
                self.set_passthrough(false);
            }
            result
        } else {
            Ok(data.len())
        }
    }

    /// Drains the staging buffer downstream until the codec stops
    /// reporting a full buffer.
    fn flush_writer(&mut self, writer: &mut Box<dyn BufWriter>) -> std::io::Result<()> {
        let mut downstream = self.downstream.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "no downstream stage to flush to")
        })?;
        let mut result = Ok(());
        loop {
            let flushed = writer.flush();
            if let Some(buffer) = writer.buffer() {
                let end = buffer.position() as usize;
                if let Err(e) = downstream.write_all(&buffer.get_ref()[..end]) {
                    result = Err(e);
                    break;
                }
                buffer.set_position(0);
            }
            match flushed {
                // A full staging buffer surfaces as WriteZero: drain and
                // flush again.
                Err(e) if e.kind() == std::io::ErrorKind::WriteZero => continue,
                Err(_) => {
                    result = self.restart();
                    break;
                }
                Ok(()) => break,
            }
        }
        self.downstream.replace(downstream);
        result
    }
}

impl Write for InnerDecompressor {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.passthrough {
            if let Some(downstream) = &mut self.downstream {
                downstream.write(data)
            } else {
                Ok(data.len())
            }
        } else if let Some(mut writer) = self.writer.take() {
            // The writer sits outside its slot while held, so the drain
            // path below can borrow self again.
            match writer.write(data) {
                Ok(0) => {
                    // End of the compressed stream. Data past the first
                    // end of stream (multi-member gzip, trailers) is
                    // swallowed on purpose.
                    self.writer.replace(writer);
                    Ok(data.len())
                }
                Ok(consumed) => {
                    self.writer.replace(writer);
                    Ok(consumed)
                }
                Err(e) if e.kind() == std::io::ErrorKind::WriteZero => {
                    self.flush_writer(&mut writer)?;
                    self.writer.replace(writer);
                    self.write(data)
                }
                Err(_) => {
                    if self.restart().is_err() {
                        self.try_passthrough(data)
                    } else {
                        self.write(data)
                    }
                }
            }
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "writer was not initialized",
            ))
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            self.flush_writer(&mut writer)?;
            self.writer.replace(writer);
        }
        if let Some(downstream) = &mut self.downstream {
            downstream.flush()
        } else {
            Ok(())
        }
    }
}

impl Decompress for InnerDecompressor {
    fn restart(&mut self) -> std::io::Result<()> {
        if self.restarts >= MAX_RESTARTS {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "too many restart attempts",
            ));
        }
        // First retry the declared encoding; afterwards rotate through the
        // alternatives, since servers mislabel gzip and deflate freely.
        if self.restarts > 0 {
            self.next_encoding = match self.next_encoding {
                ContentEncoding::Gzip => ContentEncoding::Deflate,
                ContentEncoding::Deflate => ContentEncoding::Zlib,
                ContentEncoding::Zlib => ContentEncoding::Gzip,
                ContentEncoding::Lzma => ContentEncoding::Deflate,
                ContentEncoding::None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "expected a compressed encoding",
                    ))
                }
            };
        }
        let (writer, passthrough) = Self::writer(self.next_encoding, &self.options)?;
        self.writer = Some(writer);
        if passthrough {
            self.passthrough = true;
        }
        self.restarts += 1;
        Ok(())
    }

    fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
        if let Some(downstream) = &mut self.downstream {
            downstream.set_passthrough(passthrough);
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        let output = match self.writer.take() {
            Some(mut writer) => {
                self.flush_writer(&mut writer)?;
                Some(writer.finish()?)
            }
            None => None,
        };

        if let Some(mut downstream) = self.downstream.take() {
            if let Some(output) = output {
                downstream.write_all(&output.get_ref()[..output.position() as usize])?;
            }
            downstream.finish()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn gz_header_plain() {
        let input = b"\x1f\x8b\x08\x00\x00\x00\x00\x00\x00\x00";
        let (rest, header) = GzHeader::parse(input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header, GzHeader::default());
    }

    #[test]
    fn gz_header_filename() {
        let input = b"\x1f\x8b\x08\x08\x00\x00\x00\x00\x00\x00x.txt\x00";
        let (rest, header) = GzHeader::parse(input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.filename.as_deref(), Some(&b"x.txt"[..]));
        assert_eq!(header.flags, GzHeader::FNAME);
    }

    #[test]
    fn gz_header_extra_comment_crc() {
        let input = b"\x1f\x8b\x08\x16\x00\x00\x00\x00\x00\x00\x05\x00extracomment\x00\x34\x12";
        let (rest, header) = GzHeader::parse(input).unwrap();
        assert!(rest.is_empty());
        assert_eq!(header.extra.as_deref(), Some(&b"extra"[..]));
        assert_eq!(header.comment.as_deref(), Some(&b"comment"[..]));
        assert_eq!(header.crc, Some(0x1234));
    }

    #[test]
    fn gz_header_incomplete() {
        assert!(matches!(
            GzHeader::parse(b"\x1f\x8b\x08\x01\x00\x00\x00\x00\x00"),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn gz_header_bad_magic() {
        assert!(GzHeader::parse(b"\x1f\x8c\x08\x00\x00\x00\x00\x00\x00\x00").is_err());
    }

    fn collecting_callback(sink: Rc<RefCell<Vec<u8>>>) -> CallbackFn {
        Box::new(move |data: Option<&[u8]>| {
            if let Some(data) = data {
                sink.borrow_mut().extend_from_slice(data);
                Ok(data.len())
            } else {
                Ok(0)
            }
        })
    }

    fn deflate_bytes(input: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(input).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn deflate_roundtrip() {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut d = Decompressor::new_with_callback(
            ContentEncoding::Deflate,
            collecting_callback(Rc::clone(&sink)),
            Options::default(),
        )
        .unwrap();
        d.decompress(&deflate_bytes(b"hello world")).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"hello world");
    }

    #[test]
    fn gzip_with_filename_extension() {
        let mut stream = b"\x1f\x8b\x08\x08\x00\x00\x00\x00\x00\x03x.txt\x00".to_vec();
        stream.extend_from_slice(&deflate_bytes(b"hi"));
        // Trailer: CRC32 and ISIZE, ignored by the tolerant decoder.
        stream.extend_from_slice(&[0u8; 8]);

        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut d = Decompressor::new_with_callback(
            ContentEncoding::Gzip,
            collecting_callback(Rc::clone(&sink)),
            Options::default(),
        )
        .unwrap();
        d.decompress(&stream).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"hi");
    }

    #[test]
    fn mislabeled_deflate_restarts_into_gzip() {
        // Served as deflate, actually gzip: the restart rotation should
        // land on a codec that works without surfacing an error.
        let mut stream = b"\x1f\x8b\x08\x00\x00\x00\x00\x00\x00\x03".to_vec();
        stream.extend_from_slice(&deflate_bytes(b"mislabeled"));
        stream.extend_from_slice(&[0u8; 8]);

        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut d = Decompressor::new_with_callback(
            ContentEncoding::Deflate,
            collecting_callback(Rc::clone(&sink)),
            Options::default(),
        )
        .unwrap();
        d.decompress(&stream).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"mislabeled");
    }

    #[test]
    fn garbage_degrades_to_passthrough() {
        // 0xff opens a reserved deflate block type, so every codec in the
        // rotation rejects this input before consuming anything.
        let stream = b"\xff\xff\xff\xff definitely not compressed";
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut d = Decompressor::new_with_callback(
            ContentEncoding::Gzip,
            collecting_callback(Rc::clone(&sink)),
            Options::default(),
        )
        .unwrap();
        d.decompress(stream).unwrap();
        d.finish().unwrap();
        // Once the restarts run dry the raw bytes come through verbatim.
        assert_eq!(sink.borrow().as_slice(), &stream[..]);
    }
}
