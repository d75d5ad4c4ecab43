use crate::{
    bstr::Bstr,
    config::{DecoderConfig, Unwanted, UrlEncodingHandling},
    error::Result,
    hook::FileDataHook,
    utf8_decoder::Utf8Decoder,
};
use nom::{
    bytes::complete::{take_while, take_while1},
    bytes::streaming::{tag as streaming_tag, take_till as streaming_take_till},
    sequence::tuple,
    IResult,
};

/// Set/test helpers for the plain-integer flag fields used on
/// transactions, headers and connections.
pub trait FlagOperations<T> {
    fn set(&mut self, other: T);
    fn unset(&mut self, other: T);
    fn is_set(&self, other: T) -> bool;
}

impl FlagOperations<u8> for u8 {
    fn set(&mut self, other: u8) {
        *self |= other;
    }
    fn unset(&mut self, other: u8) {
        *self &= !other;
    }
    fn is_set(&self, other: u8) -> bool {
        self & other == other
    }
}

impl FlagOperations<u64> for u64 {
    fn set(&mut self, other: u64) {
        *self |= other;
    }
    fn unset(&mut self, other: u64) {
        *self &= !other;
    }
    fn is_set(&self, other: u64) -> bool {
        self & other == other
    }
}

/// Connection-level flags, 8 bits wide.
pub struct ConnectionFlags;

impl ConnectionFlags {
    pub const UNKNOWN: u8 = 0x00;
    /// Seen pipelined requests.
    pub const PIPELINED: u8 = 0x01;
    /// Seen extra data after an HTTP/0.9 exchange.
    pub const HTTP_0_9_EXTRA: u8 = 0x02;
}

/// Transaction anomaly flags. The same namespace covers header records and
/// transactions so a flag can be raised on both at once.
pub struct Flags;

impl Flags {
    /// A field line that could not be split into name and value.
    pub const FIELD_UNPARSEABLE: u64 = 0x0000_0000_0004;
    /// A field with an anomalous but parseable shape.
    pub const FIELD_INVALID: u64 = 0x0000_0000_0008;
    /// A folded field line.
    pub const FIELD_FOLDED: u64 = 0x0000_0000_0010;
    /// A name seen more than once.
    pub const FIELD_REPEATED: u64 = 0x0000_0000_0020;
    /// NUL byte seen inside a field line.
    pub const FIELD_NUL_BYTE: u64 = 0x0000_0000_0080;
    /// Conflicting framing information.
    pub const REQUEST_SMUGGLING: u64 = 0x0000_0000_0100;
    /// Folding marker with no header to fold into.
    pub const INVALID_FOLDING: u64 = 0x0000_0000_0200;
    /// Chunked coding on a protocol that predates it.
    pub const INVALID_CHUNKING: u64 = 0x0000_0000_0400;
    /// Header region spanned more than one input chunk.
    pub const MULTI_PACKET_HEAD: u64 = 0x0000_0000_0800;
    /// HTTP/1.1 request without a Host header.
    pub const HOST_MISSING: u64 = 0x0000_0000_1000;
    /// Host header and URI authority disagree.
    pub const AMBIGUOUS_HOST: u64 = 0x0000_0000_2000;
    pub const PATH_ENCODED_NUL: u64 = 0x0000_0000_4000;
    pub const PATH_RAW_NUL: u64 = 0x0000_0000_8000;
    pub const PATH_INVALID_ENCODING: u64 = 0x0000_0001_0000;
    pub const PATH_OVERLONG_U: u64 = 0x0000_0004_0000;
    pub const PATH_ENCODED_SEPARATOR: u64 = 0x0000_0008_0000;
    /// At least one valid UTF-8 sequence and no invalid ones.
    pub const PATH_UTF8_VALID: u64 = 0x0000_0010_0000;
    pub const PATH_UTF8_INVALID: u64 = 0x0000_0020_0000;
    pub const PATH_UTF8_OVERLONG: u64 = 0x0000_0040_0000;
    /// Fullwidth/halfwidth Unicode forms seen in the path.
    pub const PATH_FULLWIDTH_EVASION: u64 = 0x0000_0080_0000;
    pub const STATUS_LINE_INVALID: u64 = 0x0000_0100_0000;
    /// Invalid hostname in the request URI.
    pub const HOSTU_INVALID: u64 = 0x0000_0200_0000;
    /// Invalid hostname in the Host header.
    pub const HOSTH_INVALID: u64 = 0x0000_0400_0000;
    pub const HOST_INVALID: u64 = Self::HOSTU_INVALID | Self::HOSTH_INVALID;
    pub const REQUEST_INVALID: u64 = 0x0001_0000_0000;
    pub const AUTH_INVALID: u64 = 0x0004_0000_0000;
}

/// Is the byte linear white space (space or horizontal tab)?
pub fn is_lws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Is the byte an HTTP field separator?
pub fn is_separator(c: u8) -> bool {
    // separators = "(" | ")" | "<" | ">" | "@"
    //            | "," | ";" | ":" | "\" | <">
    //            | "/" | "[" | "]" | "?" | "="
    //            | "{" | "}" | SP | HT
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

/// Is the byte a token character (printable ASCII, not a separator)?
pub fn is_token(c: u8) -> bool {
    (32..=126).contains(&c) && !is_separator(c)
}

/// Is the byte white space in the permissive sense the parser uses when
/// splitting request and response lines?
pub fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

/// May the byte start a folded continuation line?
pub fn is_folding_char(c: u8) -> bool {
    is_lws(c) || c == 0
}

/// Removes one trailing LF and one optional CR preceding it. Repeats, so
/// `"x\r\n\r\n"` chomps to `"x"`.
pub fn chomp(mut data: &[u8]) -> &[u8] {
    while let Some(&last) = data.last() {
        if last == b'\n' || last == b'\r' {
            data = &data[..data.len() - 1];
        } else {
            break;
        }
    }
    data
}

/// An empty line: bare LF, CR, or CRLF.
pub fn is_line_empty(data: &[u8]) -> bool {
    matches!(data, b"\n" | b"\r" | b"\r\n")
}

/// A line consisting entirely of white space.
pub fn is_line_whitespace(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().all(|c| is_space(*c))
}

/// Does this line terminate a header block?
pub fn is_line_terminator(data: &[u8]) -> bool {
    is_line_empty(data)
}

/// May this line be skipped over before a request line?
pub fn is_line_ignorable(data: &[u8]) -> bool {
    is_line_empty(data) || is_line_whitespace(data)
}

/// Does the line start with LWS, making it a fold of the previous one?
pub fn is_line_folded(data: &[u8]) -> bool {
    data.first().map(|c| is_folding_char(*c)).unwrap_or(false)
}

/// Takes bytes up to and including the first LF. Incomplete when the chunk
/// holds no LF, which callers translate into buffering.
pub fn take_till_lf(data: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, line) = streaming_take_till(|c| c == b'\n')(data)?;
    let (rest, _) = streaming_tag("\n")(rest)?;
    Ok((rest, &data[..line.len() + 1]))
}

/// Takes bytes up to the first LF or NUL, not consuming the terminator.
pub fn take_till_lf_null(data: &[u8]) -> IResult<&[u8], &[u8]> {
    streaming_take_till(|c| c == b'\n' || c == 0)(data)
}

/// Line terminator shapes tolerated on the response side.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Eol {
    Lf,
    CrLf,
    /// Lone CR; some servers emit these, browsers accept them.
    Cr,
    /// LF immediately followed by a CR that does not open a CRLF.
    LfCr,
    /// CR-CR-LF taken as a single terminator.
    CrCrLf,
}

impl Eol {
    /// True for the shapes worth a deformed-EOL warning.
    pub fn is_deformed(&self) -> bool {
        !matches!(self, Eol::Lf | Eol::CrLf)
    }
}

/// Takes one response line, tolerating the exotic terminators `Eol` lists.
/// The returned slice includes the terminator bytes. Incomplete when the
/// terminator shape cannot be decided yet.
pub fn take_till_eol(data: &[u8]) -> IResult<&[u8], (&[u8], Eol)> {
    let (_, line) = streaming_take_till(|c| c == b'\n' || c == b'\r')(data)?;
    let mut pos = line.len();
    let eol = match (data.get(pos).copied(), data.get(pos + 1).copied()) {
        (Some(b'\r'), Some(b'\n')) => {
            pos += 2;
            Eol::CrLf
        }
        (Some(b'\r'), Some(b'\r')) => {
            // CR CR LF is one terminator when data precedes it.
            if data.get(pos + 2) == Some(&b'\n') && pos > 0 {
                pos += 3;
                Eol::CrCrLf
            } else {
                pos += 1;
                Eol::Cr
            }
        }
        (Some(b'\r'), Some(_)) => {
            pos += 1;
            Eol::Cr
        }
        (Some(b'\r'), None) => {
            // A CRLF may be split across chunks; wait for the next byte.
            return Err(nom::Err::Incomplete(nom::Needed::new(1)));
        }
        (Some(b'\n'), Some(b'\r')) => {
            // LF CR LF leaves the CR LF for the next (empty) line.
            if data.get(pos + 2) == Some(&b'\n') {
                pos += 1;
                Eol::Lf
            } else {
                pos += 2;
                Eol::LfCr
            }
        }
        (Some(b'\n'), _) => {
            pos += 1;
            Eol::Lf
        }
        _ => return Err(nom::Err::Incomplete(nom::Needed::new(1))),
    };
    Ok((&data[pos..], (&data[..pos], eol)))
}

/// Takes all space-class bytes (the permissive set).
pub fn take_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(is_space)(data)
}

/// Takes bytes until the next space-class byte.
pub fn take_not_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while(|c: u8| !is_space(c))(data)
}

/// Takes ASCII whitespace, complete flavor.
pub fn take_ascii_whitespace<'a>() -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input| take_while(|c: u8| c.is_ascii_whitespace())(input)
}

/// Takes bytes before the first NUL, requiring the NUL to be present.
pub fn take_until_null(data: &[u8]) -> IResult<&[u8], &[u8]> {
    streaming_take_till(|c| c == 0)(data)
}

/// Splits input into (leading non-digits, digits), with surrounding ASCII
/// whitespace removed. The leading slice is non-empty only for values with
/// junk before the number.
pub fn ascii_digits(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (rest, (_, leading, digits, _)) = tuple((
        take_ascii_whitespace(),
        take_while(|c: u8| !c.is_ascii_digit() && !c.is_ascii_whitespace()),
        take_while1(|c: u8| c.is_ascii_digit()),
        take_ascii_whitespace(),
    ))(input)?;
    Ok((rest, (leading, digits)))
}

/// Takes hexadecimal digits with surrounding ASCII whitespace removed.
pub fn hex_digits(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, (_, digits, _)) = tuple((
        take_ascii_whitespace(),
        take_while(|c: u8| c.is_ascii_hexdigit()),
        take_ascii_whitespace(),
    ))(input)?;
    Ok((rest, digits))
}

/// Control bytes tolerated inside a chunk-length line.
pub fn is_chunked_ctl_char(c: u8) -> bool {
    matches!(c, 0x0d | 0x0a | 0x20 | 0x09 | 0x0b | 0x0c)
}

/// Look-ahead probe over buffered chunk-length bytes: once at least eight
/// bytes are visible, leading junk that is neither control, white space nor
/// a hex digit means the stream is not chunked after all.
pub fn is_valid_chunked_length_data(data: &[u8]) -> bool {
    if data.len() < 8 {
        return true;
    }
    for &c in data {
        if is_chunked_ctl_char(c) {
            continue;
        }
        return c.is_ascii_hexdigit();
    }
    true
}

/// Converts a decimal port slice, rejecting empty input and zero.
pub fn convert_port(port: &[u8]) -> Option<u16> {
    if port.is_empty() {
        return None;
    }
    std::str::from_utf8(port)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|p| *p != 0)
}

/// Loose hostname validation: dot-separated labels of alphanumerics and
/// hyphens, or a bracketed IPv6 literal.
pub fn validate_hostname(input: &[u8]) -> bool {
    if input.is_empty() || input.len() > 255 {
        return false;
    }
    if let Some(stripped) = input.strip_prefix(b"[") {
        return match stripped.iter().position(|c| *c == b']') {
            // Nothing may follow the closing bracket.
            Some(end) => {
                end + 1 == stripped.len()
                    && !stripped[..end].is_empty()
                    && stripped[..end]
                        .iter()
                        .all(|c| c.is_ascii_hexdigit() || *c == b':' || *c == b'.')
            }
            None => false,
        };
    }
    for label in input.split(|c| *c == b'.') {
        if label.is_empty()
            || label.len() > 63
            || !label.iter().all(|c| c.is_ascii_alphanumeric() || *c == b'-')
        {
            return false;
        }
    }
    true
}

/// Origin of a file surfaced through the file-data hook.
#[derive(Copy, Clone, Debug)]
pub enum FileSource {
    Put,
}

/// A file observed inside HTTP traffic; for this parser, a PUT request
/// body.
#[derive(Clone, Debug)]
pub struct File {
    pub source: FileSource,
    /// File name, when one was communicated.
    pub filename: Option<Bstr>,
    /// Bytes seen so far.
    pub len: usize,
}

impl File {
    pub fn new(source: FileSource, filename: Option<Bstr>) -> Self {
        Self {
            source,
            filename,
            len: 0,
        }
    }

    /// Accounts for a chunk of file data and forwards it to the hook.
    pub fn handle_file_data(
        &mut self,
        hook: &FileDataHook,
        data: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(data) = data {
            self.len = self.len.wrapping_add(data.len());
        }
        let mut file_data = FileData::new(self, data);
        hook.run_all(&mut file_data)
    }
}

/// One chunk of file data, as delivered to file-data callbacks.
pub struct FileData<'a> {
    pub file: &'a File,
    pub data: Option<&'a [u8]>,
}

impl<'a> FileData<'a> {
    pub fn new(file: &'a File, data: Option<&'a [u8]>) -> Self {
        Self { file, data }
    }
}

fn x2c(data: &[u8]) -> u8 {
    let digit = |c: u8| {
        if c >= b'A' {
            ((c & 0xdf) - b'A') + 10
        } else {
            c - b'0'
        }
    };
    digit(data[0]).wrapping_mul(16).wrapping_add(digit(data[1]))
}

/// Decodes one `%uHHHH` payload (four hex digits) into a single byte via
/// the best-fit map, raising path flags as evasions are recognized.
fn decode_u_encoding_path(cfg: &DecoderConfig, flags: &mut u64, hex: &[u8]) -> u8 {
    let c1 = x2c(&hex[0..2]);
    let c2 = x2c(&hex[2..4]);
    let r = if c1 == 0 {
        flags.set(Flags::PATH_OVERLONG_U);
        c2
    } else {
        if c1 == 0xff {
            flags.set(Flags::PATH_FULLWIDTH_EVASION);
        }
        cfg.bestfit_map.get(((c1 as u32) << 8) | c2 as u32)
    };
    if r == b'/' || (cfg.backslash_convert_slashes && r == b'\\') {
        flags.set(Flags::PATH_ENCODED_SEPARATOR);
    }
    r
}

/// Decodes percent- and `%u`-encodings in a URI path, in place by
/// contract: the result is never longer than the input. Also applies the
/// configured backslash, lowercase and separator-compression rewrites.
pub fn decode_uri_path_inplace(
    cfg: &DecoderConfig,
    flags: &mut u64,
    expected_status: &mut Unwanted,
    path: &mut Bstr,
) {
    let data = path.as_slice().to_vec();
    let len = data.len();
    let mut out: Vec<u8> = Vec::with_capacity(len);
    let mut rpos = 0;
    let mut previous_was_separator = false;

    'next_byte: while rpos < len {
        let mut c = data[rpos];

        if c == b'%' {
            if rpos + 2 < len {
                let mut handled = false;
                let u_sequence = (data[rpos + 1] | 0x20) == b'u'
                    && rpos + 5 < len
                    && data[rpos + 2..rpos + 6].iter().all(|b| b.is_ascii_hexdigit());
                if !cfg.u_encoding_decode && u_sequence {
                    // A well-formed %u sequence with decoding off: unknown
                    // to us, preserved byte for byte, no flag.
                    handled = true;
                    rpos += 1;
                } else if cfg.u_encoding_decode && (data[rpos + 1] | 0x20) == b'u' {
                    handled = true;
                    if rpos + 5 < len {
                        let hex = &data[rpos + 2..rpos + 6];
                        if hex.iter().all(|b| b.is_ascii_hexdigit()) {
                            c = decode_u_encoding_path(cfg, flags, hex);
                            rpos += 6;
                            if cfg.u_encoding_unwanted != Unwanted::Ignore {
                                *expected_status = cfg.u_encoding_unwanted;
                            }
                            if c == 0 {
                                flags.set(Flags::PATH_ENCODED_NUL);
                                if cfg.nul_encoded_unwanted != Unwanted::Ignore {
                                    *expected_status = cfg.nul_encoded_unwanted;
                                }
                                if cfg.nul_encoded_terminates {
                                    *path = Bstr::from(out);
                                    return;
                                }
                            }
                        } else {
                            // Invalid %u encoding.
                            flags.set(Flags::PATH_INVALID_ENCODING);
                            match cfg.url_encoding_invalid_handling {
                                UrlEncodingHandling::RemovePercent => {
                                    rpos += 1;
                                    continue 'next_byte;
                                }
                                UrlEncodingHandling::PreservePercent => rpos += 1,
                                UrlEncodingHandling::DecodeInvalid => {
                                    c = decode_u_encoding_path(cfg, flags, hex);
                                    rpos += 6;
                                }
                                UrlEncodingHandling::Status400 => {
                                    *expected_status = Unwanted::Code400;
                                    c = decode_u_encoding_path(cfg, flags, hex);
                                    rpos += 6;
                                }
                            }
                        }
                    } else {
                        // Ran out of bytes mid %u sequence.
                        flags.set(Flags::PATH_INVALID_ENCODING);
                        if cfg.url_encoding_invalid_handling
                            == UrlEncodingHandling::RemovePercent
                        {
                            rpos += 1;
                            continue 'next_byte;
                        }
                        rpos += 1;
                    }
                }

                if !handled {
                    let hex = &data[rpos + 1..rpos + 3];
                    if hex.iter().all(|b| b.is_ascii_hexdigit()) {
                        c = x2c(hex);
                        if c == 0 {
                            flags.set(Flags::PATH_ENCODED_NUL);
                            if cfg.nul_encoded_unwanted != Unwanted::Ignore {
                                *expected_status = cfg.nul_encoded_unwanted;
                            }
                            if cfg.nul_encoded_terminates {
                                *path = Bstr::from(out);
                                return;
                            }
                        }
                        if c == b'/' || (cfg.backslash_convert_slashes && c == b'\\') {
                            flags.set(Flags::PATH_ENCODED_SEPARATOR);
                            if cfg.path_separators_decode {
                                rpos += 3;
                            } else {
                                // Keep the separator encoded.
                                c = b'%';
                                rpos += 1;
                            }
                        } else {
                            rpos += 3;
                        }
                    } else {
                        // Invalid %HH encoding.
                        flags.set(Flags::PATH_INVALID_ENCODING);
                        match cfg.url_encoding_invalid_handling {
                            UrlEncodingHandling::RemovePercent => {
                                rpos += 1;
                                continue 'next_byte;
                            }
                            UrlEncodingHandling::PreservePercent => rpos += 1,
                            UrlEncodingHandling::DecodeInvalid => {
                                c = x2c(hex);
                                rpos += 3;
                            }
                            UrlEncodingHandling::Status400 => {
                                *expected_status = Unwanted::Code400;
                                rpos += 1;
                            }
                        }
                    }
                }
            } else {
                // Percent at the very end of the path.
                flags.set(Flags::PATH_INVALID_ENCODING);
                if cfg.url_encoding_invalid_handling == UrlEncodingHandling::RemovePercent {
                    rpos += 1;
                    continue 'next_byte;
                }
                rpos += 1;
            }
        } else {
            if c == 0 {
                flags.set(Flags::PATH_RAW_NUL);
                if cfg.nul_raw_unwanted != Unwanted::Ignore {
                    *expected_status = cfg.nul_raw_unwanted;
                }
                if cfg.nul_raw_terminates {
                    *path = Bstr::from(out);
                    return;
                }
            }
            rpos += 1;
        }

        if c < 0x20 && cfg.control_chars_unwanted != Unwanted::Ignore {
            *expected_status = cfg.control_chars_unwanted;
        }
        if c == b'\\' && cfg.backslash_convert_slashes {
            c = b'/';
        }
        if cfg.convert_lowercase {
            c = c.to_ascii_lowercase();
        }

        if cfg.path_separators_compress && c == b'/' {
            if !previous_was_separator {
                out.push(c);
                previous_was_separator = true;
            }
        } else {
            out.push(c);
            previous_was_separator = false;
        }
    }

    *path = Bstr::from(out);
}

/// Runs the streaming UTF-8 decoder over the path: flags validity,
/// overlong forms and fullwidth evasions, and optionally rewrites the path
/// to its best-fit single-byte form.
pub fn utf8_decode_and_validate_uri_path_inplace(
    cfg: &DecoderConfig,
    flags: &mut u64,
    expected_status: &mut Unwanted,
    path: &mut Bstr,
) {
    let mut decoder = Utf8Decoder::new(cfg.bestfit_map);
    decoder.decode_and_validate(path.as_slice());
    if cfg.utf8_convert_bestfit {
        *path = Bstr::from(decoder.decoded_bytes.as_slice());
    }
    flags.set(decoder.flags);
    if flags.is_set(Flags::PATH_UTF8_INVALID) && cfg.utf8_invalid_unwanted != Unwanted::Ignore {
        *expected_status = cfg.utf8_invalid_unwanted;
    }
}

/// Decodes unreserved `%HH` escapes and uppercases the hex digits of the
/// escapes that stay, leaving everything else alone. Used on the URI
/// components that are normalized without full path decoding.
pub fn uriencoding_normalize_inplace(s: &mut Bstr) {
    let data = s.as_slice().to_vec();
    let len = data.len();
    let mut out: Vec<u8> = Vec::with_capacity(len);
    let mut rpos = 0;
    while rpos < len {
        if data[rpos] == b'%' && rpos + 2 < len {
            let hex = &data[rpos + 1..rpos + 3];
            if hex.iter().all(|b| b.is_ascii_hexdigit()) {
                let c = x2c(hex);
                if is_uri_unreserved(c) {
                    out.push(c);
                } else {
                    out.push(b'%');
                    out.push(hex[0].to_ascii_uppercase());
                    out.push(hex[1].to_ascii_uppercase());
                }
                rpos += 3;
                continue;
            }
        }
        out.push(data[rpos]);
        rpos += 1;
    }
    *s = Bstr::from(out);
}

/// RFC 3986 unreserved characters.
pub fn is_uri_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~')
}

/// Removes dot segments from a path, by the book (RFC 3986 §5.2.4).
pub fn normalize_uri_path_inplace(path: &mut Bstr) {
    fn pop_segment(out: &mut Vec<u8>) {
        while let Some(&last) = out.last() {
            out.pop();
            if last == b'/' {
                break;
            }
        }
    }

    let data = path.as_slice().to_vec();
    let mut input: &[u8] = &data;
    let mut out: Vec<u8> = Vec::with_capacity(data.len());

    while !input.is_empty() {
        // A.
        if let Some(rest) = input.strip_prefix(b"../") {
            input = rest;
        } else if let Some(rest) = input.strip_prefix(b"./") {
            input = rest;
        }
        // B.
        else if input == b"/." {
            input = b"/";
        } else if input.starts_with(b"/./") {
            input = &input[2..];
        }
        // C.
        else if input == b"/.." {
            pop_segment(&mut out);
            input = b"/";
        } else if input.starts_with(b"/../") {
            pop_segment(&mut out);
            input = &input[3..];
        }
        // D.
        else if input == b"." || input == b".." {
            input = b"";
        }
        // E.
        else {
            let mut end = if input[0] == b'/' { 1 } else { 0 };
            while end < input.len() && input[end] != b'/' {
                end += 1;
            }
            out.extend_from_slice(&input[..end]);
            input = &input[end..];
        }
    }

    *path = Bstr::from(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;

    #[test]
    fn separator_bytes() {
        assert!(!is_separator(b'a'));
        assert!(!is_separator(b'^'));
        assert!(!is_separator(b'-'));
        assert!(!is_separator(b'_'));
        assert!(!is_separator(b'&'));
        assert!(is_separator(b'('));
        assert!(is_separator(b'\\'));
        assert!(is_separator(b'/'));
        assert!(is_separator(b'='));
        assert!(is_separator(b'\t'));
    }

    #[test]
    fn token_bytes() {
        assert!(is_token(b'a'));
        assert!(is_token(b'&'));
        assert!(is_token(b'+'));
        assert!(!is_token(b'\t'));
        assert!(!is_token(b'\n'));
    }

    #[test]
    fn chomp_variants() {
        assert_eq!(chomp(b"test\r\n"), b"test");
        assert_eq!(chomp(b"test\r\n\n"), b"test");
        assert_eq!(chomp(b"test\r\n\r\n"), b"test");
        assert_eq!(chomp(b"te\nst"), b"te\nst");
        assert_eq!(chomp(b"foo\n"), b"foo");
        assert_eq!(chomp(b"arfarf"), b"arfarf");
        assert_eq!(chomp(b""), b"");
    }

    #[test]
    fn space_bytes() {
        assert!(!is_space(0x61));
        assert!(is_space(0x20));
        assert!(is_space(0x0c));
        assert!(is_space(0x0a));
        assert!(is_space(0x0d));
        assert!(is_space(0x09));
        assert!(is_space(0x0b));
    }

    #[test]
    fn line_classification() {
        assert!(!is_line_empty(b"arfarf"));
        assert!(is_line_empty(b"\r\n"));
        assert!(is_line_empty(b"\r"));
        assert!(is_line_empty(b"\n"));
        assert!(!is_line_empty(b"\n\r"));
        assert!(!is_line_empty(b"\rabc"));

        assert!(is_line_folded(b"\tline"));
        assert!(is_line_folded(b" line"));
        assert!(!is_line_folded(b"line "));
    }

    #[test]
    fn take_till_lf_needs_terminator() {
        assert_eq!(take_till_lf(b"GET /\n more"), Ok((&b" more"[..], &b"GET /\n"[..])));
        assert!(take_till_lf(b"GET /").is_err());
    }

    #[test]
    fn eol_shapes() {
        let (rest, (line, eol)) = take_till_eol(b"a\r\nb").unwrap();
        assert_eq!((rest, line, eol), (&b"b"[..], &b"a\r\n"[..], Eol::CrLf));

        let (_, (line, eol)) = take_till_eol(b"a\r\r\nb").unwrap();
        assert_eq!((line, eol), (&b"a\r\r\n"[..], Eol::CrCrLf));

        let (_, (line, eol)) = take_till_eol(b"a\rb").unwrap();
        assert_eq!((line, eol), (&b"a\r"[..], Eol::Cr));

        let (_, (line, eol)) = take_till_eol(b"a\n\rb").unwrap();
        assert_eq!((line, eol), (&b"a\n\r"[..], Eol::LfCr));

        // LF CR LF: the CRLF belongs to the following empty line.
        let (rest, (line, eol)) = take_till_eol(b"a\n\r\n").unwrap();
        assert_eq!((rest, line, eol), (&b"\r\n"[..], &b"a\n"[..], Eol::Lf));

        assert!(take_till_eol(b"abc").is_err());
        assert!(take_till_eol(b"abc\r").is_err());
    }

    #[test]
    fn chunked_probe() {
        assert!(is_valid_chunked_length_data(b"5\r\n"));
        assert!(is_valid_chunked_length_data(b"   12a5\r\n"));
        assert!(is_valid_chunked_length_data(b"\r\n\r\n fff\r\n"));
        assert!(!is_valid_chunked_length_data(b"<html>piles of data"));
    }

    #[test]
    fn ports_and_hostnames() {
        assert_eq!(convert_port(b"80"), Some(80));
        assert_eq!(convert_port(b"0"), None);
        assert_eq!(convert_port(b"x80"), None);
        assert_eq!(convert_port(b"99999"), None);

        assert!(validate_hostname(b"www.example.com"));
        assert!(validate_hostname(b"[::1]"));
        assert!(!validate_hostname(b"[::1]extra"));
        assert!(!validate_hostname(b"no spaces"));
        assert!(!validate_hostname(b""));
    }

    #[test]
    fn path_decode_basics() {
        let cfg = DecoderConfig::default();
        let mut flags = 0;
        let mut status = Unwanted::Ignore;

        let mut path = Bstr::from("/%41%42/c");
        decode_uri_path_inplace(&cfg, &mut flags, &mut status, &mut path);
        assert_eq!(path.as_slice(), b"/AB/c");
        assert_eq!(flags, 0);

        // Encoded separator stays encoded by default.
        let mut path = Bstr::from("/a%2fb");
        decode_uri_path_inplace(&cfg, &mut flags, &mut status, &mut path);
        assert_eq!(path.as_slice(), b"/a%2fb");
        assert!(flags.is_set(Flags::PATH_ENCODED_SEPARATOR));
    }

    #[test]
    fn path_decode_invalid_encoding_preserved() {
        let cfg = DecoderConfig::default();
        let mut flags = 0;
        let mut status = Unwanted::Ignore;
        let mut path = Bstr::from("/%zz");
        decode_uri_path_inplace(&cfg, &mut flags, &mut status, &mut path);
        assert_eq!(path.as_slice(), b"/%zz");
        assert!(flags.is_set(Flags::PATH_INVALID_ENCODING));
    }

    #[test]
    fn path_decode_u_encoding() {
        let mut cfg = DecoderConfig::default();
        cfg.u_encoding_decode = true;
        let mut flags = 0;
        let mut status = Unwanted::Ignore;
        let mut path = Bstr::from("/%u0041");
        decode_uri_path_inplace(&cfg, &mut flags, &mut status, &mut path);
        assert_eq!(path.as_slice(), b"/A");
        assert!(flags.is_set(Flags::PATH_OVERLONG_U));
    }

    #[test]
    fn path_decode_u_disabled_is_preserved() {
        let cfg = DecoderConfig::default();
        let mut flags = 0;
        let mut status = Unwanted::Ignore;
        let mut path = Bstr::from("/%u002e");
        decode_uri_path_inplace(&cfg, &mut flags, &mut status, &mut path);
        assert_eq!(path.as_slice(), b"/%u002e");
        assert!(!flags.is_set(Flags::PATH_INVALID_ENCODING));
    }

    #[test]
    fn uriencoding_normalize() {
        let mut s = Bstr::from("/%7e%2f%zz");
        uriencoding_normalize_inplace(&mut s);
        assert_eq!(s.as_slice(), b"/~%2F%zz");
    }
}
