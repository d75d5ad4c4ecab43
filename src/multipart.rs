use crate::bstr::{index_of_nocase, Bstr};
use crate::util::{is_lws, is_space, FlagOperations};

/// Multipart parsing flags, recorded on the multipart record and mirrored
/// onto the owning transaction by the content handler.
pub struct Flags;

impl Flags {
    /// The final `--` boundary was seen.
    pub const SEEN_LAST_BOUNDARY: u64 = 0x0001;
    /// Data arrived after the final boundary.
    pub const PART_AFTER_LAST_BOUNDARY: u64 = 0x0002;
    /// The body ended without a final boundary.
    pub const INCOMPLETE: u64 = 0x0004;
    /// Bytes preceded the first boundary.
    pub const HAS_PREAMBLE: u64 = 0x0008;
    /// Bytes followed the final boundary.
    pub const HAS_EPILOGUE: u64 = 0x0010;
    /// The boundary parameter in the Content-Type header is unusable.
    pub const HBOUNDARY_INVALID: u64 = 0x0020;
    /// The boundary parameter is usable but oddly formed.
    pub const HBOUNDARY_UNUSUAL: u64 = 0x0040;
    /// The boundary parameter was quoted.
    pub const HBOUNDARY_QUOTED: u64 = 0x0080;
    /// A boundary line ended in a bare LF.
    pub const LF_LINE: u64 = 0x0100;
    /// A boundary line ended in CRLF.
    pub const CRLF_LINE: u64 = 0x0200;
    /// Linear white space between boundary and line end.
    pub const BBOUNDARY_LWS_AFTER: u64 = 0x0400;
    /// Non white space bytes between boundary and line end.
    pub const BBOUNDARY_NLWS_AFTER: u64 = 0x0800;
}

/// Characters the RFC tolerates in a boundary besides alphanumerics and
/// the hyphen; their presence is unusual in browser traffic.
const RFC_TOLERATED: &[u8] = b"'()+_,./:=? ";

fn validate_boundary(boundary: &[u8], flags: &mut u64) {
    // The RFC allows 1 to 70 characters; real boundaries are shorter.
    if boundary.is_empty() || boundary.len() > 70 {
        flags.set(Flags::HBOUNDARY_INVALID);
    }
    // Stricter than the RFC on purpose: browsers stick to alphanumerics
    // and hyphens, so anything else deserves at least a second look.
    for &b in boundary {
        if !(b.is_ascii_alphanumeric() || b == b'-') {
            if RFC_TOLERATED.contains(&b) {
                flags.set(Flags::HBOUNDARY_UNUSUAL);
            } else {
                flags.set(Flags::HBOUNDARY_INVALID);
            }
        }
    }
}

/// Extracts the `boundary` parameter from a Content-Type header value.
///
/// The MIME type itself is ignored while hunting for the parameter; that
/// is deliberate, because evasions lean on mangled MIME types. The type is
/// only correlated afterwards: anything but an exact
/// `multipart/form-data;` prefix is flagged invalid.
pub fn find_boundary(content_type: &[u8], flags: &mut u64) -> Option<Bstr> {
    let first = index_of_nocase(content_type, b"boundary")?;

    // Counting occurrences matters: repeated boundary parameters are an
    // evasion against parsers that pick a different one than the server.
    if index_of_nocase(&content_type[first + 8..], b"boundary").is_some() {
        flags.set(Flags::HBOUNDARY_INVALID);
    }

    let data = &content_type[first + 8..];
    let mut pos = 0;

    // Everything before the equals sign.
    while pos < data.len() && data[pos] != b'=' {
        if is_space(data[pos]) {
            // Unusual to see white space before the equals sign.
            flags.set(Flags::HBOUNDARY_UNUSUAL);
        } else {
            // Non white space bytes here may indicate evasion.
            flags.set(Flags::HBOUNDARY_INVALID);
        }
        pos += 1;
    }
    if pos >= data.len() {
        flags.set(Flags::HBOUNDARY_INVALID);
        return None;
    }
    pos += 1;

    // White space after the equals sign.
    while pos < data.len() && is_space(data[pos]) {
        flags.set(Flags::HBOUNDARY_UNUSUAL);
        pos += 1;
    }
    if pos >= data.len() {
        flags.set(Flags::HBOUNDARY_INVALID);
        return None;
    }

    let boundary;
    if data[pos] == b'"' {
        flags.set(Flags::HBOUNDARY_UNUSUAL);
        flags.set(Flags::HBOUNDARY_QUOTED);
        pos += 1;
        let mut start = pos;
        while pos < data.len() && data[pos] != b'"' {
            pos += 1;
        }
        if pos >= data.len() {
            // No terminating quote; keep the opening quote in the value.
            flags.set(Flags::HBOUNDARY_INVALID);
            start -= 1;
        }
        boundary = Bstr::from(&data[start..pos]);
        pos += 1;
    } else {
        // Token form, terminated the way PHP terminates it.
        let start = pos;
        while pos < data.len()
            && data[pos] != b','
            && data[pos] != b';'
            && !is_space(data[pos])
        {
            pos += 1;
        }
        boundary = Bstr::from(&data[start..pos]);
    }

    if boundary.is_empty() {
        flags.set(Flags::HBOUNDARY_INVALID);
        return None;
    }

    // Only white space may follow the boundary value.
    let mut seen_space = false;
    let mut seen_non_space = false;
    while pos < data.len() {
        if is_space(data[pos]) {
            seen_space = true;
        } else {
            seen_non_space = true;
        }
        pos += 1;
    }
    if seen_non_space {
        flags.set(Flags::HBOUNDARY_INVALID);
    } else if seen_space {
        flags.set(Flags::HBOUNDARY_UNUSUAL);
    }

    validate_boundary(boundary.as_slice(), flags);

    // Case-sensitive on purpose; mixed-case spellings of the MIME type are
    // themselves an anomaly worth flagging.
    if !content_type.starts_with(b"multipart/form-data;") {
        flags.set(Flags::HBOUNDARY_INVALID);
    }

    Some(boundary)
}

/// Multipart body facts collected during boundary matching.
#[derive(Clone, Debug)]
pub struct Multipart {
    /// The boundary, prefixed with CRLF and the two hyphens.
    pub boundary: Bstr,
    /// Boundaries matched in the body so far.
    pub boundary_count: u32,
    pub flags: u64,
}

#[derive(Copy, Clone, PartialEq, Debug)]
enum State {
    /// Matching boundary bytes at `match_pos`.
    Boundary,
    /// Matched the full boundary; this byte decides a final `-`.
    BoundaryIsLast1,
    /// One `-` seen; a second marks the final boundary.
    BoundaryIsLast2,
    /// Consuming the rest of the boundary line.
    BoundaryEatLws,
    /// Saw CR while consuming the line tail.
    BoundaryEatLwsCr,
    /// Inside part data (or preamble/epilogue).
    Data,
}

/// Streaming boundary matcher. Bytes are examined one at a time through a
/// small sub-state machine; a partial boundary match that falls through is
/// replayed as data, so part content is never lost.
pub struct Parser {
    pub multipart: Multipart,
    state: State,
    /// Position of the next boundary byte to match.
    match_pos: usize,
    /// First boundary byte that was matched against real input (0 when
    /// the candidate started with CR, 1 when it started with LF).
    match_offset: usize,
    /// Candidate detection is suppressed while replaying.
    check_for_boundary_start: bool,
    /// Data bytes of each completed region (preamble or part).
    pub part_data_len: Vec<u64>,
    current_part_len: u64,
    seen_data_since_boundary: bool,
    /// Whether the final boundary had already been seen when the boundary
    /// line currently being consumed started.
    last_seen_before_line: bool,
}

impl Parser {
    /// Builds a matcher for the given boundary (as extracted from the
    /// Content-Type header, without hyphens).
    pub fn new(boundary: &[u8], flags: u64) -> Self {
        let mut full = Bstr::with_capacity(boundary.len() + 4);
        full.add("\r\n--");
        full.add(boundary);
        Self {
            multipart: Multipart {
                boundary: full,
                boundary_count: 0,
                flags,
            },
            // The first boundary may omit the leading CRLF.
            state: State::Boundary,
            match_pos: 2,
            match_offset: 2,
            check_for_boundary_start: true,
            part_data_len: Vec::new(),
            current_part_len: 0,
            seen_data_since_boundary: false,
            last_seen_before_line: false,
        }
    }

    fn data_byte(&mut self, _byte: u8) {
        self.current_part_len += 1;
        self.seen_data_since_boundary = true;
        if self
            .multipart
            .flags
            .is_set(Flags::SEEN_LAST_BOUNDARY)
        {
            self.multipart.flags.set(Flags::HAS_EPILOGUE);
        }
    }

    fn boundary_matched(&mut self) {
        if self.multipart.boundary_count == 0 && self.seen_data_since_boundary {
            self.multipart.flags.set(Flags::HAS_PREAMBLE);
        }
        if self.last_seen_before_line {
            self.multipart.flags.set(Flags::PART_AFTER_LAST_BOUNDARY);
        }
        self.multipart.boundary_count = self.multipart.boundary_count.wrapping_add(1);
        self.part_data_len.push(self.current_part_len);
        self.current_part_len = 0;
        self.seen_data_since_boundary = false;
    }

    /// Consumes a chunk of body data.
    pub fn parse(&mut self, data: &[u8]) {
        let boundary_len = self.multipart.boundary.len();
        let mut pos = 0;

        while pos < data.len() {
            let c = data[pos];

            // A CR or LF inside data may open a boundary candidate.
            if self.state == State::Data && self.check_for_boundary_start {
                if c == b'\r' {
                    self.match_offset = 0;
                    self.match_pos = 1;
                    self.state = State::Boundary;
                    pos += 1;
                    continue;
                } else if c == b'\n' {
                    self.match_offset = 1;
                    self.match_pos = 2;
                    self.state = State::Boundary;
                    pos += 1;
                    continue;
                }
            }

            match self.state {
                State::Data => {
                    self.data_byte(c);
                    pos += 1;
                }
                State::Boundary => {
                    if c == self.multipart.boundary.as_slice()[self.match_pos] {
                        self.match_pos += 1;
                        pos += 1;
                        if self.match_pos == boundary_len {
                            self.last_seen_before_line =
                                self.multipart.flags.is_set(Flags::SEEN_LAST_BOUNDARY);
                            self.state = State::BoundaryIsLast1;
                        }
                    } else {
                        // Not a boundary after all: replay what matched as
                        // data, then re-examine the current byte.
                        let replay: Vec<u8> = self.multipart.boundary.as_slice()
                            [self.match_offset..self.match_pos]
                            .to_vec();
                        self.state = State::Data;
                        self.check_for_boundary_start = false;
                        self.parse(&replay);
                        self.check_for_boundary_start = true;
                    }
                }
                State::BoundaryIsLast1 => {
                    if c == b'-' {
                        pos += 1;
                        self.state = State::BoundaryIsLast2;
                    } else {
                        self.state = State::BoundaryEatLws;
                    }
                }
                State::BoundaryIsLast2 => {
                    if c == b'-' {
                        self.multipart.flags.set(Flags::SEEN_LAST_BOUNDARY);
                        pos += 1;
                    }
                    self.state = State::BoundaryEatLws;
                }
                State::BoundaryEatLws => {
                    if c == b'\r' {
                        pos += 1;
                        self.state = State::BoundaryEatLwsCr;
                    } else if c == b'\n' {
                        self.multipart.flags.set(Flags::LF_LINE);
                        pos += 1;
                        self.finish_boundary_line();
                    } else {
                        if is_lws(c) {
                            self.multipart.flags.set(Flags::BBOUNDARY_LWS_AFTER);
                        } else {
                            self.multipart.flags.set(Flags::BBOUNDARY_NLWS_AFTER);
                        }
                        pos += 1;
                    }
                }
                State::BoundaryEatLwsCr => {
                    if c == b'\n' {
                        self.multipart.flags.set(Flags::CRLF_LINE);
                        pos += 1;
                        self.finish_boundary_line();
                    } else {
                        self.multipart.flags.set(Flags::BBOUNDARY_NLWS_AFTER);
                        self.state = State::BoundaryEatLws;
                    }
                }
            }
        }
    }

    fn finish_boundary_line(&mut self) {
        self.boundary_matched();
        self.state = State::Data;
        self.check_for_boundary_start = true;
    }

    /// Ends the body. A multipart body that never produced its final
    /// boundary is incomplete.
    pub fn finalize(&mut self) {
        if !self.multipart.flags.is_set(Flags::SEEN_LAST_BOUNDARY) {
            self.multipart.flags.set(Flags::INCOMPLETE);
        }
    }
}
