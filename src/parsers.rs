use crate::{
    bstr::Bstr,
    log::Logger,
    transaction::{AuthType, Protocol, ResponseStatus, Transaction},
    util::{self, ascii_digits, hex_digits, take_ascii_whitespace, FlagOperations, Flags},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_until, take_while},
    sequence::tuple,
    IResult,
};

/// Extracts the MIME type from a Content-Type header value, lowercased,
/// parameters ignored. The end of the type is found the way PHP does it:
/// at the first `;`, `,` or space.
pub fn parse_content_type(header: &[u8]) -> Option<Bstr> {
    let parsed: IResult<&[u8], (&[u8], &[u8])> =
        tuple((take_ascii_whitespace(), is_not(";, ")))(header);
    let (_, (_, content_type)) = parsed.ok()?;
    let mut ct = Bstr::from(content_type);
    ct.make_ascii_lowercase();
    Some(ct)
}

/// Parses a Content-Length value: a positive decimal number with optional
/// surrounding white space. Junk before or after the digits is tolerated
/// with a warning; a value with no digits at all is `None`.
pub fn parse_content_length(input: &[u8], logger: Option<&Logger>) -> Option<i64> {
    let (trailing, (leading, digits)) = ascii_digits(input).ok()?;
    if let Some(logger) = logger {
        if !leading.is_empty() {
            log_warn!(
                logger,
                CONTENT_LENGTH_EXTRA_DATA_START,
                "C-L value with extra data in the beginning"
            );
        }
        if !trailing.is_empty() {
            log_warn!(
                logger,
                CONTENT_LENGTH_EXTRA_DATA_END,
                "C-L value with extra data in the end"
            );
        }
    }
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok()
}

/// Parses a chunk length: a hexadecimal number with optional surrounding
/// white space. An empty line yields `Ok(None)`; anything else that fails
/// to parse is an error.
pub fn parse_chunked_length(input: &[u8]) -> std::result::Result<Option<i64>, &'static str> {
    if let Ok((trailing, digits)) = hex_digits(input) {
        if trailing.is_empty() && digits.is_empty() {
            return Ok(None);
        }
        if trailing.is_empty() {
            if let Some(len) = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| i64::from_str_radix(s, 16).ok())
            {
                return Ok(Some(len));
            }
        }
    }
    Err("invalid chunk length")
}

fn protocol_version(input: &[u8]) -> IResult<&[u8], (&[u8], bool)> {
    let (remaining, (_, _, leading, _, trailing, version, _)) = tuple((
        take_ascii_whitespace(),
        tag_no_case("HTTP"),
        take_ascii_whitespace(),
        tag("/"),
        take_while(|c: u8| c.is_ascii_whitespace() || c == b'0'),
        alt((tag(".9"), tag("1.0"), tag("1.1"))),
        take_ascii_whitespace(),
    ))(input)?;
    Ok((remaining, (version, !leading.is_empty() || !trailing.is_empty())))
}

/// Determines the protocol number from text such as `HTTP/1.1`. White
/// space around the slash and leading zeros are tolerated with a warning.
pub fn parse_protocol(input: &[u8], logger: &Logger) -> Protocol {
    if let Ok((remaining, (version, contains_extra))) = protocol_version(input) {
        if !remaining.is_empty() {
            return Protocol::Invalid;
        }
        if contains_extra {
            log_warn!(
                logger,
                PROTOCOL_CONTAINS_EXTRA_DATA,
                "Protocol version contains leading and/or trailing whitespace and/or leading zeros"
            );
        }
        match version {
            b".9" => Protocol::V0_9,
            b"1.0" => Protocol::V1_0,
            b"1.1" => Protocol::V1_1,
            _ => Protocol::Invalid,
        }
    } else {
        Protocol::Invalid
    }
}

/// Determines the numeric value of a response status. Exactly three or
/// more digits, nothing else.
pub fn parse_status(status: &[u8]) -> ResponseStatus {
    if let Ok((trailing, (leading, digits))) = ascii_digits(status) {
        if !trailing.is_empty() || !leading.is_empty() {
            return ResponseStatus::Invalid;
        }
        if let Ok(code) = std::str::from_utf8(digits).unwrap_or("").parse::<u16>() {
            return ResponseStatus::Valid(code);
        }
    }
    ResponseStatus::Invalid
}

/// Outcome of splitting one (unfolded, chomped) header field line.
pub struct ParsedHeader {
    pub name: Bstr,
    pub value: Bstr,
    pub flags: u64,
}

/// Splits a header field line into name and value, raising field flags
/// instead of rejecting: a missing colon keeps the whole line as the
/// value under an empty name, bad shapes are recorded and parsing goes
/// on.
pub fn parse_header_line(line: &[u8]) -> ParsedHeader {
    let mut flags = 0;
    match line.iter().position(|c| *c == b':') {
        None => {
            flags.set(Flags::FIELD_UNPARSEABLE);
            ParsedHeader {
                name: Bstr::new(),
                value: Bstr::from(trimmed(line)),
                flags,
            }
        }
        Some(colon) => {
            let name_raw = &line[..colon];
            if name_raw
                .last()
                .map(|c| util::is_lws(*c))
                .unwrap_or(false)
            {
                // LWS between name and colon.
                flags.set(Flags::FIELD_INVALID);
            }
            let name = trimmed(name_raw);
            if name.is_empty() {
                flags.set(Flags::FIELD_INVALID);
            } else if !name.iter().all(|c| util::is_token(*c)) {
                flags.set(Flags::FIELD_INVALID);
            }
            ParsedHeader {
                name: Bstr::from(name),
                value: Bstr::from(trimmed(&line[colon + 1..])),
                flags,
            }
        }
    }
}

/// Strips leading and trailing ASCII whitespace.
pub fn trimmed(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|c| !c.is_ascii_whitespace())
        .unwrap_or(input.len());
    let end = input.len()
        - input[start..]
            .iter()
            .rev()
            .position(|c| !c.is_ascii_whitespace())
            .unwrap_or(0);
    &input[start..end]
}

/// Parses Basic credentials: base64 of `username:password`.
fn parse_authorization_basic(tx: &mut Transaction, value: &[u8]) {
    let value = match take_ascii_whitespace()(value) {
        Ok((rest, _)) => rest,
        _ => value,
    };
    let decoded = match BASE64.decode(util::chomp(value)) {
        Ok(decoded) => decoded,
        Err(_) => {
            tx.flags.set(Flags::AUTH_INVALID);
            return;
        }
    };
    match decoded.iter().position(|c| *c == b':') {
        Some(colon) => {
            tx.request_auth_username = Some(Bstr::from(&decoded[..colon]));
            tx.request_auth_password = Some(Bstr::from(&decoded[colon + 1..]));
        }
        None => tx.flags.set(Flags::AUTH_INVALID),
    }
}

/// Extracts the quoted username parameter from Digest credentials.
fn parse_authorization_digest(tx: &mut Transaction, value: &[u8]) {
    let parsed: IResult<&[u8], (&[u8], &[u8], &[u8], &[u8], &[u8])> = tuple((
        take_until("username="),
        tag("username="),
        take_ascii_whitespace(),
        tag("\""),
        take_until("\""),
    ))(value);
    match parsed {
        Ok((_, (_, _, _, _, username))) => {
            tx.request_auth_username = Some(Bstr::from(username))
        }
        Err(_) => tx.flags.set(Flags::AUTH_INVALID),
    }
}

/// Parses the Authorization request header, if present, into the
/// transaction's auth fields.
pub fn parse_authorization(tx: &mut Transaction) {
    let header = match tx.request_headers.get_nocase("authorization") {
        Some((_, header)) => header.value.clone(),
        None => {
            tx.request_auth_type = AuthType::None;
            return;
        }
    };
    let value = match take_ascii_whitespace()(header.as_slice()) {
        Ok((rest, _)) => rest,
        _ => header.as_slice(),
    };
    if value.len() >= 6 && value[..6].eq_ignore_ascii_case(b"basic ") {
        tx.request_auth_type = AuthType::Basic;
        parse_authorization_basic(tx, &value[6..]);
    } else if value.len() >= 7 && value[..7].eq_ignore_ascii_case(b"digest ") {
        tx.request_auth_type = AuthType::Digest;
        parse_authorization_digest(tx, &value[7..]);
    } else if value.len() >= 7 && value[..7].eq_ignore_ascii_case(b"bearer ") {
        tx.request_auth_type = AuthType::Bearer;
    } else {
        tx.request_auth_type = AuthType::Unrecognized;
    }
}
