use crate::{
    bstr::Bstr,
    config::Unwanted,
    decompressors::ContentEncoding,
    hook::DataHook,
    multipart,
    request::Method,
    table::Table,
    uri::Uri,
};

/// Protocol version as a comparable number. `V0_9` requests are primarily
/// identified by the `is_protocol_0_9` transaction flag; the ordering here
/// exists so that `protocol < V1_1` reads the way the RFC rules are
/// written.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug)]
pub enum Protocol {
    Invalid = -2,
    Unknown = -1,
    V0_9 = 9,
    V1_0 = 100,
    V1_1 = 101,
}

/// Where the request side of a transaction currently stands.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug)]
pub enum RequestProgress {
    NotStarted,
    Line,
    Headers,
    Body,
    Trailer,
    /// Request fully read; waiting on the response side.
    Wait,
    Complete,
}

/// Where the response side of a transaction currently stands.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug)]
pub enum ResponseProgress {
    NotStarted,
    Line,
    Headers,
    Body,
    Trailer,
    Complete,
}

/// How a message body is delimited.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum TransferCoding {
    /// Not yet determined.
    Unknown,
    /// No body at all.
    NoBody,
    /// Delimited by Content-Length or connection close.
    Identity,
    Chunked,
    Invalid,
}

/// Authorization scheme seen on the request.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum AuthType {
    /// Not yet examined.
    Unknown,
    /// No Authorization header.
    None,
    Basic,
    Digest,
    Bearer,
    Unrecognized,
}

/// A response status code with its parse outcome kept distinct: absent,
/// not a number, or a number.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ResponseStatus {
    Unknown,
    Invalid,
    Valid(u16),
}

impl ResponseStatus {
    /// True when the status is a number within `[lo, hi]`.
    pub fn in_range(&self, lo: u16, hi: u16) -> bool {
        matches!(self, ResponseStatus::Valid(code) if (lo..=hi).contains(code))
    }

    pub fn eq_num(&self, num: u16) -> bool {
        matches!(self, ResponseStatus::Valid(code) if *code == num)
    }
}

/// One header field: name as received, value with folds collapsed, and
/// the anomaly flags raised while parsing it.
#[derive(Clone, Debug)]
pub struct Header {
    pub name: Bstr,
    pub value: Bstr,
    pub flags: u64,
}

impl Header {
    pub fn new(name: Bstr, value: Bstr) -> Self {
        Self::new_with_flags(name, value, 0)
    }

    pub fn new_with_flags(name: Bstr, value: Bstr, flags: u64) -> Self {
        Self { name, value, flags }
    }
}

/// A chunk of body, header or trailer bytes on its way to a data hook.
/// `None` data with `is_last` set closes the stream.
pub struct Data<'a> {
    pub tx: &'a mut Transaction,
    pub data: Option<&'a [u8]>,
    pub is_last: bool,
}

impl<'a> Data<'a> {
    pub fn new(tx: &'a mut Transaction, data: Option<&'a [u8]>, is_last: bool) -> Self {
        Self { tx, data, is_last }
    }

    pub fn len(&self) -> usize {
        self.data.map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One request/response exchange. Everything the parser learns about the
/// pair, including every anomaly flag, accumulates here and stays until
/// the connection goes away.
pub struct Transaction {
    /// Position in the connection's transaction list.
    pub index: usize,
    /// Anomaly flags (see `util::Flags`); set-only.
    pub flags: u64,

    pub request_progress: RequestProgress,
    pub response_progress: ResponseProgress,

    /// Request line as received, terminator removed.
    pub request_line: Option<Bstr>,
    /// Method as received.
    pub request_method: Option<Bstr>,
    pub request_method_number: Method,
    /// URI as received on the request line.
    pub request_uri: Option<Bstr>,
    /// URI split into components, nothing decoded.
    pub parsed_uri_raw: Option<Uri>,
    /// URI after decoding and normalization.
    pub parsed_uri: Option<Uri>,
    pub request_protocol: Option<Bstr>,
    pub request_protocol_number: Protocol,
    /// Short-form request line without a protocol token.
    pub is_protocol_0_9: bool,

    pub request_headers: Table<Header>,
    pub request_transfer_coding: TransferCoding,
    /// Value of a valid Content-Length header; -1 when absent or unusable.
    pub request_content_length: i64,
    /// Bytes consumed from request line through end of body, framing
    /// included.
    pub request_message_len: i64,
    /// Bytes delivered to body-data hooks (dechunked).
    pub request_entity_len: i64,
    /// Empty or whitespace lines skipped before the request line.
    pub request_ignored_lines: u32,
    pub request_header_repetitions: u16,

    /// Hostname settled from URI and Host header.
    pub request_hostname: Option<Bstr>,
    /// Port settled the same way; the TCP port wins conflicts.
    pub request_port_number: Option<u16>,

    pub request_auth_type: AuthType,
    pub request_auth_username: Option<Bstr>,
    pub request_auth_password: Option<Bstr>,

    /// Multipart boundary matcher, when the request body is
    /// multipart/form-data and detection is enabled.
    pub request_mpartp: Option<multipart::Parser>,

    /// Interim 100 responses seen; more than one is an error.
    pub seen_100continue: u8,

    pub response_line: Option<Bstr>,
    pub response_protocol: Option<Bstr>,
    pub response_protocol_number: Protocol,
    /// Status code bytes as received.
    pub response_status: Option<Bstr>,
    pub response_status_number: ResponseStatus,
    /// Reason phrase.
    pub response_message: Option<Bstr>,
    /// Status an origin server would likely answer given the anomalies
    /// seen while decoding the request path.
    pub response_status_expected_number: Unwanted,

    pub response_headers: Table<Header>,
    pub response_transfer_coding: TransferCoding,
    pub response_content_length: i64,
    /// Raw body bytes on the wire, chunk framing included.
    pub response_message_len: i64,
    /// Body bytes after dechunking and decompression.
    pub response_entity_len: i64,
    /// Lowercased MIME type from the response Content-Type.
    pub response_content_type: Option<Bstr>,
    /// First recognized Content-Encoding token.
    pub response_content_encoding: ContentEncoding,
    pub response_header_repetitions: u16,

    /// Per-transaction body-data hooks, run before the configuration
    /// hooks.
    pub hook_request_body_data: DataHook,
    pub hook_response_body_data: DataHook,
}

impl Transaction {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            flags: 0,
            request_progress: RequestProgress::NotStarted,
            response_progress: ResponseProgress::NotStarted,
            request_line: None,
            request_method: None,
            request_method_number: Method::Unknown,
            request_uri: None,
            parsed_uri_raw: None,
            parsed_uri: None,
            request_protocol: None,
            request_protocol_number: Protocol::Unknown,
            is_protocol_0_9: false,
            request_headers: Table::with_capacity(32),
            request_transfer_coding: TransferCoding::Unknown,
            request_content_length: -1,
            request_message_len: 0,
            request_entity_len: 0,
            request_ignored_lines: 0,
            request_header_repetitions: 0,
            request_hostname: None,
            request_port_number: None,
            request_auth_type: AuthType::Unknown,
            request_auth_username: None,
            request_auth_password: None,
            request_mpartp: None,
            seen_100continue: 0,
            response_line: None,
            response_protocol: None,
            response_protocol_number: Protocol::Unknown,
            response_status: None,
            response_status_number: ResponseStatus::Unknown,
            response_message: None,
            response_status_expected_number: Unwanted::Ignore,
            response_headers: Table::with_capacity(32),
            response_transfer_coding: TransferCoding::Unknown,
            response_content_length: -1,
            response_message_len: 0,
            response_entity_len: 0,
            response_content_type: None,
            response_content_encoding: ContentEncoding::None,
            response_header_repetitions: 0,
            hook_request_body_data: DataHook::default(),
            hook_response_body_data: DataHook::default(),
        }
    }

    /// Registers a body-data callback on this transaction alone.
    pub fn register_request_body_data(
        &mut self,
        cbk: impl for<'a> Fn(&mut Data<'a>) -> crate::error::Result<()> + 'static,
    ) {
        self.hook_request_body_data.register(cbk);
    }

    pub fn register_response_body_data(
        &mut self,
        cbk: impl for<'a> Fn(&mut Data<'a>) -> crate::error::Result<()> + 'static,
    ) {
        self.hook_response_body_data.register(cbk);
    }

    /// Both sides have been fully parsed.
    pub fn is_complete(&self) -> bool {
        self.request_progress == RequestProgress::Complete
            && self.response_progress == ResponseProgress::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranges() {
        assert!(ResponseStatus::Valid(204).in_range(200, 299));
        assert!(!ResponseStatus::Valid(300).in_range(200, 299));
        assert!(!ResponseStatus::Invalid.in_range(0, 999));
        assert!(ResponseStatus::Valid(101).eq_num(101));
    }

    #[test]
    fn protocol_ordering() {
        assert!(Protocol::V1_0 < Protocol::V1_1);
        assert!(Protocol::V0_9 < Protocol::V1_0);
        assert!(Protocol::Invalid < Protocol::V0_9);
    }

    #[test]
    fn progress_ordering() {
        assert!(RequestProgress::Line < RequestProgress::Headers);
        assert!(ResponseProgress::Line <= ResponseProgress::Headers);
    }
}
