use crate::connection::Connection;
use std::net::IpAddr;
use std::sync::mpsc::Sender;

/// Log message severity. Messages above the configured level are dropped
/// before they reach the channel.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub enum Level {
    /// Fatal conditions; parsing stops on the affected direction.
    Error,
    /// Anomalies that do not stop parsing.
    Warning,
    Notice,
    Info,
    Debug,
}

/// Numeric identifiers for every distinct warning and error the parser
/// emits. Consumers match on these rather than on message text.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum LogCode {
    UNKNOWN,
    REQUEST_FIELD_MISSING_COLON,
    RESPONSE_FIELD_MISSING_COLON,
    INVALID_REQUEST_CHUNK_LEN,
    INVALID_RESPONSE_CHUNK_LEN,
    INVALID_TRANSFER_ENCODING_VALUE_IN_REQUEST,
    INVALID_TRANSFER_ENCODING_VALUE_IN_RESPONSE,
    INVALID_CONTENT_LENGTH_FIELD_IN_REQUEST,
    INVALID_CONTENT_LENGTH_FIELD_IN_RESPONSE,
    DUPLICATE_CONTENT_LENGTH_FIELD_IN_REQUEST,
    DUPLICATE_CONTENT_LENGTH_FIELD_IN_RESPONSE,
    CONTENT_LENGTH_EXTRA_DATA_START,
    CONTENT_LENGTH_EXTRA_DATA_END,
    CONTINUE_ALREADY_SEEN,
    UNABLE_TO_MATCH_RESPONSE_TO_REQUEST,
    INVALID_AUTHORITY_PORT,
    REQUEST_HEADER_INVALID,
    RESPONSE_HEADER_INVALID,
    MISSING_HOST_HEADER,
    HOST_HEADER_AMBIGUOUS,
    INVALID_REQUEST_FIELD_FOLDING,
    INVALID_RESPONSE_FIELD_FOLDING,
    REQUEST_FIELD_TOO_LONG,
    RESPONSE_FIELD_TOO_LONG,
    REQUEST_SERVER_PORT_TCP_PORT_MISMATCH,
    URI_HOST_INVALID,
    HEADER_HOST_INVALID,
    METHOD_DELIM_NON_COMPLIANT,
    URI_DELIM_NON_COMPLIANT,
    REQUEST_LINE_LEADING_WHITESPACE,
    REQUEST_LINE_NO_PROTOCOL,
    REQUEST_LINE_UNKNOWN_METHOD,
    REQUEST_LINE_UNKNOWN_METHOD_NO_PROTOCOL,
    REQUEST_LINE_UNKNOWN_METHOD_INVALID_PROTOCOL,
    PROTOCOL_CONTAINS_EXTRA_DATA,
    TOO_MANY_ENCODING_LAYERS,
    ABNORMAL_CE_HEADER,
    REQUEST_HEADER_REPETITION,
    RESPONSE_HEADER_REPETITION,
    RESPONSE_MULTIPART_BYTERANGES,
    RESPONSE_ABNORMAL_TRANSFER_ENCODING,
    CHUNKED_ON_OLD_PROTOCOL,
    RESPONSE_INVALID_PROTOCOL,
    RESPONSE_INVALID_STATUS,
    RESPONSE_LINE_NOT_HTTP,
    RESPONSE_BODY_UNEXPECTED,
    SWITCHING_PROTO_WITH_BODY,
    DEFORMED_EOL,
    PARSER_STATE_ERROR,
    ZERO_LENGTH_DATA_CHUNKS,
    COMPRESSION_BOMB,
    DECOMPRESSION_FAILED,
}

/// One message as produced at a call site, before it is paired with
/// connection information.
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    pub level: Level,
    pub code: LogCode,
    pub msg: String,
    pub file: &'static str,
    pub line: u32,
}

/// A message together with the endpoints of the connection it was
/// recorded on. This is what the log hook and `Connection::get_logs`
/// hand out.
#[derive(Clone, Debug)]
pub struct Log {
    pub client_addr: Option<IpAddr>,
    pub client_port: Option<u16>,
    pub server_addr: Option<IpAddr>,
    pub server_port: Option<u16>,
    pub msg: Message,
}

impl Log {
    pub fn new(conn: &Connection, msg: Message) -> Self {
        Self {
            client_addr: conn.client_addr,
            client_port: conn.client_port,
            server_addr: conn.server_addr,
            server_port: conn.server_port,
            msg,
        }
    }
}

/// Sends messages into the connection's log channel. Cheap to clone, so
/// the parser can log from deep inside state functions without borrowing
/// the connection.
#[derive(Clone)]
pub struct Logger {
    sender: Sender<Message>,
    pub level: Level,
}

impl Logger {
    pub fn new(sender: &Sender<Message>, level: Level) -> Self {
        Self {
            sender: sender.clone(),
            level,
        }
    }

    /// Records a message if it passes the level filter. Channel failure is
    /// ignored; logging must never interrupt parsing.
    pub fn log<S: Into<String>>(
        &self,
        level: Level,
        code: LogCode,
        msg: S,
        file: &'static str,
        line: u32,
    ) {
        if level <= self.level {
            let _ = self.sender.send(Message {
                level,
                code,
                msg: msg.into(),
                file,
                line,
            });
        }
    }
}

macro_rules! log_error {
    ($logger:expr, $code:ident, $msg:expr) => {
        $logger.log(
            crate::log::Level::Error,
            crate::log::LogCode::$code,
            $msg,
            file!(),
            line!(),
        )
    };
}

macro_rules! log_warn {
    ($logger:expr, $code:ident, $msg:expr) => {
        $logger.log(
            crate::log::Level::Warning,
            crate::log::LogCode::$code,
            $msg,
            file!(),
            line!(),
        )
    };
}

macro_rules! log_info {
    ($logger:expr, $code:ident, $msg:expr) => {
        $logger.log(
            crate::log::Level::Info,
            crate::log::LogCode::$code,
            $msg,
            file!(),
            line!(),
        )
    };
}

/// Warn at most once per transaction: the given flag gates the message and
/// is set afterwards, so repeats of the same anomaly stay quiet.
macro_rules! log_warn_once {
    ($logger:expr, $code:ident, $msg:expr, $flags:expr, $flag:expr) => {{
        use crate::util::FlagOperations;
        if !$flags.is_set($flag) {
            log_warn!($logger, $code, $msg);
        }
        $flags.set($flag);
    }};
}
