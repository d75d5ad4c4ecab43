use crate::{
    bstr::Bstr,
    config::Config,
    connection::Connection,
    decompressors::Decompressor,
    error::Result,
    hook::DataHook,
    log::{Log, Logger},
    transaction::Transaction,
    util::{Eol, File},
    Status,
};
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use time::OffsetDateTime;

/// Parser states for both directions. A state owns the byte cursor until
/// it returns; the tag stored here decides which state function the
/// dispatch loop invokes next.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    None,
    Idle,
    Line,
    Protocol,
    Headers,
    BodyDetermine,
    BodyChunkedLength,
    BodyChunkedData,
    BodyChunkedDataEnd,
    /// Request body with a known length.
    BodyIdentity,
    /// Response body with a known length.
    BodyIdentityClKnown,
    /// Response body delimited by connection close.
    BodyIdentityStreamClose,
    ConnectCheck,
    ConnectWaitResponse,
    ConnectProbeData,
    IgnoreDataAfterHttp09,
    Finalize,
}

/// Lifecycle state of one direction of the connection.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum StreamState {
    New,
    Open,
    Closed,
    Error,
    /// Bytes on this direction are no longer HTTP.
    Tunnel,
    /// All input consumed; feed more when available.
    NeedMore,
    /// The opposite direction must progress first.
    Suspend,
    /// A hook asked for parsing to stop.
    Stop,
}

/// The connection parser: two byte-driven state machines sharing one
/// transaction list. The caller pushes request bytes with `req_data` and
/// response bytes with `res_data`, in arrival order, and observes parsing
/// through the hooks registered on the configuration.
pub struct ConnectionParser {
    /// Parser configuration; immutable once the connection is open.
    pub cfg: Config,
    /// The connection being parsed.
    pub conn: Connection,
    /// Sends into the connection's log channel.
    pub logger: Logger,

    // Request direction.
    pub req_status: StreamState,
    pub(crate) req_state: State,
    pub(crate) req_state_previous: State,
    /// Current inbound chunk; copied in so state functions can borrow it
    /// independently of the parser.
    pub(crate) req_curr_data: Rc<Vec<u8>>,
    /// Read offset into the current chunk.
    pub(crate) req_pos: usize,
    /// Start of the raw-data region owed to the active receiver hook.
    pub(crate) req_receiver_offset: usize,
    /// Line carried over between chunks, bounded by the field limit.
    pub(crate) req_buf: Bstr,
    /// Partially accumulated (possibly folded) header line.
    pub(crate) req_header: Option<Bstr>,
    /// The accumulated header line contains folds.
    pub(crate) req_header_folded: bool,
    /// Index of the transaction being parsed on the request side.
    pub(crate) req_tx: Option<usize>,
    pub(crate) req_content_length: i64,
    pub(crate) req_body_data_left: i64,
    pub(crate) req_chunked_length: i64,
    /// Chunks seen on this direction so far.
    pub(crate) req_chunk_count: usize,
    /// Chunk count when the current request began; used to spot
    /// multi-packet header regions.
    pub(crate) req_chunk_request_index: usize,
    /// When the most recent inbound chunk arrived, when the caller
    /// supplies timestamps.
    pub req_timestamp: Option<OffsetDateTime>,
    pub(crate) req_data_receiver_hook: Option<DataHook>,
    /// PUT body file, when file extraction is enabled.
    pub(crate) put_file: Option<File>,

    // Response direction.
    pub res_status: StreamState,
    pub(crate) res_state: State,
    pub(crate) res_state_previous: State,
    pub(crate) res_curr_data: Rc<Vec<u8>>,
    pub(crate) res_pos: usize,
    pub(crate) res_receiver_offset: usize,
    pub(crate) res_buf: Bstr,
    pub(crate) res_header: Option<Bstr>,
    /// The accumulated header line contains folds.
    pub(crate) res_header_folded: bool,
    /// Index of the transaction the next response belongs to. Responses
    /// pair with requests in arrival order.
    pub(crate) res_tx: usize,
    /// Declared response Content-Length, mirrored from the transaction
    /// while the body is being read.
    pub res_content_length: i64,
    pub(crate) res_body_data_left: i64,
    pub(crate) res_chunked_length: i64,
    pub(crate) res_chunk_count: usize,
    /// When the most recent outbound chunk arrived.
    pub res_timestamp: Option<OffsetDateTime>,
    pub(crate) res_data_receiver_hook: Option<DataHook>,
    /// Terminator of the previous response line, for mixed-ending
    /// warnings.
    pub(crate) res_prev_eol: Option<Eol>,
    /// Active response decompressor chain.
    pub(crate) res_decompressor: Option<Decompressor>,
    /// Where the chain parks decompressed output until the response side
    /// drains it into the body hooks.
    pub(crate) res_decompress_sink: Rc<RefCell<Vec<Vec<u8>>>>,
    /// The response side should stop at the end of the current
    /// transaction to let the request side produce the next one.
    pub(crate) res_data_other_at_tx_end: bool,
}

impl ConnectionParser {
    pub fn new(cfg: Config) -> Self {
        let conn = Connection::default();
        let logger = Logger::new(conn.log_sender(), cfg.log_level);
        Self {
            cfg,
            conn,
            logger,
            req_status: StreamState::New,
            req_state: State::Idle,
            req_state_previous: State::None,
            req_curr_data: Rc::new(Vec::new()),
            req_pos: 0,
            req_receiver_offset: 0,
            req_buf: Bstr::new(),
            req_header: None,
            req_header_folded: false,
            req_tx: None,
            req_content_length: -1,
            req_body_data_left: -1,
            req_chunked_length: 0,
            req_chunk_count: 0,
            req_chunk_request_index: 0,
            req_timestamp: None,
            req_data_receiver_hook: None,
            put_file: None,
            res_status: StreamState::New,
            res_state: State::Idle,
            res_state_previous: State::None,
            res_curr_data: Rc::new(Vec::new()),
            res_pos: 0,
            res_receiver_offset: 0,
            res_buf: Bstr::new(),
            res_header: None,
            res_header_folded: false,
            res_tx: 0,
            res_content_length: -1,
            res_body_data_left: -1,
            res_chunked_length: 0,
            res_chunk_count: 0,
            res_timestamp: None,
            res_data_receiver_hook: None,
            res_prev_eol: None,
            res_decompressor: None,
            res_decompress_sink: Rc::new(RefCell::new(Vec::new())),
            res_data_other_at_tx_end: false,
        }
    }

    /// Opens the connection: records endpoints and readies both
    /// directions.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        if self.req_status != StreamState::New || self.res_status != StreamState::New {
            log_error!(
                self.logger,
                PARSER_STATE_ERROR,
                "Connection is already open"
            );
            return;
        }
        self.conn
            .open(client_addr, client_port, server_addr, server_port, timestamp);
        self.req_status = StreamState::Open;
        self.res_status = StreamState::Open;
    }

    /// Marks both directions closed and drains whatever state remains.
    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        self.conn.close(timestamp);
        self.req_status = StreamState::Closed;
        self.res_status = StreamState::Closed;
        let _ = self.req_data(timestamp, b"");
        let _ = self.res_data(timestamp, b"");
    }

    /// How much of the most recent request chunk was consumed. Meaningful
    /// after a `Suspend` return, when the caller must replay the rest.
    pub fn req_data_consumed(&self) -> usize {
        self.req_pos
    }

    pub fn res_data_consumed(&self) -> usize {
        self.res_pos
    }

    /// Feeds inbound (request direction) bytes.
    pub fn req_data(&mut self, timestamp: Option<OffsetDateTime>, data: &[u8]) -> StreamState {
        let rc = self.req_data_inner(timestamp, data);
        self.dispatch_logs();
        rc
    }

    fn req_data_inner(&mut self, timestamp: Option<OffsetDateTime>, data: &[u8]) -> StreamState {
        match self.req_status {
            StreamState::Stop => {
                log_info!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Inbound parser is in the STOP state"
                );
                return StreamState::Stop;
            }
            StreamState::Error => {
                log_error!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Inbound parser is in the ERROR state"
                );
                return StreamState::Error;
            }
            _ => {}
        }

        // Zero-length chunks only force finalization on a closed stream.
        if data.is_empty() && self.req_status != StreamState::Closed {
            log_error!(
                self.logger,
                ZERO_LENGTH_DATA_CHUNKS,
                "Zero-length data chunks are not allowed"
            );
            return StreamState::Closed;
        }

        if timestamp.is_some() {
            self.req_timestamp = timestamp;
        }
        self.req_curr_data = Rc::new(data.to_vec());
        self.req_pos = 0;
        self.req_receiver_offset = 0;
        self.req_chunk_count = self.req_chunk_count.wrapping_add(1);
        self.conn.track_req_data(data.len());

        // In tunnel mode nothing on this direction is parsed any more.
        if self.req_status == StreamState::Tunnel {
            return StreamState::Tunnel;
        }

        if self.res_status == StreamState::Suspend {
            self.res_status = StreamState::NeedMore;
        }

        // Drive the state machine until it runs out of data or yields.
        loop {
            let mut rc = self.handle_req_state();
            if rc.is_ok() {
                if self.req_status == StreamState::Tunnel {
                    return StreamState::Tunnel;
                }
                rc = self.req_handle_state_change();
            }
            match rc {
                Ok(()) => {}
                Err(Status::NeedMore) | Err(Status::NeedBuffer) => {
                    let _ = self.req_receiver_send_data(false);
                    self.req_status = StreamState::NeedMore;
                    return StreamState::NeedMore;
                }
                Err(Status::Suspend) => {
                    if self.req_pos >= self.req_curr_data.len() {
                        // The whole chunk was consumed; no need to make
                        // the caller replay anything.
                        self.req_status = StreamState::NeedMore;
                        return StreamState::NeedMore;
                    }
                    self.req_status = StreamState::Suspend;
                    return StreamState::Suspend;
                }
                Err(Status::Stop) => {
                    self.req_status = StreamState::Stop;
                    return StreamState::Stop;
                }
                Err(_) => {
                    self.req_status = StreamState::Error;
                    return StreamState::Error;
                }
            }
        }
    }

    /// Feeds outbound (response direction) bytes.
    pub fn res_data(&mut self, timestamp: Option<OffsetDateTime>, data: &[u8]) -> StreamState {
        let rc = self.res_data_inner(timestamp, data);
        self.dispatch_logs();
        rc
    }

    fn res_data_inner(&mut self, timestamp: Option<OffsetDateTime>, data: &[u8]) -> StreamState {
        match self.res_status {
            StreamState::Stop => {
                log_info!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Outbound parser is in the STOP state"
                );
                return StreamState::Stop;
            }
            StreamState::Error => {
                log_error!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Outbound parser is in the ERROR state"
                );
                return StreamState::Error;
            }
            _ => {}
        }

        if data.is_empty() && self.res_status != StreamState::Closed {
            log_error!(
                self.logger,
                ZERO_LENGTH_DATA_CHUNKS,
                "Zero-length data chunks are not allowed"
            );
            return StreamState::Closed;
        }

        if timestamp.is_some() {
            self.res_timestamp = timestamp;
        }
        self.res_curr_data = Rc::new(data.to_vec());
        self.res_pos = 0;
        self.res_receiver_offset = 0;
        self.res_chunk_count = self.res_chunk_count.wrapping_add(1);
        self.conn.track_res_data(data.len());

        if self.res_status == StreamState::Tunnel {
            return StreamState::Tunnel;
        }

        if self.req_status == StreamState::Suspend {
            self.req_status = StreamState::NeedMore;
        }

        loop {
            let mut rc = self.handle_res_state();
            if rc.is_ok() {
                if self.res_status == StreamState::Tunnel {
                    return StreamState::Tunnel;
                }
                rc = self.res_handle_state_change();
            }
            match rc {
                Ok(()) => {}
                Err(Status::NeedMore) | Err(Status::NeedBuffer) => {
                    let _ = self.res_receiver_send_data(false);
                    self.res_status = StreamState::NeedMore;
                    return StreamState::NeedMore;
                }
                Err(Status::Suspend) => {
                    if self.res_pos >= self.res_curr_data.len() {
                        self.res_status = StreamState::NeedMore;
                        return StreamState::NeedMore;
                    }
                    self.res_status = StreamState::Suspend;
                    return StreamState::Suspend;
                }
                Err(Status::Stop) => {
                    self.res_status = StreamState::Stop;
                    return StreamState::Stop;
                }
                Err(_) => {
                    self.res_status = StreamState::Error;
                    return StreamState::Error;
                }
            }
        }
    }

    fn handle_req_state(&mut self) -> Result<()> {
        let chunk = Rc::clone(&self.req_curr_data);
        let unread = &chunk[self.req_pos.min(chunk.len())..];
        match self.req_state {
            State::Idle => self.req_idle(),
            State::Line => self.req_line(unread),
            State::Protocol => self.req_protocol(unread),
            State::Headers => self.req_headers(unread),
            State::BodyDetermine => self.req_body_determine(),
            State::BodyChunkedLength => self.req_body_chunked_length(unread),
            State::BodyChunkedData => self.req_body_chunked_data(unread),
            State::BodyChunkedDataEnd => self.req_body_chunked_data_end(unread),
            State::BodyIdentity => self.req_body_identity(unread),
            State::ConnectCheck => self.req_connect_check(),
            State::ConnectWaitResponse => self.req_connect_wait_response(),
            State::ConnectProbeData => self.req_connect_probe_data(unread),
            State::IgnoreDataAfterHttp09 => self.req_ignore_data_after_http_0_9(),
            State::Finalize => self.req_finalize(),
            _ => {
                log_error!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Invalid request parser state"
                );
                Err(Status::Error)
            }
        }
    }

    fn handle_res_state(&mut self) -> Result<()> {
        let chunk = Rc::clone(&self.res_curr_data);
        let unread = &chunk[self.res_pos.min(chunk.len())..];
        match self.res_state {
            State::Idle => self.res_idle(),
            State::Line => self.res_line(unread),
            State::Headers => self.res_headers(unread),
            State::BodyDetermine => self.res_body_determine(),
            State::BodyChunkedLength => self.res_body_chunked_length(unread),
            State::BodyChunkedData => self.res_body_chunked_data(unread),
            State::BodyChunkedDataEnd => self.res_body_chunked_data_end(unread),
            State::BodyIdentityClKnown => self.res_body_identity_cl_known(unread),
            State::BodyIdentityStreamClose => self.res_body_identity_stream_close(unread),
            State::Finalize => self.res_finalize(),
            _ => {
                log_error!(
                    self.logger,
                    PARSER_STATE_ERROR,
                    "Invalid response parser state"
                );
                Err(Status::Error)
            }
        }
    }

    /// Creates a transaction and appends it to the connection's list.
    pub(crate) fn create_tx(&mut self) -> usize {
        let index = self.conn.tx_size();
        self.conn.push_tx(Transaction::new(index))
    }

    /// The transaction currently being parsed on the request side.
    pub fn request(&self) -> Option<&Transaction> {
        self.req_tx.and_then(|i| self.conn.tx(i))
    }

    pub fn request_mut(&mut self) -> Option<&mut Transaction> {
        let i = self.req_tx?;
        self.conn.tx_mut(i)
    }

    /// The transaction the next response bytes belong to.
    pub fn response(&self) -> Option<&Transaction> {
        self.conn.tx(self.res_tx)
    }

    pub fn response_mut(&mut self) -> Option<&mut Transaction> {
        self.conn.tx_mut(self.res_tx)
    }

    /// Runs the transaction-complete hook once both sides are done.
    pub(crate) fn finalize_transaction(&mut self, index: usize) -> Result<()> {
        let complete = self
            .conn
            .tx(index)
            .map(|tx| tx.is_complete())
            .unwrap_or(false);
        if !complete {
            return Ok(());
        }
        let hook = self.cfg.hook_transaction_complete.clone();
        if let Some(tx) = self.conn.tx_mut(index) {
            hook.run_all(tx)?;
        }
        Ok(())
    }

    /// Hands recorded log messages to the log hook, when one is set.
    /// Without a hook the messages stay queued for `Connection::get_logs`.
    fn dispatch_logs(&mut self) {
        if self.cfg.hook_log.is_empty() {
            return;
        }
        let hook = self.cfg.hook_log.clone();
        let logs: Vec<Log> = self.conn.get_logs();
        for log in &logs {
            let _ = hook.run_all(log);
        }
    }
}
