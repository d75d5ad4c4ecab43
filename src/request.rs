use crate::{
    bstr::Bstr,
    connection_parser::{ConnectionParser, State, StreamState},
    content_handlers,
    error::Result,
    hook::DataHook,
    parsers::{
        parse_authorization, parse_chunked_length, parse_content_length, parse_header_line,
        parse_protocol,
    },
    transaction::{
        Data, Header, Protocol, RequestProgress, ResponseProgress, TransferCoding,
    },
    uri::{normalize_uri, parse_hostport, Uri},
    util::{
        chomp, is_folding_char, is_line_folded, is_line_ignorable, is_line_terminator, is_space,
        take_ascii_whitespace, take_is_space, take_not_is_space, take_till_lf, take_till_lf_null,
        take_until_null, ConnectionFlags, File, FileSource, FlagOperations, Flags,
    },
    Status,
};
use nom::{
    bytes::complete::{take_until, take_while},
    character::complete::char,
    sequence::tuple,
};
use std::cmp::min;
use std::rc::Rc;

/// Request methods, normalized to a number. `Unknown` covers methods the
/// parser has never heard of; `Invalid` ones it could not extract at all.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Method {
    Unknown,
    Head,
    Get,
    Put,
    Post,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Propfind,
    Proppatch,
    Mkcol,
    Copy,
    Move,
    Lock,
    Unlock,
    VersionControl,
    Checkout,
    Uncheckout,
    Checkin,
    Update,
    Label,
    Report,
    Mkworkspace,
    Mkactivity,
    BaselineControl,
    Merge,
    Invalid,
}

impl From<&[u8]> for Method {
    fn from(method: &[u8]) -> Self {
        match method {
            b"GET" => Method::Get,
            b"PUT" => Method::Put,
            b"POST" => Method::Post,
            b"DELETE" => Method::Delete,
            b"CONNECT" => Method::Connect,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"PATCH" => Method::Patch,
            b"PROPFIND" => Method::Propfind,
            b"PROPPATCH" => Method::Proppatch,
            b"MKCOL" => Method::Mkcol,
            b"COPY" => Method::Copy,
            b"MOVE" => Method::Move,
            b"LOCK" => Method::Lock,
            b"UNLOCK" => Method::Unlock,
            b"VERSION-CONTROL" => Method::VersionControl,
            b"CHECKOUT" => Method::Checkout,
            b"UNCHECKOUT" => Method::Uncheckout,
            b"CHECKIN" => Method::Checkin,
            b"UPDATE" => Method::Update,
            b"LABEL" => Method::Label,
            b"REPORT" => Method::Report,
            b"MKWORKSPACE" => Method::Mkworkspace,
            b"MKACTIVITY" => Method::Mkactivity,
            b"BASELINE-CONTROL" => Method::BaselineControl,
            b"MERGE" => Method::Merge,
            b"HEAD" => Method::Head,
            _ => Method::Unknown,
        }
    }
}

impl ConnectionParser {
    /// Sends the bytes accumulated since the receiver offset to the
    /// active data-receiver hook.
    pub(crate) fn req_receiver_send_data(&mut self, is_last: bool) -> Result<()> {
        let hook = match &self.req_data_receiver_hook {
            Some(hook) => hook.clone(),
            None => return Ok(()),
        };
        let chunk = Rc::clone(&self.req_curr_data);
        let end = min(self.req_pos, chunk.len());
        let start = min(self.req_receiver_offset, end);
        let slice = &chunk[start..end];
        if !slice.is_empty() || is_last {
            if let Some(index) = self.req_tx {
                if let Some(tx) = self.conn.tx_mut(index) {
                    let mut data = Data::new(tx, Some(slice), is_last);
                    hook.run_all(&mut data)?;
                }
            }
        }
        self.req_receiver_offset = end;
        Ok(())
    }

    /// Replaces the data-receiver hook, finalizing the previous one.
    fn req_receiver_set(&mut self, hook: Option<DataHook>) -> Result<()> {
        let _ = self.req_receiver_finalize_clear();
        self.req_data_receiver_hook = hook;
        self.req_receiver_offset = self.req_pos;
        Ok(())
    }

    /// Sends any outstanding bytes to the receiver hook, marked last, and
    /// removes the hook.
    pub(crate) fn req_receiver_finalize_clear(&mut self) -> Result<()> {
        if self.req_data_receiver_hook.is_none() {
            return Ok(());
        }
        let rc = self.req_receiver_send_data(true);
        self.req_data_receiver_hook = None;
        rc
    }

    /// Reacts to request state transitions; today that means wiring the
    /// header and trailer data receivers when header parsing begins.
    pub(crate) fn req_handle_state_change(&mut self) -> Result<()> {
        if self.req_state_previous == self.req_state {
            return Ok(());
        }
        if self.req_state == State::Headers {
            match self.request().map(|tx| tx.request_progress) {
                Some(RequestProgress::Headers) => {
                    let hook = self.cfg.hook_request_header_data.clone();
                    self.req_receiver_set(Some(hook))
                }
                Some(RequestProgress::Trailer) => {
                    let hook = self.cfg.hook_request_trailer_data.clone();
                    self.req_receiver_set(Some(hook))
                }
                _ => Ok(()),
            }?;
        }
        self.req_state_previous = self.req_state;
        Ok(())
    }

    /// Enforces the hard buffering limit before carrying bytes over to
    /// the next chunk.
    fn check_req_buffer_limit(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut newlen = self.req_buf.len().wrapping_add(len);
        if let Some(header) = &self.req_header {
            newlen = newlen.wrapping_add(header.len());
        }
        if newlen > self.cfg.field_limit {
            log_error!(
                self.logger,
                REQUEST_FIELD_TOO_LONG,
                format!(
                    "Request buffer over the limit: size {} limit {}.",
                    newlen, self.cfg.field_limit
                )
            );
            return Err(Status::Error);
        }
        Ok(())
    }

    /// Preserves an incomplete line for the next chunk and yields.
    fn handle_req_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.req_pos = self.req_curr_data.len();
        self.check_req_buffer_limit(data.len())?;
        self.req_buf.add(data);
        Err(Status::NeedBuffer)
    }

    /// Starts a new transaction once at least one byte is available.
    pub(crate) fn req_idle(&mut self) -> Result<()> {
        if self.req_pos >= self.req_curr_data.len() {
            return Err(Status::NeedMore);
        }
        let index = self.create_tx();
        self.req_tx = Some(index);
        self.req_chunk_request_index = self.req_chunk_count;
        // A new request before the previous response finished.
        if index > 0 && self.res_tx < index {
            self.conn.flags.set(ConnectionFlags::PIPELINED);
        }
        self.state_request_start()
    }

    fn state_request_start(&mut self) -> Result<()> {
        let hook = self.cfg.hook_transaction_start.clone();
        let tx = self.request_mut().ok_or(Status::Error)?;
        tx.request_progress = RequestProgress::Line;
        hook.run_all(tx)?;
        self.req_state = State::Line;
        Ok(())
    }

    /// Accumulates bytes until LF and hands the line over for parsing.
    pub(crate) fn req_line(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.req_pos += line.len();
                self.req_line_complete(line)
            }
            _ => {
                if self.req_status == StreamState::Closed {
                    self.req_pos = self.req_curr_data.len();
                    self.req_line_complete(data)
                } else {
                    self.handle_req_absent_lf(data)
                }
            }
        }
    }

    fn req_line_complete(&mut self, line: &[u8]) -> Result<()> {
        if !self.req_buf.is_empty() {
            self.check_req_buffer_limit(line.len())?;
        }
        let mut data = std::mem::take(&mut self.req_buf);
        data.add(line);
        if data.is_empty() {
            return Err(Status::NeedMore);
        }
        self.request_mut().ok_or(Status::Error)?.request_message_len += data.len() as i64;
        // Empty and whitespace lines before the request line are noted
        // and skipped.
        if is_line_ignorable(data.as_slice()) {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.request_ignored_lines = tx.request_ignored_lines.wrapping_add(1);
            return Ok(());
        }
        let chomped = chomp(data.as_slice());
        self.request_mut().ok_or(Status::Error)?.request_line = Some(Bstr::from(chomped));
        self.parse_request_line(chomped)?;
        self.state_request_line()
    }

    /// Splits the request line the way Apache 2.2 does: method up to the
    /// first white space, any run of white space, URI up to the next
    /// space, optional protocol until the end of the line.
    pub(crate) fn parse_request_line(&mut self, request_line: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let mut data = request_line;
        // A NUL cuts the usable part of the line short.
        if let Ok((_, before_null)) = take_until_null(data) {
            if before_null.len() < data.len() {
                self.request_mut()
                    .ok_or(Status::Error)?
                    .flags
                    .set(Flags::FIELD_NUL_BYTE);
                data = before_null;
            }
        }

        // Leading white space before the method; IIS accepts it.
        let (remaining, (leading, method, delimiters)) = tuple::<_, _, nom::error::Error<&[u8]>, _>((
            take_is_space,
            take_not_is_space,
            take_ascii_whitespace(),
        ))(data)?;
        if !leading.is_empty() {
            log_warn!(
                logger,
                REQUEST_LINE_LEADING_WHITESPACE,
                "Request line: leading whitespace"
            );
        }
        let method_number = Method::from(method);
        {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.request_method = Some(Bstr::from(method));
            tx.request_method_number = method_number;
        }
        // The RFC wants a single SP here; Apache accepts any white space.
        if delimiters.iter().any(|c| *c != b' ') {
            log_warn!(
                logger,
                METHOD_DELIM_NON_COMPLIANT,
                "Request line: non-compliant delimiter between method and URI"
            );
        }

        if remaining.is_empty() {
            // Short-form HTTP/0.9 request, method only.
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.is_protocol_0_9 = true;
            tx.request_protocol_number = Protocol::V0_9;
            if method_number == Method::Unknown {
                log_warn!(
                    logger,
                    REQUEST_LINE_UNKNOWN_METHOD,
                    "Request line: unknown method only"
                );
            }
            return Ok(());
        }

        // The URI ends at the first SP; when other white space is mixed
        // into it, retry with the permissive delimiter set.
        let (mut protocol, (mut uri, _)) = tuple::<_, _, nom::error::Error<&[u8]>, _>((
            take_while(|c: u8| c != 0x20),
            take_is_space,
        ))(remaining)?;
        if uri.len() == remaining.len() && uri.iter().any(|c| is_space(*c)) {
            log_warn!(
                logger,
                URI_DELIM_NON_COMPLIANT,
                "Request line: URI contains non-compliant delimiter"
            );
            if let Ok((protocol2, (uri2, _))) =
                tuple::<_, _, nom::error::Error<&[u8]>, _>((take_not_is_space, take_is_space))(remaining)
            {
                uri = uri2;
                protocol = protocol2;
            }
        }
        {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.request_uri = Some(Bstr::from(uri));
        }

        if protocol.is_empty() {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.is_protocol_0_9 = true;
            tx.request_protocol_number = Protocol::V0_9;
            if method_number == Method::Unknown {
                log_warn!(
                    logger,
                    REQUEST_LINE_UNKNOWN_METHOD_NO_PROTOCOL,
                    "Request line: unknown method and no protocol"
                );
            }
            return Ok(());
        }
        let protocol_number = parse_protocol(protocol, &logger);
        {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.request_protocol = Some(Bstr::from(protocol));
            tx.request_protocol_number = protocol_number;
        }
        if method_number == Method::Unknown && protocol_number == Protocol::Invalid {
            log_warn!(
                logger,
                REQUEST_LINE_UNKNOWN_METHOD_INVALID_PROTOCOL,
                "Request line: unknown method and invalid protocol"
            );
        }
        Ok(())
    }

    /// Parses and normalizes the request URI, then announces the request
    /// line.
    fn state_request_line(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        let decoder = self.cfg.decoder;
        let server_port = self.conn.server_port;

        {
            let tx = self.request_mut().ok_or(Status::Error)?;
            let uri_bytes = tx.request_uri.clone().unwrap_or_else(Bstr::new);

            if tx.request_method_number == Method::Connect {
                // Authority form: host with an optional port.
                let (hostname, port, valid) = parse_hostport(uri_bytes.as_slice());
                if !valid {
                    tx.flags.set(Flags::HOSTU_INVALID);
                    log_warn!(
                        logger,
                        URI_HOST_INVALID,
                        "Request authority is invalid"
                    );
                }
                let mut uri = Uri::default();
                uri.hostname = Some(hostname);
                if let Some((port_bytes, port_number)) = port {
                    if port_number.is_none() {
                        log_warn!(
                            logger,
                            INVALID_AUTHORITY_PORT,
                            "Invalid authority port"
                        );
                    }
                    uri.port = Some(port_bytes);
                    uri.port_number = port_number;
                }
                tx.parsed_uri_raw = Some(uri.clone());
                tx.parsed_uri = Some(uri);
            } else {
                let raw = Uri::parse(uri_bytes.as_slice());
                let mut flags = tx.flags;
                let mut expected = tx.response_status_expected_number;
                let normalized = normalize_uri(&raw, &decoder, &logger, &mut flags, &mut expected);
                tx.flags = flags;
                tx.response_status_expected_number = expected;
                // The URI may only carry the port the connection already
                // uses; the TCP port wins disagreements.
                if let (Some(uri_port), Some(tcp_port)) = (normalized.port_number, server_port) {
                    if uri_port != tcp_port {
                        log_warn!(
                            logger,
                            REQUEST_SERVER_PORT_TCP_PORT_MISMATCH,
                            "Request server port number differs from the actual TCP port"
                        );
                    }
                }
                tx.parsed_uri_raw = Some(raw);
                tx.parsed_uri = Some(normalized);
            }
        }

        let uri_hook = self.cfg.hook_request_uri_normalize.clone();
        let line_hook = self.cfg.hook_request_line.clone();
        let tx = self.request_mut().ok_or(Status::Error)?;
        uri_hook.run_all(tx)?;
        line_hook.run_all(tx)?;
        self.req_state = State::Protocol;
        Ok(())
    }

    /// Decides whether header parsing applies. An HTTP/0.9 request has no
    /// headers, unless the following bytes clearly are header lines, in
    /// which case the missing protocol token was the real anomaly.
    pub(crate) fn req_protocol(&mut self, data: &[u8]) -> Result<()> {
        let is_0_9 = self.request().ok_or(Status::Error)?.is_protocol_0_9;
        if !is_0_9 {
            self.req_state = State::Headers;
            self.request_mut().ok_or(Status::Error)?.request_progress = RequestProgress::Headers;
            return Ok(());
        }
        let looks_like_headers =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_until::<_, &[u8], nom::error::Error<&[u8]>>(":"), char(':')))(data)
                .is_ok();
        if looks_like_headers {
            log_warn!(
                self.logger,
                REQUEST_LINE_NO_PROTOCOL,
                "Request line: missing protocol"
            );
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.is_protocol_0_9 = false;
            tx.request_progress = RequestProgress::Headers;
            self.req_state = State::Headers;
        } else {
            self.req_state = State::Finalize;
        }
        Ok(())
    }

    /// Parses request header (and trailer) lines until the empty line.
    pub(crate) fn req_headers(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        loop {
            if self.req_status == StreamState::Closed {
                // Stream ended mid-headers; take what we have.
                if let Some(header) = self.req_header.take() {
                    self.process_request_header(header.as_slice())?;
                }
                self.req_buf.clear();
                self.request_mut().ok_or(Status::Error)?.request_progress =
                    RequestProgress::Trailer;
                return self.state_request_headers();
            }
            match take_till_lf(rest) {
                Ok((remaining, line)) => {
                    self.req_pos += line.len();
                    if !self.req_buf.is_empty() {
                        self.check_req_buffer_limit(line.len())?;
                    }
                    let mut data = std::mem::take(&mut self.req_buf);
                    data.add(line);
                    self.request_mut().ok_or(Status::Error)?.request_message_len +=
                        data.len() as i64;
                    rest = remaining;

                    if is_line_terminator(data.as_slice()) {
                        // All headers seen.
                        if let Some(header) = self.req_header.take() {
                            self.process_request_header(header.as_slice())?;
                        }
                        return self.state_request_headers();
                    }

                    let chomped = chomp(data.as_slice());
                    if !is_line_folded(chomped) {
                        // A fresh header line; the previous one is final.
                        if let Some(header) = self.req_header.take() {
                            self.process_request_header(header.as_slice())?;
                        }
                        match rest.first() {
                            Some(byte) if !is_folding_char(*byte) => {
                                // The next line cannot fold into this one,
                                // so the header is complete already.
                                self.process_request_header(chomped)?;
                            }
                            _ => self.req_header = Some(Bstr::from(chomped)),
                        }
                    } else if self.req_header.is_none() {
                        // Folding marker with nothing to fold into.
                        let logger = self.logger.clone();
                        let tx = self.request_mut().ok_or(Status::Error)?;
                        log_warn_once!(
                            logger,
                            INVALID_REQUEST_FIELD_FOLDING,
                            "Invalid request field folding",
                            tx.flags,
                            Flags::INVALID_FOLDING
                        );
                        self.req_header = Some(Bstr::from(chomped));
                    } else if let Some(header) = &mut self.req_header {
                        header.add(chomped);
                        self.req_header_folded = true;
                    }
                }
                _ => return self.handle_req_absent_lf(rest),
            }
        }
    }

    /// Files one complete header line into the transaction, handling
    /// repetitions and raising field flags.
    fn process_request_header(&mut self, raw: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let folded = std::mem::take(&mut self.req_header_folded);
        let mut parsed = parse_header_line(raw);
        if folded {
            parsed.flags.set(Flags::FIELD_FOLDED);
        }
        if raw.contains(&0) {
            parsed.flags.set(Flags::FIELD_NUL_BYTE);
        }

        let tx = self.request_mut().ok_or(Status::Error)?;
        if parsed.flags.is_set(Flags::FIELD_UNPARSEABLE) {
            log_warn_once!(
                logger,
                REQUEST_FIELD_MISSING_COLON,
                "Request field invalid: colon missing",
                tx.flags,
                Flags::FIELD_UNPARSEABLE
            );
        }
        if parsed.flags.is_set(Flags::FIELD_INVALID) {
            log_warn_once!(
                logger,
                REQUEST_HEADER_INVALID,
                "Request field invalid: not a token",
                tx.flags,
                Flags::FIELD_INVALID
            );
        }
        tx.flags
            .set(parsed.flags & (Flags::FIELD_FOLDED | Flags::FIELD_NUL_BYTE));

        let mut repeated = false;
        let mut update_reps = false;
        let reps = tx.request_header_repetitions;
        if let Some((_, existing)) = tx.request_headers.get_nocase_mut(parsed.name.as_slice()) {
            if !existing.flags.is_set(Flags::FIELD_REPEATED) {
                repeated = true;
            } else if reps < 64 {
                update_reps = true;
            } else {
                return Ok(());
            }
            existing.flags.set(Flags::FIELD_REPEATED);
            if parsed.name.eq_nocase("content-length") {
                // Repeated C-L is tolerated when the values agree.
                let existing_cl = parse_content_length(existing.value.as_slice(), None);
                let new_cl = parse_content_length(parsed.value.as_slice(), None);
                if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                    log_warn!(
                        logger,
                        DUPLICATE_CONTENT_LENGTH_FIELD_IN_REQUEST,
                        "Ambiguous request C-L value"
                    );
                }
            } else {
                existing.value.add(", ");
                existing.value.add(parsed.value.as_slice());
            }
            tx.flags.set(Flags::FIELD_REPEATED);
        } else {
            let mut key = parsed.name.clone();
            key.make_ascii_lowercase();
            tx.request_headers.add(
                key,
                Header::new_with_flags(parsed.name, parsed.value, parsed.flags),
            );
        }
        if update_reps {
            tx.request_header_repetitions = tx.request_header_repetitions.wrapping_add(1);
        }
        if repeated {
            log_warn!(logger, REQUEST_HEADER_REPETITION, "Repetition for header");
        }
        Ok(())
    }

    /// Runs once the request header block is complete: settles body
    /// framing, reconciles Host, parses credentials and wires content
    /// handlers, then announces the headers.
    fn state_request_headers(&mut self) -> Result<()> {
        let progress = self.request().ok_or(Status::Error)?.request_progress;
        if progress == RequestProgress::Trailer {
            let _ = self.req_receiver_finalize_clear();
            let hook = self.cfg.hook_request_trailer.clone();
            let tx = self.request_mut().ok_or(Status::Error)?;
            hook.run_all(tx)?;
            self.req_state = State::Finalize;
            return Ok(());
        }

        self.req_process_request_headers()?;
        let _ = self.req_receiver_finalize_clear();
        let hook = self.cfg.hook_request_headers.clone();
        let tx = self.request_mut().ok_or(Status::Error)?;
        hook.run_all(tx)?;
        self.req_state = State::ConnectCheck;
        Ok(())
    }

    fn req_process_request_headers(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        let server_port = self.conn.server_port;
        let parse_auth = self.cfg.parse_request_auth;
        let parse_mp = self.cfg.parse_multipart;
        let extract_files = self.cfg.extract_request_files;
        let multi_packet = self.req_chunk_count != self.req_chunk_request_index;

        let tx = self.request_mut().ok_or(Status::Error)?;
        if multi_packet {
            tx.flags.set(Flags::MULTI_PACKET_HEAD);
        }

        // Body framing: Transfer-Encoding wins over Content-Length.
        let te = tx
            .request_headers
            .get_nocase("transfer-encoding")
            .map(|(_, h)| h.value.clone());
        let cl = tx
            .request_headers
            .get_nocase("content-length")
            .map(|(_, h)| (h.value.clone(), h.flags));
        if let Some(te_value) = te {
            if te_value.index_of_nocase_nozero("chunked").is_none() {
                // Unrecognized coding; fall back to length rules.
                log_warn!(
                    logger,
                    INVALID_TRANSFER_ENCODING_VALUE_IN_REQUEST,
                    "Transfer-encoding has abnormal value"
                );
            } else {
                tx.request_transfer_coding = TransferCoding::Chunked;
                if cl.is_some() {
                    tx.flags.set(Flags::REQUEST_SMUGGLING);
                }
                if tx.request_protocol_number < Protocol::V1_1 {
                    tx.flags.set(Flags::INVALID_CHUNKING);
                    log_warn!(
                        logger,
                        CHUNKED_ON_OLD_PROTOCOL,
                        "Chunked transfer-encoding on HTTP/0.9 or HTTP/1.0"
                    );
                }
            }
        }
        if tx.request_transfer_coding == TransferCoding::Unknown {
            match cl {
                Some((cl_value, cl_flags)) => {
                    if cl_flags.is_set(Flags::FIELD_FOLDED) || cl_flags.is_set(Flags::FIELD_REPEATED)
                    {
                        tx.flags.set(Flags::REQUEST_SMUGGLING);
                    }
                    match parse_content_length(cl_value.as_slice(), Some(&logger)) {
                        Some(len) if len >= 0 => {
                            tx.request_content_length = len;
                            tx.request_transfer_coding = TransferCoding::Identity;
                        }
                        _ => {
                            log_error!(
                                logger,
                                INVALID_CONTENT_LENGTH_FIELD_IN_REQUEST,
                                "Invalid C-L field in request"
                            );
                            return Err(Status::Error);
                        }
                    }
                }
                None => tx.request_transfer_coding = TransferCoding::NoBody,
            }
        }

        // Host reconciliation.
        let host = tx
            .request_headers
            .get_nocase("host")
            .map(|(_, h)| h.value.clone());
        match host {
            None => {
                if tx.request_protocol_number >= Protocol::V1_1 {
                    tx.flags.set(Flags::HOST_MISSING);
                    log_warn!(
                        logger,
                        MISSING_HOST_HEADER,
                        "Host information in request headers required by HTTP/1.1"
                    );
                }
            }
            Some(value) => {
                let (hostname, port, valid) = parse_hostport(value.as_slice());
                if !valid {
                    tx.flags.set(Flags::HOSTH_INVALID);
                    log_warn!(
                        logger,
                        HEADER_HOST_INVALID,
                        "Hostname in Host header is invalid"
                    );
                }
                let port_number = port.and_then(|(_, number)| number);
                match tx.parsed_uri.as_ref().and_then(|uri| uri.hostname.clone()) {
                    Some(uri_hostname) => {
                        if !uri_hostname.eq_nocase(hostname.as_slice()) {
                            tx.flags.set(Flags::AMBIGUOUS_HOST);
                            log_warn!(
                                logger,
                                HOST_HEADER_AMBIGUOUS,
                                "Host information ambiguous"
                            );
                        }
                        tx.request_hostname = Some(uri_hostname);
                    }
                    None => tx.request_hostname = Some(hostname),
                }
                match (port_number, server_port) {
                    (Some(header_port), Some(tcp_port)) if header_port != tcp_port => {
                        log_warn!(
                            logger,
                            REQUEST_SERVER_PORT_TCP_PORT_MISMATCH,
                            "Host header port number differs from the actual TCP port"
                        );
                        tx.request_port_number = Some(tcp_port);
                    }
                    _ => tx.request_port_number = port_number.or(server_port),
                }
            }
        }

        if parse_auth {
            parse_authorization(tx);
        }
        if parse_mp && tx.request_transfer_coding != TransferCoding::NoBody {
            content_handlers::request_multipart_setup(tx);
        }
        let wants_file = extract_files
            && tx.request_method_number == Method::Put
            && tx.request_transfer_coding != TransferCoding::NoBody;
        if wants_file {
            self.put_file = Some(File::new(FileSource::Put, None));
        }
        Ok(())
    }

    /// Suspends request parsing on CONNECT until the response verdict is
    /// in.
    pub(crate) fn req_connect_check(&mut self) -> Result<()> {
        if self.request().ok_or(Status::Error)?.request_method_number == Method::Connect {
            self.request_mut().ok_or(Status::Error)?.request_progress = RequestProgress::Wait;
            self.req_state = State::ConnectWaitResponse;
            self.req_status = StreamState::Suspend;
            return Err(Status::Suspend);
        }
        self.req_state = State::BodyDetermine;
        Ok(())
    }

    /// Resumes after the CONNECT response: 2xx probes the tunnel, 407
    /// reads the auth continuation on this transaction, anything else
    /// moves on.
    pub(crate) fn req_connect_wait_response(&mut self) -> Result<()> {
        let tx = self.request().ok_or(Status::Error)?;
        if tx.response_progress <= ResponseProgress::Line {
            return Err(Status::Suspend);
        }
        if tx.response_status_number.in_range(200, 299) {
            self.req_state = State::ConnectProbeData;
        } else if tx.response_status_number.eq_num(407) {
            self.req_state = State::BodyDetermine;
        } else {
            self.req_state = State::Finalize;
        }
        Ok(())
    }

    /// Looks at the first tunnelled bytes: plain-text HTTP keeps the
    /// parser engaged, anything else turns both directions into a tunnel.
    pub(crate) fn req_connect_probe_data(&mut self, data: &[u8]) -> Result<()> {
        let line = match take_till_lf_null(data) {
            Ok((_, line)) => line,
            _ => return self.handle_req_absent_lf(data),
        };
        if !self.req_buf.is_empty() {
            self.check_req_buffer_limit(line.len())?;
        }
        let mut probe = self.req_buf.clone();
        probe.add(line);

        let parsed =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space))(probe.as_slice());
        if let Ok((_, (_, method))) = parsed {
            if Method::from(method) == Method::Unknown {
                self.req_status = StreamState::Tunnel;
                self.res_status = StreamState::Tunnel;
            } else {
                return self.state_request_complete();
            }
        }
        Ok(())
    }

    /// Chooses the body state from the transfer coding settled earlier.
    pub(crate) fn req_body_determine(&mut self) -> Result<()> {
        let coding = self.request().ok_or(Status::Error)?.request_transfer_coding;
        match coding {
            TransferCoding::Chunked => {
                self.req_state = State::BodyChunkedLength;
                self.request_mut().ok_or(Status::Error)?.request_progress = RequestProgress::Body;
            }
            TransferCoding::Identity => {
                self.req_content_length =
                    self.request().ok_or(Status::Error)?.request_content_length;
                self.req_body_data_left = self.req_content_length;
                if self.req_content_length != 0 {
                    self.req_state = State::BodyIdentity;
                    self.request_mut().ok_or(Status::Error)?.request_progress =
                        RequestProgress::Body;
                } else {
                    self.req_state = State::Finalize;
                }
            }
            TransferCoding::NoBody => self.req_state = State::Finalize,
            _ => return Err(Status::Error),
        }
        Ok(())
    }

    /// Extracts one chunk length line.
    pub(crate) fn req_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.req_pos += line.len();
                if !self.req_buf.is_empty() {
                    self.check_req_buffer_limit(line.len())?;
                }
                let mut full = std::mem::take(&mut self.req_buf);
                full.add(line);
                self.request_mut().ok_or(Status::Error)?.request_message_len +=
                    full.len() as i64;

                match parse_chunked_length(full.as_slice()) {
                    Ok(Some(len)) if len > 0 => {
                        self.req_chunked_length = len;
                        self.req_state = State::BodyChunkedData;
                    }
                    Ok(Some(0)) => {
                        // Last chunk; trailer headers follow.
                        self.req_state = State::Headers;
                        self.request_mut().ok_or(Status::Error)?.request_progress =
                            RequestProgress::Trailer;
                    }
                    _ => {
                        log_error!(
                            self.logger,
                            INVALID_REQUEST_CHUNK_LEN,
                            "Request chunk encoding: invalid chunk length"
                        );
                        return Err(Status::Error);
                    }
                }
                Ok(())
            }
            _ => self.handle_req_absent_lf(data),
        }
    }

    /// Forwards chunk payload bytes to the body hooks.
    pub(crate) fn req_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = min(data.len(), self.req_chunked_length as usize);
        if bytes_to_consume == 0 {
            return Err(Status::NeedMore);
        }
        self.req_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.req_pos += bytes_to_consume;
        self.request_mut().ok_or(Status::Error)?.request_message_len +=
            bytes_to_consume as i64;
        self.req_chunked_length -= bytes_to_consume as i64;
        if self.req_chunked_length == 0 {
            self.req_state = State::BodyChunkedDataEnd;
            return Ok(());
        }
        Err(Status::NeedMore)
    }

    /// Consumes the line ending that closes a chunk.
    pub(crate) fn req_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.req_pos += line.len();
                self.request_mut().ok_or(Status::Error)?.request_message_len +=
                    line.len() as i64;
                self.req_state = State::BodyChunkedLength;
                Ok(())
            }
            _ => {
                // Only CR and LF belong here; skip without buffering.
                self.req_pos = self.req_curr_data.len();
                self.request_mut().ok_or(Status::Error)?.request_message_len +=
                    data.len() as i64;
                Err(Status::NeedBuffer)
            }
        }
    }

    /// Consumes a Content-Length framed body.
    pub(crate) fn req_body_identity(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = min(data.len(), self.req_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(Status::NeedMore);
        }
        self.req_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.req_pos += bytes_to_consume;
        self.request_mut().ok_or(Status::Error)?.request_message_len +=
            bytes_to_consume as i64;
        self.req_body_data_left -= bytes_to_consume as i64;
        if self.req_body_data_left == 0 {
            self.req_state = State::Finalize;
            return Ok(());
        }
        Err(Status::NeedMore)
    }

    /// Delivers request body bytes: entity accounting, multipart
    /// detection, transaction and configuration hooks, and the PUT file
    /// channel. `None` closes the body.
    pub(crate) fn req_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
        }
        let cfg_hook = self.cfg.hook_request_body_data.clone();
        let file_hook = self.cfg.hook_request_file_data.clone();
        let is_last = data.is_none();
        let tx = self.request_mut().ok_or(Status::Error)?;
        let tx_hook = tx.hook_request_body_data.clone();
        if let Some(d) = data {
            tx.request_entity_len += d.len() as i64;
        }
        content_handlers::request_multipart_data(tx, data);
        {
            let mut tx_data = Data::new(tx, data, is_last);
            tx_hook.run_all(&mut tx_data)?;
            cfg_hook.run_all(&mut tx_data)?;
        }
        if let Some(file) = &mut self.put_file {
            file.handle_file_data(&file_hook, data)?;
        }
        Ok(())
    }

    /// Wraps the request up and returns the machine to idle.
    pub(crate) fn req_finalize(&mut self) -> Result<()> {
        self.state_request_complete()
    }

    pub(crate) fn state_request_complete(&mut self) -> Result<()> {
        let had_body = {
            let tx = self.request().ok_or(Status::Error)?;
            matches!(
                tx.request_transfer_coding,
                TransferCoding::Chunked | TransferCoding::Identity
            ) && tx.request_entity_len > 0
        };
        if had_body {
            self.req_process_body_data(None)?;
        }
        self.put_file = None;

        let hook = self.cfg.hook_request_complete.clone();
        let is_0_9;
        {
            let tx = self.request_mut().ok_or(Status::Error)?;
            tx.request_progress = RequestProgress::Complete;
            is_0_9 = tx.is_protocol_0_9;
            hook.run_all(tx)?;
        }
        if let Some(index) = self.req_tx {
            self.finalize_transaction(index)?;
        }

        // Per-request scratch goes away; the transaction stays on the
        // connection list.
        self.req_content_length = -1;
        self.req_body_data_left = -1;
        self.req_chunked_length = 0;
        self.req_header = None;
        self.req_tx = None;
        self.req_state = if is_0_9 {
            State::IgnoreDataAfterHttp09
        } else {
            State::Idle
        };
        Ok(())
    }

    /// Swallows bytes after a completed HTTP/0.9 exchange, noting that
    /// they existed.
    pub(crate) fn req_ignore_data_after_http_0_9(&mut self) -> Result<()> {
        if self.req_pos < self.req_curr_data.len() {
            self.conn.flags.set(ConnectionFlags::HTTP_0_9_EXTRA);
        }
        self.req_pos = self.req_curr_data.len();
        Err(Status::NeedMore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_numbers() {
        assert_eq!(Method::from(&b"GET"[..]), Method::Get);
        assert_eq!(Method::from(&b"CONNECT"[..]), Method::Connect);
        assert_eq!(Method::from(&b"VERSION-CONTROL"[..]), Method::VersionControl);
        assert_eq!(Method::from(&b"get"[..]), Method::Unknown);
        assert_eq!(Method::from(&b""[..]), Method::Unknown);
    }
}
