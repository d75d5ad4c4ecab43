use crate::{
    bstr::Bstr,
    connection_parser::{ConnectionParser, State, StreamState},
    decompressors::{CallbackFn, ContentEncoding, Decompressor},
    error::Result,
    hook::DataHook,
    parsers::{
        parse_chunked_length, parse_content_length, parse_content_type, parse_header_line,
        parse_protocol, parse_status,
    },
    request::Method,
    transaction::{Data, Header, Protocol, ResponseProgress, ResponseStatus, TransferCoding},
    util::{
        chomp, is_folding_char, is_line_folded, is_line_terminator, is_space,
        is_valid_chunked_length_data, take_is_space, take_not_is_space, take_till_eol,
        take_till_lf, Eol, FlagOperations, Flags,
    },
    Status,
};
use nom::sequence::tuple;
use std::cmp::min;
use std::rc::Rc;

/// Leading bytes that do not look like `HTTP/...` demote the entire
/// response stream to a close-delimited body.
pub(crate) fn treat_response_line_as_body(data: &[u8]) -> bool {
    // Skip padding some servers emit before the status line.
    let start = data
        .iter()
        .position(|c| *c != 0 && !is_space(*c))
        .unwrap_or(data.len());
    let rest = &data[start..];
    rest.len() < 4 || !rest[..4].eq_ignore_ascii_case(b"HTTP")
}

impl ConnectionParser {
    /// Sends the bytes accumulated since the receiver offset to the
    /// active data-receiver hook.
    pub(crate) fn res_receiver_send_data(&mut self, is_last: bool) -> Result<()> {
        let hook = match &self.res_data_receiver_hook {
            Some(hook) => hook.clone(),
            None => return Ok(()),
        };
        let chunk = Rc::clone(&self.res_curr_data);
        let end = min(self.res_pos, chunk.len());
        let start = min(self.res_receiver_offset, end);
        let slice = &chunk[start..end];
        if !slice.is_empty() || is_last {
            let index = self.res_tx;
            if let Some(tx) = self.conn.tx_mut(index) {
                let mut data = Data::new(tx, Some(slice), is_last);
                hook.run_all(&mut data)?;
            }
        }
        self.res_receiver_offset = end;
        Ok(())
    }

    fn res_receiver_set(&mut self, hook: Option<DataHook>) -> Result<()> {
        let _ = self.res_receiver_finalize_clear();
        self.res_data_receiver_hook = hook;
        self.res_receiver_offset = self.res_pos;
        Ok(())
    }

    pub(crate) fn res_receiver_finalize_clear(&mut self) -> Result<()> {
        if self.res_data_receiver_hook.is_none() {
            return Ok(());
        }
        let rc = self.res_receiver_send_data(true);
        self.res_data_receiver_hook = None;
        rc
    }

    pub(crate) fn res_handle_state_change(&mut self) -> Result<()> {
        if self.res_state_previous == self.res_state {
            return Ok(());
        }
        if self.res_state == State::Headers {
            match self.response().map(|tx| tx.response_progress) {
                Some(ResponseProgress::Headers) => {
                    let hook = self.cfg.hook_response_header_data.clone();
                    self.res_receiver_set(Some(hook))
                }
                Some(ResponseProgress::Trailer) => {
                    let hook = self.cfg.hook_response_trailer_data.clone();
                    self.res_receiver_set(Some(hook))
                }
                _ => Ok(()),
            }?;
        }
        self.res_state_previous = self.res_state;
        Ok(())
    }

    fn check_res_buffer_limit(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut newlen = self.res_buf.len().wrapping_add(len);
        if let Some(header) = &self.res_header {
            newlen = newlen.wrapping_add(header.len());
        }
        if newlen > self.cfg.field_limit {
            log_error!(
                self.logger,
                RESPONSE_FIELD_TOO_LONG,
                format!(
                    "Response buffer over the limit: size {} limit {}.",
                    newlen, self.cfg.field_limit
                )
            );
            return Err(Status::Error);
        }
        Ok(())
    }

    fn handle_res_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.res_pos = self.res_curr_data.len();
        self.check_res_buffer_limit(data.len())?;
        self.res_buf.add(data);
        Err(Status::NeedBuffer)
    }

    /// Pairs the next response with the request at the head of the
    /// unmatched queue.
    pub(crate) fn res_idle(&mut self) -> Result<()> {
        if self.res_pos >= self.res_curr_data.len() {
            return Err(Status::NeedMore);
        }
        if self.res_tx >= self.conn.tx_size() {
            log_error!(
                self.logger,
                UNABLE_TO_MATCH_RESPONSE_TO_REQUEST,
                "Unable to match response to request"
            );
            return Err(Status::Error);
        }
        let hook = self.cfg.hook_response_start.clone();
        let tx = self.response_mut().ok_or(Status::Error)?;
        tx.response_progress = ResponseProgress::Line;
        hook.run_all(tx)?;
        self.res_state = State::Line;
        Ok(())
    }

    /// Reads the response line; an HTTP/0.9 exchange has none, and a line
    /// that does not resemble HTTP demotes the stream to body bytes.
    pub(crate) fn res_line(&mut self, data: &[u8]) -> Result<()> {
        if self.response().ok_or(Status::Error)?.is_protocol_0_9 {
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_protocol_number = Protocol::V0_9;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.response_progress = ResponseProgress::Body;
            self.res_body_data_left = -1;
            self.res_state = State::BodyIdentityStreamClose;
            return Ok(());
        }
        match take_till_eol(data) {
            Ok((_, (line, eol))) => {
                self.note_res_eol(eol);
                self.res_pos += line.len();
                self.res_line_complete(line)
            }
            _ => {
                if self.res_status == StreamState::Closed {
                    self.res_pos = self.res_curr_data.len();
                    self.res_line_complete(data)
                } else {
                    self.handle_res_absent_lf(data)
                }
            }
        }
    }

    /// Warns about exotic and mixed line terminators, response side only.
    fn note_res_eol(&mut self, eol: Eol) {
        let mixing = self
            .res_prev_eol
            .map(|previous| previous != eol)
            .unwrap_or(false);
        if eol.is_deformed() || mixing {
            log_warn!(
                self.logger,
                DEFORMED_EOL,
                "Weird response line terminator"
            );
        }
        self.res_prev_eol = Some(eol);
    }

    fn res_line_complete(&mut self, line: &[u8]) -> Result<()> {
        if !self.res_buf.is_empty() {
            self.check_res_buffer_limit(line.len())?;
        }
        let mut data = std::mem::take(&mut self.res_buf);
        data.add(line);
        if data.is_empty() {
            return Err(Status::NeedMore);
        }

        let chomped_len = chomp(data.as_slice()).len();
        if treat_response_line_as_body(data.as_slice()) {
            log_warn!(
                self.logger,
                RESPONSE_LINE_NOT_HTTP,
                "Response line does not resemble HTTP; treating stream as a body"
            );
            let buffered_len = data.len() - line.len();
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.response_progress = ResponseProgress::Body;
            self.res_body_data_left = -1;
            self.res_state = State::BodyIdentityStreamClose;
            if buffered_len > 0 {
                let buffered = Bstr::from(&data.as_slice()[..buffered_len]);
                self.response_mut().ok_or(Status::Error)?.response_message_len +=
                    buffered.len() as i64;
                self.res_process_body_data(Some(buffered.as_slice()))?;
            }
            // The rest of the line re-enters as body data.
            self.res_pos -= line.len();
            return Ok(());
        }

        self.response_mut().ok_or(Status::Error)?.response_message_len += data.len() as i64;
        let chomped = Bstr::from(&data.as_slice()[..chomped_len]);
        self.response_mut().ok_or(Status::Error)?.response_line = Some(chomped.clone());
        self.parse_response_line(chomped.as_slice())?;
        self.state_response_line()
    }

    /// Splits the response line into protocol, status and reason phrase.
    fn parse_response_line(&mut self, line: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let (rest, (_, protocol)) =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space))(line)?;
        {
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_protocol = Some(Bstr::from(protocol));
            tx.response_status = None;
            tx.response_status_number = ResponseStatus::Unknown;
            tx.response_message = None;
        }
        let protocol_number = parse_protocol(protocol, &logger);
        if protocol_number == Protocol::Invalid {
            log_warn!(logger, RESPONSE_INVALID_PROTOCOL, "Invalid response line: invalid protocol");
            self.response_mut().ok_or(Status::Error)?.flags.set(Flags::STATUS_LINE_INVALID);
        }
        self.response_mut().ok_or(Status::Error)?.response_protocol_number = protocol_number;

        let (rest, (_, status)) =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space))(rest)?;
        let status_number = parse_status(status);
        {
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_status = Some(Bstr::from(status));
            tx.response_status_number = status_number;
            if status_number == ResponseStatus::Invalid {
                tx.flags.set(Flags::STATUS_LINE_INVALID);
            }
        }
        if status_number == ResponseStatus::Invalid {
            log_warn!(logger, RESPONSE_INVALID_STATUS, "Invalid response line: invalid response status");
        }

        let (_, (_, message)) =
            tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, nom::combinator::rest))(rest)?;
        let tx = self.response_mut().ok_or(Status::Error)?;
        tx.response_message = Some(Bstr::from(chomp(message)));
        Ok(())
    }

    fn state_response_line(&mut self) -> Result<()> {
        let hook = self.cfg.hook_response_line.clone();
        let tx = self.response_mut().ok_or(Status::Error)?;
        hook.run_all(tx)?;
        let tx = self.response_mut().ok_or(Status::Error)?;
        tx.response_progress = ResponseProgress::Headers;
        self.res_state = State::Headers;
        Ok(())
    }

    /// Parses response header (and trailer) lines until the empty line,
    /// tolerating the exotic terminators note_res_eol describes.
    pub(crate) fn res_headers(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        loop {
            if self.res_status == StreamState::Closed {
                if let Some(header) = self.res_header.take() {
                    self.process_response_header(header.as_slice())?;
                }
                self.res_buf.clear();
                self.response_mut().ok_or(Status::Error)?.response_progress =
                    ResponseProgress::Trailer;
                return self.state_response_headers();
            }
            match take_till_eol(rest) {
                Ok((remaining, (line, eol))) => {
                    self.note_res_eol(eol);
                    self.res_pos += line.len();
                    if !self.res_buf.is_empty() {
                        self.check_res_buffer_limit(line.len())?;
                    }
                    let mut data = std::mem::take(&mut self.res_buf);
                    data.add(line);
                    self.response_mut().ok_or(Status::Error)?.response_message_len +=
                        data.len() as i64;
                    rest = remaining;

                    if is_line_terminator(data.as_slice()) || data.as_slice() == b"\r\r\n" {
                        if let Some(header) = self.res_header.take() {
                            self.process_response_header(header.as_slice())?;
                        }
                        return self.state_response_headers();
                    }

                    let chomped = chomp(data.as_slice());
                    if !is_line_folded(chomped) {
                        if let Some(header) = self.res_header.take() {
                            self.process_response_header(header.as_slice())?;
                        }
                        match rest.first() {
                            Some(byte) if !is_folding_char(*byte) => {
                                self.process_response_header(chomped)?;
                            }
                            _ => self.res_header = Some(Bstr::from(chomped)),
                        }
                    } else if self.res_header.is_none() {
                        let logger = self.logger.clone();
                        let tx = self.response_mut().ok_or(Status::Error)?;
                        log_warn_once!(
                            logger,
                            INVALID_RESPONSE_FIELD_FOLDING,
                            "Invalid response field folding",
                            tx.flags,
                            Flags::INVALID_FOLDING
                        );
                        self.res_header = Some(Bstr::from(chomped));
                    } else if let Some(header) = &mut self.res_header {
                        header.add(chomped);
                        self.res_header_folded = true;
                    }
                }
                _ => return self.handle_res_absent_lf(rest),
            }
        }
    }

    fn process_response_header(&mut self, raw: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let folded = std::mem::take(&mut self.res_header_folded);
        let mut parsed = parse_header_line(raw);
        if folded {
            parsed.flags.set(Flags::FIELD_FOLDED);
        }
        if raw.contains(&0) {
            parsed.flags.set(Flags::FIELD_NUL_BYTE);
        }

        let tx = self.response_mut().ok_or(Status::Error)?;
        if parsed.flags.is_set(Flags::FIELD_UNPARSEABLE) {
            log_warn_once!(
                logger,
                RESPONSE_FIELD_MISSING_COLON,
                "Response field invalid: colon missing",
                tx.flags,
                Flags::FIELD_UNPARSEABLE
            );
        }
        if parsed.flags.is_set(Flags::FIELD_INVALID) {
            log_warn_once!(
                logger,
                RESPONSE_HEADER_INVALID,
                "Response field invalid: not a token",
                tx.flags,
                Flags::FIELD_INVALID
            );
        }
        tx.flags
            .set(parsed.flags & (Flags::FIELD_FOLDED | Flags::FIELD_NUL_BYTE));

        let mut repeated = false;
        let mut update_reps = false;
        let reps = tx.response_header_repetitions;
        if let Some((_, existing)) = tx.response_headers.get_nocase_mut(parsed.name.as_slice()) {
            if !existing.flags.is_set(Flags::FIELD_REPEATED) {
                repeated = true;
            } else if reps < 64 {
                update_reps = true;
            } else {
                return Ok(());
            }
            existing.flags.set(Flags::FIELD_REPEATED);
            if parsed.name.eq_nocase("content-length") {
                let existing_cl = parse_content_length(existing.value.as_slice(), None);
                let new_cl = parse_content_length(parsed.value.as_slice(), None);
                if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                    log_warn!(
                        logger,
                        DUPLICATE_CONTENT_LENGTH_FIELD_IN_RESPONSE,
                        "Ambiguous response C-L value"
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
            tx.response_headers.add(
                key,
                Header::new_with_flags(parsed.name, parsed.value, parsed.flags),
            );
        }
        if update_reps {
            tx.response_header_repetitions = tx.response_header_repetitions.wrapping_add(1);
        }
        if repeated {
            log_warn!(logger, RESPONSE_HEADER_REPETITION, "Repetition for header");
        }
        Ok(())
    }

    /// Ends the header block: the trailer wraps the transaction up, a
    /// first header block moves on to body determination.
    fn state_response_headers(&mut self) -> Result<()> {
        let progress = self.response().ok_or(Status::Error)?.response_progress;
        if progress == ResponseProgress::Trailer {
            let _ = self.res_receiver_finalize_clear();
            let hook = self.cfg.hook_response_trailer.clone();
            let tx = self.response_mut().ok_or(Status::Error)?;
            hook.run_all(tx)?;
            self.res_state = State::Finalize;
            return Ok(());
        }
        self.res_state = State::BodyDetermine;
        Ok(())
    }

    /// Sets up decompression and announces the headers. Runs once the
    /// body framing decision is in.
    fn res_announce_headers(&mut self) -> Result<()> {
        self.res_setup_decompression()?;
        let _ = self.res_receiver_finalize_clear();
        let hook = self.cfg.hook_response_headers.clone();
        let tx = self.response_mut().ok_or(Status::Error)?;
        hook.run_all(tx)?;
        Ok(())
    }

    /// Determines the presence and framing of the response body,
    /// including the CONNECT, 101, 100-continue and no-body specials.
    pub(crate) fn res_body_determine(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        let (method, status) = {
            let tx = self.response().ok_or(Status::Error)?;
            (tx.request_method_number, tx.response_status_number)
        };

        // A CONNECT verdict steers both directions.
        if method == Method::Connect {
            if status.in_range(200, 299) {
                // Tunnel established: wrap this transaction up and let
                // the request side probe the tunnelled bytes.
                self.res_state = State::Finalize;
                return self.res_announce_headers();
            } else if status.eq_num(407) {
                // Proxy authentication: the request side continues on
                // this transaction.
                if self.req_status != StreamState::Error {
                    self.req_status = StreamState::NeedMore;
                }
            } else {
                // Failed CONNECT: the request side moves on, and this
                // direction must pause at the end of the transaction.
                if self.req_status != StreamState::Error {
                    self.req_status = StreamState::NeedMore;
                }
                self.res_data_other_at_tx_end = true;
            }
        }

        let te = self
            .response()
            .ok_or(Status::Error)?
            .response_headers
            .get_nocase("transfer-encoding")
            .map(|(_, h)| h.value.clone());
        let cl = self
            .response()
            .ok_or(Status::Error)?
            .response_headers
            .get_nocase("content-length")
            .map(|(_, h)| (h.value.clone(), h.flags));
        let ct = self
            .response()
            .ok_or(Status::Error)?
            .response_headers
            .get_nocase("content-type")
            .map(|(_, h)| h.value.clone());

        // 101 Switching Protocols without body indication is a tunnel.
        if status.eq_num(101) {
            if te.is_none() && cl.is_none() {
                self.res_state = State::Finalize;
                if self.req_status != StreamState::Error {
                    self.req_status = StreamState::Tunnel;
                }
                self.res_status = StreamState::Tunnel;
                return self.res_announce_headers();
            }
            log_warn!(
                logger,
                SWITCHING_PROTO_WITH_BODY,
                "Switching Protocols with Content-Length or Transfer-Encoding"
            );
        }

        // An interim 100 Continue is discarded and the real response line
        // is expected next; at most once per transaction.
        if status.eq_num(100) && te.is_none() {
            let has_body_cl = cl
                .as_ref()
                .map(|(value, _)| parse_content_length(value.as_slice(), None).unwrap_or(0) > 0)
                .unwrap_or(false);
            if !has_body_cl {
                let tx = self.response_mut().ok_or(Status::Error)?;
                if tx.seen_100continue != 0 {
                    log_error!(logger, CONTINUE_ALREADY_SEEN, "Already seen 100-Continue");
                    return Err(Status::Error);
                }
                tx.seen_100continue += 1;
                tx.response_headers.clear();
                tx.response_progress = ResponseProgress::Line;
                self.res_state = State::Line;
                return Ok(());
            }
        }

        // A 4xx while the request body is still fully outstanding, with
        // Expect: 100-continue, means the client will not send the body.
        if status.in_range(400, 499)
            && self.req_content_length > 0
            && self.req_body_data_left == self.req_content_length
        {
            let expects = self
                .response()
                .ok_or(Status::Error)?
                .request_headers
                .get_nocase("expect")
                .map(|(_, h)| h.value.eq_nocase("100-continue"))
                .unwrap_or(false);
            if expects {
                self.req_state = State::Finalize;
            }
        }

        // Responses that never carry a body.
        if method == Method::Head {
            self.response_mut().ok_or(Status::Error)?.response_transfer_coding =
                TransferCoding::NoBody;
            self.res_state = State::Finalize;
        } else if status.in_range(100, 199) || status.eq_num(204) || status.eq_num(304) {
            if te.is_none() && cl.is_none() {
                self.response_mut().ok_or(Status::Error)?.response_transfer_coding =
                    TransferCoding::NoBody;
                self.res_state = State::Finalize;
            } else {
                log_warn!(logger, RESPONSE_BODY_UNEXPECTED, "Unexpected response body");
            }
        }

        if self.res_state != State::Finalize {
            if let Some(ct_value) = &ct {
                self.response_mut().ok_or(Status::Error)?.response_content_type =
                    parse_content_type(ct_value.as_slice());
            }

            // Transfer-Encoding wins; a chunked token anywhere counts.
            let mut settled = false;
            if let Some(te_value) = &te {
                if te_value.index_of_nocase_nozero("chunked").is_some() {
                    if !te_value.eq_nocase("chunked") {
                        log_warn!(
                            logger,
                            RESPONSE_ABNORMAL_TRANSFER_ENCODING,
                            "Transfer-encoding has abnormal chunked value"
                        );
                    }
                    let tx = self.response_mut().ok_or(Status::Error)?;
                    // Chunked is HTTP/1.1 only, but browsers accept it
                    // from earlier protocols as well.
                    if tx.response_protocol_number < Protocol::V1_1 {
                        tx.flags.set(Flags::INVALID_CHUNKING);
                        log_warn!(
                            logger,
                            CHUNKED_ON_OLD_PROTOCOL,
                            "Chunked transfer-encoding on HTTP/0.9 or HTTP/1.0"
                        );
                    }
                    tx.response_transfer_coding = TransferCoding::Chunked;
                    if cl.is_some() {
                        tx.flags.set(Flags::REQUEST_SMUGGLING);
                    }
                    tx.response_progress = ResponseProgress::Body;
                    self.res_state = State::BodyChunkedLength;
                    settled = true;
                } else {
                    log_warn!(
                        logger,
                        INVALID_TRANSFER_ENCODING_VALUE_IN_RESPONSE,
                        "Transfer-encoding has abnormal value"
                    );
                }
            }

            if !settled {
                match cl {
                    Some((cl_value, cl_flags)) => {
                        let tx = self.response_mut().ok_or(Status::Error)?;
                        tx.response_transfer_coding = TransferCoding::Identity;
                        if cl_flags.is_set(Flags::FIELD_REPEATED)
                            || cl_flags.is_set(Flags::FIELD_FOLDED)
                        {
                            tx.flags.set(Flags::REQUEST_SMUGGLING);
                        }
                        match parse_content_length(cl_value.as_slice(), Some(&logger)) {
                            Some(len) if len >= 0 => {
                                let tx = self.response_mut().ok_or(Status::Error)?;
                                tx.response_content_length = len;
                                self.res_content_length = len;
                                self.res_body_data_left = len;
                                if len != 0 {
                                    self.res_state = State::BodyIdentityClKnown;
                                    self.response_mut().ok_or(Status::Error)?.response_progress =
                                        ResponseProgress::Body;
                                } else {
                                    self.res_state = State::Finalize;
                                }
                            }
                            _ => {
                                log_error!(
                                    logger,
                                    INVALID_CONTENT_LENGTH_FIELD_IN_RESPONSE,
                                    "Invalid C-L field in response"
                                );
                                return Err(Status::Error);
                            }
                        }
                    }
                    None => {
                        // Delimited by the end of the connection.
                        if let Some(ct_value) = &ct {
                            if ct_value.index_of_nocase("multipart/byteranges").is_some() {
                                log_error!(
                                    logger,
                                    RESPONSE_MULTIPART_BYTERANGES,
                                    "C-T multipart/byteranges in responses not supported"
                                );
                                return Err(Status::Error);
                            }
                        }
                        let tx = self.response_mut().ok_or(Status::Error)?;
                        tx.response_transfer_coding = TransferCoding::Identity;
                        tx.response_progress = ResponseProgress::Body;
                        self.res_body_data_left = -1;
                        self.res_state = State::BodyIdentityStreamClose;
                    }
                }
            }
        }

        self.res_announce_headers()
    }

    /// Builds the decompressor chain from the Content-Encoding tokens.
    fn res_setup_decompression(&mut self) -> Result<()> {
        if !self.cfg.response_decompression {
            return Ok(());
        }
        let has_body = matches!(
            self.response().ok_or(Status::Error)?.response_transfer_coding,
            TransferCoding::Identity | TransferCoding::Chunked
        );
        if !has_body {
            return Ok(());
        }
        let ce = match self
            .response()
            .ok_or(Status::Error)?
            .response_headers
            .get_nocase("content-encoding")
            .map(|(_, h)| h.value.clone())
        {
            Some(ce) => ce,
            None => return Ok(()),
        };

        let logger = self.logger.clone();
        let mut encodings: Vec<ContentEncoding> = Vec::new();
        for token in ce.as_slice().split(|c| *c == b',') {
            let token: Vec<u8> = token
                .iter()
                .filter(|c| !is_space(**c))
                .map(|c| c.to_ascii_lowercase())
                .collect();
            match token.as_slice() {
                b"" | b"identity" | b"none" => {}
                b"gzip" | b"x-gzip" => encodings.push(ContentEncoding::Gzip),
                b"deflate" | b"x-deflate" => encodings.push(ContentEncoding::Deflate),
                b"lzma" => encodings.push(ContentEncoding::Lzma),
                _ => {
                    log_warn!(
                        logger,
                        ABNORMAL_CE_HEADER,
                        "C-E header has an unrecognized token"
                    );
                    // An unknown stage poisons the chain; pass through.
                    encodings.clear();
                    break;
                }
            }
        }
        let layer_limit = self.cfg.compression.get_layer_limit();
        if encodings.len() > layer_limit {
            log_warn!(
                logger,
                TOO_MANY_ENCODING_LAYERS,
                "Too many response content encoding layers"
            );
            encodings.truncate(layer_limit);
        }
        let first = match encodings.first() {
            Some(first) => *first,
            None => return Ok(()),
        };
        self.response_mut().ok_or(Status::Error)?.response_content_encoding = first;

        let sink = Rc::clone(&self.res_decompress_sink);
        let callback: CallbackFn = Box::new(move |data: Option<&[u8]>| {
            if let Some(data) = data {
                sink.borrow_mut().push(data.to_vec());
                Ok(data.len())
            } else {
                Ok(0)
            }
        });
        let mut decompressor =
            Decompressor::new_with_callback(first, callback, self.cfg.compression)?;
        for encoding in &encodings[1..] {
            decompressor = decompressor.prepend(*encoding, self.cfg.compression)?;
        }
        self.res_decompressor = Some(decompressor);
        Ok(())
    }

    /// Extracts one chunk length line. Chunked responses lie often
    /// enough that a probe guards the parse: once the look-ahead says the
    /// bytes cannot be a chunk length, the body is re-read as
    /// close-delimited identity data.
    pub(crate) fn res_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.res_pos += line.len();
                if !self.res_buf.is_empty() {
                    self.check_res_buffer_limit(line.len())?;
                }
                let mut full = std::mem::take(&mut self.res_buf);
                full.add(line);

                match parse_chunked_length(full.as_slice()) {
                    Ok(Some(len)) if len > 0 => {
                        self.response_mut().ok_or(Status::Error)?.response_message_len +=
                            full.len() as i64;
                        self.res_chunked_length = len;
                        self.res_state = State::BodyChunkedData;
                        Ok(())
                    }
                    Ok(Some(_)) => {
                        self.response_mut().ok_or(Status::Error)?.response_message_len +=
                            full.len() as i64;
                        self.res_state = State::Headers;
                        self.response_mut().ok_or(Status::Error)?.response_progress =
                            ResponseProgress::Trailer;
                        Ok(())
                    }
                    Ok(None) => {
                        // An empty chunk length line; keep looking.
                        self.response_mut().ok_or(Status::Error)?.response_message_len +=
                            full.len() as i64;
                        Ok(())
                    }
                    Err(_) => {
                        log_error!(
                            self.logger,
                            INVALID_RESPONSE_CHUNK_LEN,
                            "Response chunk encoding: invalid chunk length"
                        );
                        self.res_demote_chunked_to_stream_close(full, line.len())
                    }
                }
            }
            _ => {
                // No line terminator yet. Peek at what has gathered so
                // far; obvious junk means this is not chunked at all.
                let mut probe = self.res_buf.clone();
                probe.add(data);
                if !is_valid_chunked_length_data(probe.as_slice()) {
                    log_error!(
                        self.logger,
                        INVALID_RESPONSE_CHUNK_LEN,
                        "Response chunk encoding: invalid chunk length"
                    );
                    let buffered = std::mem::take(&mut self.res_buf);
                    return self.res_demote_chunked_to_stream_close(buffered, 0);
                }
                self.handle_res_absent_lf(data)
            }
        }
    }

    /// Abandons chunked parsing: already-buffered bytes replay as body
    /// data and the unread remainder of the current chunk is rewound so
    /// the stream-close state consumes it.
    fn res_demote_chunked_to_stream_close(
        &mut self,
        consolidated: Bstr,
        consumed_from_chunk: usize,
    ) -> Result<()> {
        {
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.response_progress = ResponseProgress::Body;
        }
        self.res_body_data_left = -1;
        self.res_state = State::BodyIdentityStreamClose;

        let buffered_len = consolidated.len() - consumed_from_chunk;
        if buffered_len > 0 {
            let buffered = Bstr::from(&consolidated.as_slice()[..buffered_len]);
            self.response_mut().ok_or(Status::Error)?.response_message_len +=
                buffered.len() as i64;
            self.res_process_body_data(Some(buffered.as_slice()))?;
        }
        self.res_pos -= consumed_from_chunk;
        Ok(())
    }

    pub(crate) fn res_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = min(data.len(), self.res_chunked_length as usize);
        if bytes_to_consume == 0 {
            return Err(Status::NeedMore);
        }
        self.res_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.res_pos += bytes_to_consume;
        self.response_mut().ok_or(Status::Error)?.response_message_len +=
            bytes_to_consume as i64;
        self.res_chunked_length -= bytes_to_consume as i64;
        if self.res_chunked_length == 0 {
            self.res_state = State::BodyChunkedDataEnd;
            return Ok(());
        }
        Err(Status::NeedMore)
    }

    pub(crate) fn res_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.res_pos += line.len();
                self.response_mut().ok_or(Status::Error)?.response_message_len +=
                    line.len() as i64;
                self.res_state = State::BodyChunkedLength;
                Ok(())
            }
            _ => {
                self.res_pos = self.res_curr_data.len();
                self.response_mut().ok_or(Status::Error)?.response_message_len +=
                    data.len() as i64;
                Err(Status::NeedBuffer)
            }
        }
    }

    /// Consumes a Content-Length framed response body.
    pub(crate) fn res_body_identity_cl_known(&mut self, data: &[u8]) -> Result<()> {
        if self.res_status == StreamState::Closed {
            // Closed before the declared length arrived.
            self.res_state = State::Finalize;
            return Ok(());
        }
        let bytes_to_consume = min(data.len(), self.res_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(Status::NeedMore);
        }
        self.res_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.res_pos += bytes_to_consume;
        self.response_mut().ok_or(Status::Error)?.response_message_len +=
            bytes_to_consume as i64;
        self.res_body_data_left -= bytes_to_consume as i64;
        if self.res_body_data_left == 0 {
            self.res_state = State::Finalize;
            return Ok(());
        }
        Err(Status::NeedMore)
    }

    /// Consumes a body that runs until the connection closes.
    pub(crate) fn res_body_identity_stream_close(&mut self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            self.res_process_body_data(Some(data))?;
            self.res_pos = self.res_curr_data.len();
            self.response_mut().ok_or(Status::Error)?.response_message_len +=
                data.len() as i64;
        }
        if self.res_status == StreamState::Closed {
            self.res_state = State::Finalize;
            return Ok(());
        }
        Err(Status::NeedMore)
    }

    /// Delivers response body bytes through the decompressor chain (when
    /// one is active) into the body hooks. `None` closes the body.
    pub(crate) fn res_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
        }
        if self.res_decompressor.is_some() {
            let logger = self.logger.clone();
            let result = match (self.res_decompressor.as_mut(), data) {
                (Some(decompressor), Some(d)) => decompressor.decompress(d),
                (Some(decompressor), None) => decompressor.finish(),
                _ => Ok(()),
            };
            if result.is_err() {
                log_error!(
                    logger,
                    DECOMPRESSION_FAILED,
                    "Error decompressing response body; passing through raw bytes"
                );
                self.res_decompressor = None;
                if let Some(d) = data {
                    self.res_run_hook_body_data(Some(d), false)?;
                }
            }
            let chunks: Vec<Vec<u8>> = self.res_decompress_sink.borrow_mut().drain(..).collect();
            for chunk in &chunks {
                self.res_run_hook_body_data(Some(chunk.as_slice()), false)?;
                if let Some(decompressor) = &mut self.res_decompressor {
                    decompressor.callback_inc();
                }
            }
            if data.is_none() {
                self.res_run_hook_body_data(None, true)?;
                self.res_decompressor = None;
            }
            // Decompression bomb check: huge output from tiny input.
            let (entity_len, message_len) = {
                let tx = self.response().ok_or(Status::Error)?;
                (tx.response_entity_len, tx.response_message_len)
            };
            let bomb_limit = self.cfg.compression.get_bomb_limit() as i64;
            let bomb_ratio = self.cfg.compression.get_bomb_ratio() as i64;
            if entity_len > bomb_limit && entity_len > bomb_ratio * message_len.max(1) {
                log_error!(
                    self.logger,
                    COMPRESSION_BOMB,
                    format!(
                        "Compression bomb: decompressed {} bytes out of {}",
                        entity_len, message_len
                    )
                );
                return Err(Status::Error);
            }
            Ok(())
        } else {
            match data {
                Some(d) => self.res_run_hook_body_data(Some(d), false),
                None => self.res_run_hook_body_data(None, true),
            }
        }
    }

    fn res_run_hook_body_data(&mut self, data: Option<&[u8]>, is_last: bool) -> Result<()> {
        let cfg_hook = self.cfg.hook_response_body_data.clone();
        let tx = self.response_mut().ok_or(Status::Error)?;
        let tx_hook = tx.hook_response_body_data.clone();
        if let Some(d) = data {
            tx.response_entity_len += d.len() as i64;
        }
        let mut tx_data = Data::new(tx, data, is_last);
        tx_hook.run_all(&mut tx_data)?;
        cfg_hook.run_all(&mut tx_data)?;
        Ok(())
    }

    pub(crate) fn res_finalize(&mut self) -> Result<()> {
        self.state_response_complete()
    }

    fn state_response_complete(&mut self) -> Result<()> {
        let had_body = matches!(
            self.response().ok_or(Status::Error)?.response_progress,
            ResponseProgress::Body | ResponseProgress::Trailer
        ) || self.res_decompressor.is_some();
        if had_body {
            self.res_process_body_data(None)?;
        }

        let hook = self.cfg.hook_response_complete.clone();
        {
            let tx = self.response_mut().ok_or(Status::Error)?;
            tx.response_progress = ResponseProgress::Complete;
            hook.run_all(tx)?;
        }

        let index = self.res_tx;
        self.res_tx += 1;
        self.finalize_transaction(index)?;

        self.res_decompressor = None;
        self.res_content_length = -1;
        self.res_body_data_left = -1;
        self.res_chunked_length = 0;
        self.res_header = None;
        self.res_prev_eol = None;
        self.res_state = State::Idle;

        if self.res_data_other_at_tx_end {
            self.res_data_other_at_tx_end = false;
            return Err(Status::Suspend);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_line_heuristic() {
        assert!(!treat_response_line_as_body(b"HTTP/1.1 200 OK"));
        assert!(!treat_response_line_as_body(b"http/1.0 302 Moved"));
        assert!(!treat_response_line_as_body(b"    HTTP/1.1 404"));
        assert!(treat_response_line_as_body(b"<html>not http</html>"));
        assert!(treat_response_line_as_body(b"HTT"));
        assert!(treat_response_line_as_body(b""));
    }
}
