use rstest::rstest;
use tapir::connection_parser::StreamState;
use tapir::log::LogCode;
use tapir::request::Method;
use tapir::transaction::{Protocol, RequestProgress, ResponseProgress, TransferCoding};
use tapir::util::{ConnectionFlags, FlagOperations, Flags};
use tapir::Status;

mod common;
use common::{merge_body_events, observed_config, open_parser, Event};

#[test]
fn simple_get() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    let rc = connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    assert_eq!(rc, StreamState::NeedMore);

    assert_eq!(connp.conn.tx_size(), 1);
    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.request_method_number, Method::Get);
    assert_eq!(tx.request_protocol_number, Protocol::V1_1);
    assert_eq!(tx.request_transfer_coding, TransferCoding::NoBody);
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/x"[..])
    );
    assert_eq!(tx.request_hostname.as_deref(), Some(&b"a"[..]));
    assert_eq!(tx.flags, 0);
    assert_eq!(tx.request_progress, RequestProgress::Complete);

    assert_eq!(
        events.borrow().as_slice(),
        &[
            Event::TxStart,
            Event::RequestLine,
            Event::RequestHeaders,
            Event::RequestComplete,
        ]
    );
}

const CHUNKED_POST: &[u8] =
    b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";

#[test]
fn chunked_request() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    let rc = connp.req_data(None, CHUNKED_POST);
    assert_eq!(rc, StreamState::NeedMore);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
    assert_eq!(tx.request_entity_len, 5);
    assert!(!tx.flags.is_set(Flags::REQUEST_SMUGGLING));
    // Everything from the request line through the last trailer byte is
    // accounted for.
    assert_eq!(tx.request_message_len, CHUNKED_POST.len() as i64);

    let events = events.borrow();
    let body: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::RequestBody(_)))
        .collect();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0], &Event::RequestBody(b"hello".to_vec()));
}

#[test]
fn chunked_with_content_length_is_smuggling() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\nContent-Length: 0\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    );

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::REQUEST_SMUGGLING));
    // The body is still parsed as chunked.
    assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
    assert_eq!(tx.request_entity_len, 5);
}

#[rstest]
#[case::split_anywhere(7)]
#[case::split_in_headers(30)]
#[case::split_in_chunk_size(58)]
#[case::split_in_body(62)]
fn chunk_split_is_idempotent(#[case] split: usize) {
    let (cfg, whole_events) = observed_config();
    let mut connp = open_parser(cfg);
    connp.req_data(None, CHUNKED_POST);
    let expected = merge_body_events(&whole_events.borrow());

    let (cfg, split_events) = observed_config();
    let mut connp = open_parser(cfg);
    connp.req_data(None, &CHUNKED_POST[..split]);
    connp.req_data(None, &CHUNKED_POST[split..]);
    assert_eq!(merge_body_events(&split_events.borrow()), expected);
}

#[test]
fn every_split_point_parses_identically() {
    let (cfg, whole_events) = observed_config();
    let mut connp = open_parser(cfg);
    connp.req_data(None, CHUNKED_POST);
    let expected = merge_body_events(&whole_events.borrow());

    for split in 1..CHUNKED_POST.len() {
        let (cfg, events) = observed_config();
        let mut connp = open_parser(cfg);
        connp.req_data(None, &CHUNKED_POST[..split]);
        connp.req_data(None, &CHUNKED_POST[split..]);
        assert_eq!(
            merge_body_events(&events.borrow()),
            expected,
            "split at {}",
            split
        );
        let tx = connp.conn.tx(0).unwrap();
        assert_eq!(tx.request_entity_len, 5, "split at {}", split);
        assert_eq!(
            tx.request_message_len,
            CHUNKED_POST.len() as i64,
            "split at {}",
            split
        );
    }
}

#[test]
fn connect_establishes_tunnel() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    let rc = connp.req_data(None, b"CONNECT host:443 HTTP/1.1\r\nHost: host:443\r\n\r\n");
    // The whole chunk was consumed, so the caller is asked for more data
    // rather than told to switch directions.
    assert_eq!(rc, StreamState::NeedMore);

    let rc = connp.res_data(None, b"HTTP/1.1 200 OK\r\n\r\n");
    assert_eq!(rc, StreamState::NeedMore);

    // TLS-looking bytes in the tunnel: both directions stop parsing.
    let rc = connp.req_data(None, b"\x16\x03\x01\x00\xff");
    assert_eq!(rc, StreamState::Tunnel);
    let rc = connp.req_data(None, b"more tunnel bytes");
    assert_eq!(rc, StreamState::Tunnel);
    let rc = connp.res_data(None, b"tunnel reply");
    assert_eq!(rc, StreamState::Tunnel);
}

#[test]
fn connect_tunnel_carrying_http_keeps_parsing() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"CONNECT host:80 HTTP/1.1\r\nHost: host:80\r\n\r\n");
    connp.res_data(None, b"HTTP/1.1 200 OK\r\n\r\n");

    // Plain HTTP inside the tunnel: a second transaction is produced.
    let rc = connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: host\r\n\r\n");
    assert_eq!(rc, StreamState::NeedMore);
    assert_eq!(connp.conn.tx_size(), 2);
    assert_eq!(
        connp.conn.tx(1).unwrap().request_method_number,
        Method::Get
    );
}

#[test]
fn failed_connect_moves_on() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"CONNECT host:443 HTTP/1.1\r\nHost: host:443\r\n\r\n");
    let rc = connp.res_data(
        None,
        b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n",
    );
    assert!(rc == StreamState::NeedMore || rc == StreamState::Suspend);

    // The request side is unblocked and the next request opens tx #2.
    let rc = connp.req_data(None, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    assert_eq!(rc, StreamState::NeedMore);
    assert_eq!(connp.conn.tx_size(), 2);
}

#[test]
fn two_pipelined_transactions() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET /first HTTP/1.1\r\nHost: a\r\n\r\nGET /second HTTP/1.1\r\nHost: a\r\n\r\n",
    );
    connp.res_data(
        None,
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
    );

    assert_eq!(connp.conn.tx_size(), 2);
    for index in 0..2 {
        let tx = connp.conn.tx(index).unwrap();
        assert!(tx.is_complete(), "transaction {}", index);
        assert_eq!(tx.index, index);
    }
    assert!(connp.conn.flags.is_set(ConnectionFlags::PIPELINED));

    let merged = merge_body_events(&events.borrow());
    assert_eq!(
        merged.as_slice(),
        &[
            Event::TxStart,
            Event::RequestLine,
            Event::RequestHeaders,
            Event::RequestComplete,
            Event::TxStart,
            Event::RequestLine,
            Event::RequestHeaders,
            Event::RequestComplete,
            Event::ResponseLine,
            Event::ResponseHeaders,
            Event::ResponseBody(b"ok".to_vec()),
            Event::ResponseComplete,
            Event::ResponseLine,
            Event::ResponseHeaders,
            Event::ResponseComplete,
        ]
    );
}

#[test]
fn http_0_9_exchange() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    let rc = connp.req_data(None, b"GET /x\r\n");
    assert_eq!(rc, StreamState::NeedMore);
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.is_protocol_0_9);
    assert_eq!(tx.request_protocol_number, Protocol::V0_9);
    assert_eq!(tx.request_progress, RequestProgress::Complete);

    // The response is everything until the connection closes.
    connp.res_data(None, b"hello");
    connp.close(None);
    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_entity_len, 5);
    assert_eq!(tx.response_progress, ResponseProgress::Complete);

    // Extra inbound bytes after a 0.9 exchange are noted and ignored.
    connp.req_data(None, b"junk");
    assert!(connp.conn.flags.is_set(ConnectionFlags::HTTP_0_9_EXTRA));
}

#[test]
fn folded_header_is_joined_and_flagged() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET / HTTP/1.1\r\nHost: a\r\nX-Long: part1\r\n part2\r\n\r\n",
    );
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::FIELD_FOLDED));
    let (_, header) = tx.request_headers.get_nocase("x-long").unwrap();
    assert_eq!(header.value.as_slice(), b"part1 part2");
}

#[test]
fn folding_with_no_previous_header() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.1\r\n Host: a\r\n\r\n");
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::INVALID_FOLDING));
}

#[test]
fn missing_host_on_http_1_1() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.1\r\n\r\n");
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::HOST_MISSING));
}

#[test]
fn ambiguous_host() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET http://one.example.com/ HTTP/1.1\r\nHost: two.example.com\r\n\r\n",
    );
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::AMBIGUOUS_HOST));
    // The URI's hostname wins.
    assert_eq!(
        tx.request_hostname.as_deref(),
        Some(&b"one.example.com"[..])
    );
}

#[test]
fn repeated_header_is_flagged() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET / HTTP/1.1\r\nHost: a\r\nX-Tag: one\r\nX-Tag: two\r\n\r\n",
    );
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::FIELD_REPEATED));
    let (_, header) = tx.request_headers.get_nocase("x-tag").unwrap();
    assert_eq!(header.value.as_slice(), b"one, two");
}

#[test]
fn interim_100_continue_is_replayed() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 2\r\n\r\nhi");
    connp.res_data(
        None,
        b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
    );

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.seen_100continue, 1);
    assert!(tx.response_status_number.eq_num(200));
    assert_eq!(tx.response_progress, ResponseProgress::Complete);
}

#[test]
fn head_response_has_no_body() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"HEAD / HTTP/1.1\r\nHost: a\r\n\r\n");
    connp.res_data(None, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, TransferCoding::NoBody);
    assert_eq!(tx.response_progress, ResponseProgress::Complete);
    assert!(!events
        .borrow()
        .iter()
        .any(|e| matches!(e, Event::ResponseBody(_))));
}

#[test]
fn close_delimited_response_body() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.0\r\n\r\n");
    connp.res_data(None, b"HTTP/1.0 200 OK\r\n\r\npart one ");
    connp.res_data(None, b"and part two");
    connp.close(None);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, TransferCoding::Identity);
    assert_eq!(tx.response_entity_len, 21);
    assert_eq!(tx.response_progress, ResponseProgress::Complete);

    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(b"part one and part two".to_vec())));
}

#[test]
fn garbage_response_line_demotes_to_body() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    connp.res_data(None, b"<html>not a response line</html>\r\nmore body");
    connp.close(None);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, TransferCoding::Identity);
    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(
        b"<html>not a response line</html>\r\nmore body".to_vec()
    )));
    let logs = connp.conn.get_logs();
    assert!(logs
        .iter()
        .any(|l| l.msg.code == LogCode::RESPONSE_LINE_NOT_HTTP));
}

#[test]
fn response_chunked_junk_falls_back_to_stream_close() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    connp.res_data(
        None,
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzzzzzzzz not chunked at all",
    );
    connp.close(None);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_transfer_coding, TransferCoding::Identity);
    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(
        b"zzzzzzzz not chunked at all".to_vec()
    )));
}

#[test]
fn weird_response_line_endings_are_tolerated() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    connp.res_data(
        None,
        b"HTTP/1.1 200 OK\r\r\nContent-Length: 2\r\r\n\r\nok",
    );

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.response_status_number.eq_num(200));
    assert_eq!(tx.response_entity_len, 2);
    let logs = connp.conn.get_logs();
    assert!(logs.iter().any(|l| l.msg.code == LogCode::DEFORMED_EOL));
}

#[test]
fn stop_hook_halts_direction() {
    let (mut cfg, _events) = observed_config();
    cfg.hook_request_headers.register(|_| Err(Status::Stop));
    let mut connp = open_parser(cfg);

    let rc = connp.req_data(None, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    assert_eq!(rc, StreamState::Stop);
    let rc = connp.req_data(None, b"GET /again HTTP/1.1\r\n\r\n");
    assert_eq!(rc, StreamState::Stop);
}

#[test]
fn trailer_headers_fire_trailer_hook() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\nX-Checksum: abc\r\n\r\n",
    );
    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.request_progress, RequestProgress::Complete);
    let (_, header) = tx.request_headers.get_nocase("x-checksum").unwrap();
    assert_eq!(header.value.as_slice(), b"abc");
    assert!(events.borrow().contains(&Event::RequestTrailer));
}

#[test]
fn flags_are_never_cleared() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    // Accumulate anomalies across the request; each observation point
    // must still carry the earlier flags.
    connp.req_data(
        None,
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
    );
    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::REQUEST_SMUGGLING));
    assert!(tx.flags.is_set(Flags::HOST_MISSING));
}

#[test]
fn put_body_flows_through_file_channel() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let (mut cfg, _events) = observed_config();
    cfg.register_file_extraction();
    let file_bytes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&file_bytes);
    cfg.hook_request_file_data.register(move |fd| {
        if let Some(data) = fd.data {
            sink.borrow_mut().extend_from_slice(data);
        }
        Ok(())
    });
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"PUT /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 7\r\n\r\npayload",
    );
    assert_eq!(file_bytes.borrow().as_slice(), b"payload");
}

#[test]
fn multipart_boundaries_are_detected() {
    use tapir::multipart::Flags as MultipartFlags;

    let (mut cfg, _events) = observed_config();
    cfg.register_multipart_parser();
    let mut connp = open_parser(cfg);

    let body = b"--012345\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\ndata\r\n--012345--\r\n";
    let mut request = format!(
        "POST / HTTP/1.1\r\nHost: a\r\nContent-Type: multipart/form-data; boundary=012345\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);

    connp.req_data(None, &request);
    let tx = connp.conn.tx(0).unwrap();
    let parser = tx.request_mpartp.as_ref().unwrap();
    assert_eq!(parser.multipart.boundary_count, 2);
    assert!(parser
        .multipart
        .flags
        .is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
}

#[test]
fn zero_length_data_requires_closed_stream() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);
    assert_eq!(connp.req_data(None, b""), StreamState::Closed);
}
