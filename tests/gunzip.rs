use std::io::Write;
use tapir::connection_parser::StreamState;
use tapir::decompressors::ContentEncoding;
use tapir::transaction::ResponseProgress;

mod common;
use common::{merge_body_events, observed_config, open_parser, Event};

fn deflate_bytes(input: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(input).unwrap();
    encoder.finish().unwrap()
}

/// A gzip member with the FNAME extension set and an uncomputed trailer,
/// the shape lenient servers actually emit.
fn gzip_with_fname(name: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut stream = b"\x1f\x8b\x08\x08\x00\x00\x00\x00\x00\x03".to_vec();
    stream.extend_from_slice(name);
    stream.push(0);
    stream.extend_from_slice(&deflate_bytes(payload));
    stream.extend_from_slice(&[0u8; 8]);
    stream
}

fn response_with_body(headers: &str, body: &[u8]) -> Vec<u8> {
    let mut data = format!(
        "HTTP/1.1 200 OK\r\n{}Content-Length: {}\r\n\r\n",
        headers,
        body.len()
    )
    .into_bytes();
    data.extend_from_slice(body);
    data
}

#[test]
fn gzip_response_with_fname_extension() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    let body = gzip_with_fname(b"x.txt", b"hi");
    let rc = connp.res_data(
        None,
        &response_with_body("Content-Encoding: gzip\r\n", &body),
    );
    assert_eq!(rc, StreamState::NeedMore);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_content_encoding, ContentEncoding::Gzip);
    assert_eq!(tx.response_progress, ResponseProgress::Complete);
    // Entity length counts decompressed bytes, message length the wire.
    assert_eq!(tx.response_entity_len, 2);
    assert_eq!(tx.response_content_length, body.len() as i64);

    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(b"hi".to_vec())));
}

#[test]
fn corrupt_gzip_passes_through_without_fatal_error() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    // Reserved deflate block type everywhere; every restart fails and the
    // stage steps aside.
    let body = b"\xff\xff\xff\xff raw bytes pretending to be gzip";
    let rc = connp.res_data(
        None,
        &response_with_body("Content-Encoding: gzip\r\n", body),
    );
    assert_eq!(rc, StreamState::NeedMore);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_progress, ResponseProgress::Complete);
    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(body.to_vec())));
}

#[test]
fn mislabeled_gzip_as_deflate_still_decodes() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    let body = gzip_with_fname(b"f", b"mislabeled payload");
    connp.res_data(
        None,
        &response_with_body("Content-Encoding: deflate\r\n", &body),
    );

    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(b"mislabeled payload".to_vec())));
}

#[test]
fn chunked_gzip_response() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");

    let payload = gzip_with_fname(b"c", b"chunked and compressed");
    let mut data =
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    // Split the compressed stream over two chunks.
    let half = payload.len() / 2;
    for part in [&payload[..half], &payload[half..]] {
        data.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        data.extend_from_slice(part);
        data.extend_from_slice(b"\r\n");
    }
    data.extend_from_slice(b"0\r\n\r\n");

    let rc = connp.res_data(None, &data);
    assert_eq!(rc, StreamState::NeedMore);

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_progress, ResponseProgress::Complete);
    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(b"chunked and compressed".to_vec())));
}

#[test]
fn lzma_disabled_passes_through() {
    let (mut cfg, events) = observed_config();
    cfg.compression.set_lzma_memlimit(0);
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    let body = b"\x5d\x00\x00\x80\x00 not really lzma";
    connp.res_data(
        None,
        &response_with_body("Content-Encoding: lzma\r\n", body),
    );

    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(body.to_vec())));
}

#[test]
fn unknown_content_encoding_is_passed_through() {
    let (cfg, events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    let body = b"payload kept verbatim";
    connp.res_data(
        None,
        &response_with_body("Content-Encoding: br\r\n", body),
    );

    let tx = connp.conn.tx(0).unwrap();
    assert_eq!(tx.response_content_encoding, ContentEncoding::None);
    let merged = merge_body_events(&events.borrow());
    assert!(merged.contains(&Event::ResponseBody(body.to_vec())));
}
