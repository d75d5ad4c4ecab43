use rstest::rstest;
use tapir::bstr::Bstr;
use tapir::util::{normalize_uri_path_inplace, FlagOperations, Flags};

mod common;
use common::{observed_config, open_parser};

#[rstest]
#[case(b"", b"")]
#[case(b"/", b"/")]
#[case(b"/./", b"/")]
#[case(b"/..", b"/")]
#[case(b"/../", b"/")]
#[case(b"/a/./b", b"/a/b")]
#[case(b"/a/../b", b"/b")]
#[case(b"/a/b/../../c", b"/c")]
#[case(b"//", b"//")]
#[case(b"/./a", b"/a")]
#[case(b"a/b/c", b"a/b/c")]
#[case(b"/a/b/c/../../d", b"/a/d")]
#[case(b"/./././a", b"/a")]
#[case(b"/a/../../b", b"/b")]
#[case(b".", b"")]
#[case(b"/a/b/..", b"/a/")]
fn dot_segment_removal(#[case] input: &[u8], #[case] expected: &[u8]) {
    let mut path = Bstr::from(input);
    normalize_uri_path_inplace(&mut path);
    assert_eq!(path.as_slice(), expected);
}

#[test]
fn u_encoded_dot_dot_traversal() {
    let (mut cfg, _events) = observed_config();
    cfg.decoder.u_encoding_decode = true;
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET /%u002e%u002e/etc/passwd HTTP/1.1\r\nHost: a\r\n\r\n",
    );

    let tx = connp.conn.tx(0).unwrap();
    // Decoded to "/../etc/passwd", then dot segments removed.
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/etc/passwd"[..])
    );
    assert!(tx.flags.is_set(Flags::PATH_OVERLONG_U));
}

#[test]
fn u_encoding_disabled_preserves_sequence() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(
        None,
        b"GET /%u002e%u002e/etc/passwd HTTP/1.1\r\nHost: a\r\n\r\n",
    );

    let tx = connp.conn.tx(0).unwrap();
    // Unknown but preserved: no invalid-encoding flag.
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/%u002e%u002e/etc/passwd"[..])
    );
    assert!(!tx.flags.is_set(Flags::PATH_INVALID_ENCODING));
    assert!(!tx.flags.is_set(Flags::PATH_OVERLONG_U));
}

#[test]
fn fullwidth_u_encoding_is_flagged() {
    let (mut cfg, _events) = observed_config();
    cfg.decoder.u_encoding_decode = true;
    let mut connp = open_parser(cfg);

    // %uFF0F is a fullwidth solidus; best-fit folds it onto '/'.
    connp.req_data(None, b"GET /dir%uFF0Ffile HTTP/1.1\r\nHost: a\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::PATH_FULLWIDTH_EVASION));
    assert!(tx.flags.is_set(Flags::PATH_ENCODED_SEPARATOR));
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/dir/file"[..])
    );
}

#[test]
fn utf8_overlong_slash_is_flagged() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    // 0xC0 0xAF is the overlong two-byte encoding of '/'.
    connp.req_data(None, b"GET /a\xc0\xafb HTTP/1.1\r\nHost: a\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::PATH_UTF8_OVERLONG));
    assert!(tx.flags.is_set(Flags::PATH_UTF8_VALID));
    // Validation only: the path keeps its original bytes.
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/a\xc0\xafb"[..])
    );
}

#[test]
fn invalid_utf8_is_preserved_and_flagged() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /a\xc3 HTTP/1.1\r\nHost: a\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::PATH_UTF8_INVALID));
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/a\xc3"[..])
    );
}

#[test]
fn encoded_separator_is_preserved_by_default() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET /a%2Fb HTTP/1.1\r\nHost: a\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    assert!(tx.flags.is_set(Flags::PATH_ENCODED_SEPARATOR));
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().path.as_deref(),
        Some(&b"/a%2Fb"[..])
    );
}

#[test]
fn default_path_for_absolute_uri() {
    let (cfg, _events) = observed_config();
    let mut connp = open_parser(cfg);

    connp.req_data(None, b"GET http://example.com HTTP/1.1\r\nHost: example.com\r\n\r\n");

    let tx = connp.conn.tx(0).unwrap();
    let uri = tx.parsed_uri.as_ref().unwrap();
    assert_eq!(uri.hostname.as_deref(), Some(&b"example.com"[..]));
    assert_eq!(uri.path.as_deref(), Some(&b"/"[..]));
}
