use crate::multipart::{self, Parser as MultipartParser};
use crate::transaction::Transaction;

/// Inspects the request Content-Type and, when a multipart boundary can be
/// extracted, attaches a streaming boundary matcher to the transaction.
/// The MIME type itself does not gate the attempt; mangled types with a
/// plausible boundary are exactly the traffic worth watching.
pub fn request_multipart_setup(tx: &mut Transaction) {
    if tx.request_mpartp.is_some() {
        return;
    }
    let content_type = match tx.request_headers.get_nocase("content-type") {
        Some((_, header)) => header.value.clone(),
        None => return,
    };
    let mut flags = 0;
    if let Some(boundary) = multipart::find_boundary(content_type.as_slice(), &mut flags) {
        tx.request_mpartp = Some(MultipartParser::new(boundary.as_slice(), flags));
    }
}

/// Routes request body data through the boundary matcher; `None` closes
/// the body.
pub fn request_multipart_data(tx: &mut Transaction, data: Option<&[u8]>) {
    if let Some(parser) = &mut tx.request_mpartp {
        match data {
            Some(data) => parser.parse(data),
            None => parser.finalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstr::Bstr;
    use crate::multipart::Flags as MultipartFlags;
    use crate::transaction::Header;
    use crate::util::FlagOperations;

    #[test]
    fn wires_up_and_feeds() {
        let mut tx = Transaction::new(0);
        tx.request_headers.add(
            Bstr::from("content-type"),
            Header::new(
                Bstr::from("Content-Type"),
                Bstr::from("multipart/form-data; boundary=012345"),
            ),
        );
        request_multipart_setup(&mut tx);
        assert!(tx.request_mpartp.is_some());

        request_multipart_data(&mut tx, Some(b"--012345\r\n\r\nhello\r\n--012345--\r\n"));
        request_multipart_data(&mut tx, None);

        let parser = tx.request_mpartp.as_ref().unwrap();
        assert_eq!(parser.multipart.boundary_count, 2);
        assert!(parser
            .multipart
            .flags
            .is_set(MultipartFlags::SEEN_LAST_BOUNDARY));
    }

    #[test]
    fn plain_body_is_ignored() {
        let mut tx = Transaction::new(0);
        tx.request_headers.add(
            Bstr::from("content-type"),
            Header::new(Bstr::from("Content-Type"), Bstr::from("text/plain")),
        );
        request_multipart_setup(&mut tx);
        assert!(tx.request_mpartp.is_none());
    }
}
