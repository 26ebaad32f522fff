use crate::{Error, Result, metadata::Envelope};
use std::collections::VecDeque;

/// Incremental splitter of a result document.
///
/// Bytes can be fed in chunks of any size, the elements of the top level
/// `results` array come out one at a time as raw JSON, everything else is kept
/// (with an empty `results`) and parsed once the document is complete. Only the
/// current row and the envelope are ever held in memory.
#[derive(Default, Debug)]
pub struct JsonStreamDecoder {
    /// Open containers, `{` or `[`.
    stack: Vec<u8>,
    started: bool,
    complete: bool,
    in_string: bool,
    escape: bool,
    /// Text of the latest string at the top level, candidate object key.
    key: Vec<u8>,
    capturing_key: bool,
    /// Key whose value comes next.
    pending_key: Option<Vec<u8>>,
    in_results: bool,
    in_row: bool,
    discard_rows: bool,
    row: Vec<u8>,
    envelope: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    rows_seen: u64,
    offset: u64,
}

impl JsonStreamDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Completed rows are dropped instead of queued from now on.
    pub fn discard_rows(&mut self) {
        self.discard_rows = true;
        self.ready.clear();
    }

    /// The closing brace of the document was seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn has_row(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn next_row(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Rows completed so far, discarded ones included.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        for &b in chunk {
            self.offset += 1;
            self.byte(b)?;
        }
        Ok(())
    }

    /// Parses the envelope, fails if the document is not complete.
    pub(crate) fn finish(&mut self) -> Result<Envelope> {
        if !self.started {
            return Err(Error::protocol("The response body is empty"));
        }
        if !self.complete {
            return Err(Error::protocol(format!(
                "The response body ended before the document was complete (after {} bytes)",
                self.offset
            )));
        }
        Envelope::parse(&self.envelope)
    }

    fn byte(&mut self, b: u8) -> Result<()> {
        if self.complete {
            if b.is_ascii_whitespace() {
                return Ok(());
            }
            return Err(self.unexpected(b, "after the end of the document"));
        }
        if !self.started {
            if b.is_ascii_whitespace() {
                return Ok(());
            }
            if b != b'{' {
                return Err(self.unexpected(b, "the document must be an object"));
            }
            self.started = true;
            self.stack.push(b'{');
            self.envelope.push(b);
            return Ok(());
        }
        if self.in_string {
            self.push(b);
            if self.escape {
                self.escape = false;
            } else if b == b'\\' {
                self.escape = true;
            } else if b == b'"' {
                self.in_string = false;
                self.capturing_key = false;
                return Ok(());
            }
            if self.capturing_key {
                self.key.push(b);
            }
            return Ok(());
        }
        let depth = self.stack.len();
        if self.in_results && depth == 2 && !self.in_row {
            match b {
                b',' => return Ok(()),
                b']' => {}
                _ if b.is_ascii_whitespace() => return Ok(()),
                _ => {
                    self.in_row = true;
                    self.row.clear();
                }
            }
        }
        match b {
            b'"' => {
                self.in_string = true;
                if depth == 1 {
                    self.capturing_key = true;
                    self.key.clear();
                }
                self.push(b);
            }
            b'{' | b'[' => {
                if depth == 1 && b == b'[' && self.pending_key.as_deref() == Some(&b"results"[..]) {
                    self.in_results = true;
                }
                self.push(b);
                self.stack.push(b);
            }
            b'}' | b']' => {
                let open = if b == b'}' { b'{' } else { b'[' };
                if self.stack.pop() != Some(open) {
                    return Err(self.unexpected(b, "mismatched closing bracket"));
                }
                let depth = self.stack.len();
                if self.in_results && depth == 1 {
                    if self.in_row {
                        self.complete_row();
                    }
                    self.in_results = false;
                    self.pending_key = None;
                    self.envelope.push(b);
                } else {
                    self.push(b);
                    if self.in_row && depth == 2 {
                        self.complete_row();
                    }
                }
                if depth == 0 {
                    self.complete = true;
                }
            }
            b',' if self.in_row && depth == 2 => self.complete_row(),
            b':' if depth == 1 => {
                self.pending_key = Some(self.key.clone());
                self.push(b);
            }
            b',' if depth == 1 => {
                self.pending_key = None;
                self.push(b);
            }
            _ => self.push(b),
        }
        Ok(())
    }

    fn push(&mut self, b: u8) {
        if self.in_row {
            if !self.discard_rows {
                self.row.push(b);
            }
        } else {
            self.envelope.push(b);
        }
    }

    fn complete_row(&mut self) {
        self.in_row = false;
        self.rows_seen += 1;
        if self.discard_rows {
            return;
        }
        let mut row = std::mem::take(&mut self.row);
        while row.last().is_some_and(u8::is_ascii_whitespace) {
            row.pop();
        }
        self.ready.push_back(row);
    }

    fn unexpected(&self, b: u8, reason: &str) -> Error {
        Error::protocol(format!(
            "Unexpected byte `{}` at offset {} of the response body: {}",
            b.escape_ascii(),
            self.offset,
            reason
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::JsonStreamDecoder;
    use crate::ErrorKind;
    use indoc::indoc;
    use serde_json::{Value, json};

    const DOCUMENT: &str = indoc! {r#"
        {
            "requestID": "5f3c9b3e-0a5e-4b8e-9f0f-1f4c1c7a2d11",
            "signature": {"*": "*"},
            "results": [ {"id": 1, "name": "Zoë \"quoted\" [x]", "tags": ["a", {"b": []}]},
                {"id": 2, "nested": {"results": [1, 2]}} ,
                "text, with comma",
                42, -1.5e3, true, null,
                [1, [2, [3]]]
            ],
            "plans": {},
            "status": "success",
            "metrics": {"elapsedTime": "1.2ms", "resultCount": 8}
        }
    "#};

    fn decode(chunks: &[&[u8]]) -> (Vec<Value>, Value) {
        let mut decoder = JsonStreamDecoder::new();
        let mut rows = Vec::new();
        for chunk in chunks {
            decoder.feed(chunk).expect("Valid chunk");
            while let Some(row) = decoder.next_row() {
                rows.push(serde_json::from_slice(&row).expect("Valid row"));
            }
        }
        assert!(decoder.is_complete());
        let envelope: Value = serde_json::from_slice(&decoder.envelope).unwrap();
        (rows, envelope)
    }

    fn expected_rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "Zoë \"quoted\" [x]", "tags": ["a", {"b": []}]}),
            json!({"id": 2, "nested": {"results": [1, 2]}}),
            json!("text, with comma"),
            json!(42),
            json!(-1.5e3),
            json!(true),
            json!(null),
            json!([1, [2, [3]]]),
        ]
    }

    #[test]
    fn whole_document() {
        let (rows, envelope) = decode(&[DOCUMENT.as_bytes()]);
        assert_eq!(rows, expected_rows());
        assert_eq!(envelope["results"], json!([]));
        assert_eq!(envelope["status"], json!("success"));
        assert_eq!(envelope["metrics"]["resultCount"], json!(8));
    }

    #[test]
    fn every_split_point() {
        let bytes = DOCUMENT.as_bytes();
        for split in 0..=bytes.len() {
            let (rows, envelope) = decode(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(rows, expected_rows(), "split at {}", split);
            assert_eq!(envelope["requestID"], json!("5f3c9b3e-0a5e-4b8e-9f0f-1f4c1c7a2d11"));
        }
        let single_bytes = bytes.chunks(1).collect::<Vec<_>>();
        let (rows, _) = decode(&single_bytes);
        assert_eq!(rows, expected_rows());
    }

    #[test]
    fn results_after_other_fields_and_errors() {
        let document = br#"{"status":"fatal","errors":[{"code":23007,"msg":"Job queue is full"}],"results":[]}"#;
        let mut decoder = JsonStreamDecoder::new();
        decoder.feed(document).unwrap();
        assert!(!decoder.has_row());
        let envelope = decoder.finish().unwrap();
        assert_eq!(envelope.errors[0].code, 23007);
    }

    #[test]
    fn no_results_field() {
        let mut decoder = JsonStreamDecoder::new();
        decoder
            .feed(br#"{"requestID":"x","errors":[{"code":24000,"msg":"Syntax error: In line 1 >>SELEC 1;<<"}]}"#)
            .unwrap();
        assert!(decoder.is_complete());
        assert_eq!(decoder.rows_seen(), 0);
        assert_eq!(decoder.finish().unwrap().errors[0].code, 24000);
    }

    #[test]
    fn discarding() {
        let mut decoder = JsonStreamDecoder::new();
        let (head, tail) = DOCUMENT.as_bytes().split_at(150);
        decoder.feed(head).unwrap();
        decoder.discard_rows();
        decoder.feed(tail).unwrap();
        assert!(!decoder.has_row());
        assert_eq!(decoder.rows_seen(), 8);
        let metadata = decoder.finish().unwrap().into_metadata();
        assert_eq!(metadata.status.as_deref(), Some("success"));
    }

    #[test]
    fn malformed() {
        let mut decoder = JsonStreamDecoder::new();
        let error = decoder.feed(b"[1, 2]").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);

        let mut decoder = JsonStreamDecoder::new();
        let error = decoder.feed(br#"{"results": [1}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);

        let mut decoder = JsonStreamDecoder::new();
        let error = decoder.feed(br#"{"results": []} {"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);

        let mut decoder = JsonStreamDecoder::new();
        decoder.feed(br#"{"results": [{"a": 1}, {"a""#).unwrap();
        assert_eq!(decoder.next_row().as_deref(), Some(&br#"{"a": 1}"#[..]));
        let error = decoder.finish().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);

        let mut decoder = JsonStreamDecoder::new();
        assert_eq!(decoder.finish().unwrap_err().kind(), ErrorKind::Protocol);
    }
}
