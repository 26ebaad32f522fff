use indoc::formatdoc;
use serde_json::{Value, json};

/// Successful response of `SELECT 1`.
pub const SELECT_ONE: &str = r#"{"requestID":"0b5d0c59-ffa9-43fb-b37e-5a0f2b5e0c01","signature":{"*":"*"},"results":[{"$1":1}],"plans":{},"status":"success","metrics":{"elapsedTime":"1ms","executionTime":"0.9ms","compileTime":"0ns","queueWaitTime":"0ns","resultCount":1,"resultSize":8,"processedObjects":0}}"#;

/// Successful response with `count` rows `{"id": i, "name": "airline i"}`, from 1.
pub fn rows_document(count: usize) -> String {
    let rows = (1..=count)
        .map(|i| json!({"id": i, "name": format!("airline {}", i)}).to_string())
        .collect::<Vec<_>>()
        .join(",");
    formatdoc! {r#"
        {{
            "requestID": "7a9f6a3e-5b1c-4f37-8a4b-2b9c5f7d1e22",
            "signature": {{"*": "*"}},
            "results": [{rows}],
            "plans": {{}},
            "status": "success",
            "metrics": {{
                "elapsedTime": "12.5ms",
                "executionTime": "11.1ms",
                "resultCount": {count},
                "resultSize": 1024,
                "processedObjects": {count}
            }}
        }}
    "#,
        rows = rows,
        count = count,
    }
}

pub fn expected_rows(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| json!({"id": i, "name": format!("airline {}", i)}))
        .collect()
}

/// Response carrying only an `errors` array.
pub fn errors_document(code: i64, msg: &str, retriable: bool) -> String {
    json!({
        "requestID": "c1f3e0f4-2d1a-4a31-9c55-4d2f1a0b9e33",
        "errors": [{"code": code, "msg": msg, "retriable": retriable}],
        "status": "fatal",
        "metrics": {"elapsedTime": "0.5ms", "resultCount": 0, "errorCount": 1},
    })
    .to_string()
}
