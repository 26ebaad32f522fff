#[cfg(test)]
mod tests {
    use analytics::{Cluster, ClusterOptions, ErrorKind, QueryOptions, ScanConsistency};
    use analytics_tests::{
        SELECT_ONE, StubFailure, StubResponse, StubTransport, credential, errors_document,
        expected_rows, fast_options, init_logs, rows_document, silent_logs,
    };
    use serde_json::{Map, json};
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    const ENDPOINT: &str = "http://analytics.example.com:8095";

    fn cluster(stub: &Arc<StubTransport>, options: ClusterOptions) -> Cluster {
        Cluster::with_transport(ENDPOINT, credential(), options, stub.clone())
            .expect("Could not build the cluster")
    }

    #[tokio::test]
    async fn retries_until_exhausted() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Fail(StubFailure::Connect)));
        let mut options = fast_options();
        options.max_retries = 3;
        let cluster = cluster(&stub, options);
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::default())
                .await
                .expect_err("Every attempt is refused");
            assert_eq!(error.kind(), ErrorKind::Connectivity);
            assert_eq!(error.context().num_attempts, 4);
            assert!(error.context().is_shutdown);
            assert_eq!(error.context().statement, "SELECT 1");
        }
        assert_eq!(stub.attempts(), 4);
    }

    #[tokio::test]
    async fn per_query_retry_limit() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Fail(StubFailure::Network)));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::new().max_retries(0))
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Connectivity);
            assert_eq!(error.context().num_attempts, 1);
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        init_logs();
        let stub = Arc::new(
            StubTransport::new()
                .then(
                    StubResponse::status(503, &errors_document(23000, "Service unavailable", false), 1)
                        .between("10.0.0.1:8095", "10.0.0.100:50001"),
                )
                .then(StubResponse::Fail(StubFailure::Network))
                .then(
                    StubResponse::ok(&rows_document(3), 2)
                        .between("10.0.0.3:8095", "10.0.0.100:50003"),
                ),
        );
        let cluster = cluster(&stub, fast_options());
        let mut result = cluster
            .execute_query("SELECT * FROM airlines", QueryOptions::default())
            .await
            .expect("The third attempt succeeds");
        let context = result.context().clone();
        assert_eq!(context.num_attempts, 3);
        assert_eq!(context.last_dispatched_to.as_deref(), Some("10.0.0.3:8095"));
        assert_eq!(
            context.last_dispatched_from.as_deref(),
            Some("10.0.0.100:50003")
        );
        assert!(context.is_shutdown);
        assert_eq!(result.get_all_rows().await.unwrap(), expected_rows(3));
        assert_eq!(stub.attempts(), 3);
    }

    #[tokio::test]
    async fn syntax_error_is_not_retried() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::status(
            400,
            &errors_document(24000, "Syntax error: In line 1 >>SELEC 1<<", false),
            1,
        )));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELEC 1", QueryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Service);
            assert_eq!(error.context().num_attempts, 1);
            assert_eq!(error.service_errors().len(), 1);
            assert_eq!(error.service_errors()[0].code, 24000);
            assert!(!error.is_auth_failure());
        }
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn authentication_failure() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::status(
            401,
            &errors_document(20001, "Invalid authentication credentials", false),
            1,
        )));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::default())
                .await
                .unwrap_err();
            assert!(error.is_auth_failure());
            assert_eq!(error.context().num_attempts, 1);
        }
    }

    #[tokio::test]
    async fn errors_before_rows_are_retried() {
        init_logs();
        let stub = Arc::new(
            StubTransport::new()
                .then(StubResponse::ok(
                    &errors_document(23007, "Job queue is full", false),
                    3,
                ))
                .then(StubResponse::ok(SELECT_ONE, 1)),
        );
        let cluster = cluster(&stub, fast_options());
        let mut result = cluster
            .execute_query("SELECT 1", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.context().num_attempts, 2);
        assert_eq!(result.get_all_rows().await.unwrap(), vec![json!({"$1": 1})]);
    }

    #[tokio::test]
    async fn mixed_errors_are_fatal() {
        init_logs();
        let body = json!({
            "errors": [
                {"code": 23000, "msg": "Service unavailable"},
                {"code": 24045, "msg": "Cannot find dataset"},
            ],
            "status": "fatal",
        })
        .to_string();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(&body, 1)));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELECT * FROM missing", QueryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Service);
            assert_eq!(error.service_errors().len(), 2);
        }
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn tls_failure_is_fatal() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Fail(StubFailure::Tls)));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Tls);
        }
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn query_timeout() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Hang));
        let cluster = cluster(&stub, fast_options());
        let started = Instant::now();
        silent_logs! {
            let error = cluster
                .execute_query(
                    "SELECT 1",
                    QueryOptions::new().timeout(Duration::from_millis(100)),
                )
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Timeout);
            assert_eq!(error.context().num_attempts, 1);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn backoff_never_outlives_the_budget() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Fail(StubFailure::Connect)));
        let mut options = ClusterOptions::default();
        options.backoff.base = Duration::from_secs(30);
        options.backoff.max = Duration::from_secs(60);
        let cluster = cluster(&stub, options);
        let started = Instant::now();
        silent_logs! {
            let error = cluster
                .execute_query(
                    "SELECT 1",
                    QueryOptions::new().timeout(Duration::from_millis(200)),
                )
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Timeout);
        }
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(stub.attempts(), 1);
    }

    #[tokio::test]
    async fn shutdown_while_in_flight() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::Hang));
        let cluster = cluster(&stub, fast_options());
        let running = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                cluster
                    .execute_query("SELECT 1", QueryOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        silent_logs! {
            cluster.shutdown();
            let error = running.await.unwrap().unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Closed);
            assert!(error.is_closed());
            assert_eq!(error.context().num_attempts, 1);
        }
        assert_eq!(stub.closes(), 1);
        cluster.shutdown();
        assert_eq!(stub.closes(), 1);
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Closed);
            assert_eq!(error.context().num_attempts, 0);
        }
    }

    #[tokio::test]
    async fn request_body() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        let options = QueryOptions::new()
            .positional_parameters([json!(1), json!("two")])
            .named_parameter("country", json!("France"))
            .named_parameter("$limit", json!(10))
            .client_context_id("my-context")
            .scan_consistency(ScanConsistency::RequestPlus)
            .readonly(true)
            .raw("profile", json!("timings"));
        let result = cluster.execute_query("SELECT $1", options).await.unwrap();
        assert_eq!(result.context().client_context_id, "my-context");
        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        let (url, body) = &requests[0];
        assert_eq!(url, "http://analytics.example.com:8095/api/v1/request");
        assert_eq!(body["statement"], "SELECT $1");
        assert_eq!(body["clientContextID"], "my-context");
        assert_eq!(body["args"], json!([1, "two"]));
        assert_eq!(body["namedArgs"], json!({"$country": "France", "$limit": 10}));
        assert_eq!(body["scanConsistency"], "request_plus");
        assert_eq!(body["readonly"], true);
        assert_eq!(body["profile"], "timings");
        let timeout = body["timeout"].as_str().unwrap();
        assert!(timeout.ends_with("ms"), "Unexpected timeout {}", timeout);
        assert!(body.get("queryContext").is_none());
    }

    #[tokio::test]
    async fn generated_context_ids_differ() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        let first = cluster.execute_query("SELECT 1", QueryOptions::default()).await.unwrap();
        let second = cluster.execute_query("SELECT 1", QueryOptions::default()).await.unwrap();
        assert!(!first.context().client_context_id.is_empty());
        assert_ne!(
            first.context().client_context_id,
            second.context().client_context_id
        );
    }

    #[tokio::test]
    async fn scope_query_context() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        let scope = cluster.database("travel-sample").scope("inventory");
        assert_eq!(scope.query_context(), "default:`travel-sample`.`inventory`");
        let mut result = scope
            .execute_query("SELECT 1", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.get_all_rows().await.unwrap(), vec![json!({"$1": 1})]);
        let (_, body) = &stub.requests()[0];
        assert_eq!(body["queryContext"], "default:`travel-sample`.`inventory`");
    }

    #[tokio::test]
    async fn adapter_overrides() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        let adapter = cluster.adapter();
        adapter.set_request_path("query/service");
        let mut fields = Map::new();
        fields.insert("readonly".into(), json!(false));
        fields.insert("plan-format".into(), json!("string"));
        adapter.update_request_json(fields);
        cluster
            .execute_query("SELECT 1", QueryOptions::new().readonly(true))
            .await
            .unwrap();
        let (url, body) = &stub.requests()[0];
        assert_eq!(url, "http://analytics.example.com:8095/query/service");
        assert_eq!(body["readonly"], false);
        assert_eq!(body["plan-format"], "string");
    }

    #[tokio::test]
    async fn invalid_arguments() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("   ", QueryOptions::default())
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::new().chunk_size(0))
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
            let error = Cluster::with_transport("ftp://host", credential(), fast_options(), stub.clone())
                .err()
                .unwrap();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(stub.attempts(), 0);
    }

    #[tokio::test]
    async fn out_of_range_timeouts() {
        init_logs();
        let stub = Arc::new(StubTransport::new().otherwise(StubResponse::ok(SELECT_ONE, 1)));
        let cluster = cluster(&stub, fast_options());
        silent_logs! {
            let error = cluster
                .execute_query("SELECT 1", QueryOptions::new().timeout(Duration::MAX))
                .await
                .unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
            let error = Cluster::with_transport(
                &format!("{}?query_timeout=99999999999999999999h", ENDPOINT),
                credential(),
                fast_options(),
                stub.clone(),
            )
            .err()
            .unwrap();
            assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(stub.attempts(), 0);
        let mut result = cluster
            .execute_query("SELECT 1", QueryOptions::new().timeout(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(result.get_all_rows().await.unwrap(), vec![json!({"$1": 1})]);
    }
}
