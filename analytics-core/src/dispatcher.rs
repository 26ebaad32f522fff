use crate::{
    ClientAdapter, Error, ErrorKind, HttpRequest, HttpResponse, QueryRequest, QueryResult,
    RequestContext, Result, ServiceErrorEntry, TransportError, reader::ResultReader,
    truncate_long,
};
use futures::TryStreamExt;
use serde::Deserialize;
use std::error::Error as _;
use tokio::time::Instant;

/// What a single physical attempt produced.
pub(crate) enum AttemptOutcome {
    Success(ResultReader),
    Retryable(Error),
    Fatal(Error),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    errors: Vec<ServiceErrorEntry>,
}

/// Runs the request, retrying the transient failures within the query budget.
///
/// Attempts are at most `max_retries + 1`, separated by an exponential
/// backoff. The returned result owns the open response of the successful
/// attempt, already positioned on its first row.
pub async fn execute_query(adapter: &ClientAdapter, request: QueryRequest) -> Result<QueryResult> {
    let mut context = RequestContext::new(
        request.statement.clone(),
        request.client_context_id.clone(),
    );
    let Some(deadline) = Instant::now().checked_add(request.timeout) else {
        let error = Error::invalid_argument(format!(
            "The timeout {:?} is out of range",
            request.timeout
        ))
        .with_context(context.shutdown());
        log::error!("{:#}", error);
        return Err(error);
    };
    let shutdown = adapter.shutdown_signal();
    let backoff = adapter.config().backoff;
    let max_attempts = request.max_retries.saturating_add(1);
    let error = loop {
        if adapter.is_closed() {
            break Error::closed("The client is closed");
        }
        if Instant::now() >= deadline {
            break budget_exceeded(&request);
        }
        let attempt = context.begin_attempt();
        log::debug!(
            "Attempt {} of {} for the query `{}` (client context id {})",
            attempt,
            max_attempts,
            truncate_long!(request.statement),
            request.client_context_id
        );
        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => AttemptOutcome::Fatal(Error::closed(
                "The client was closed while the request was in flight",
            )),
            outcome = tokio::time::timeout_at(
                deadline,
                send_attempt(adapter, &request, deadline, &mut context),
            ) => outcome.unwrap_or_else(|_| AttemptOutcome::Fatal(budget_exceeded(&request))),
        };
        match outcome {
            AttemptOutcome::Success(mut reader) => {
                let context = context.shutdown();
                reader.set_context(context.clone());
                return Ok(QueryResult::new(reader, context));
            }
            AttemptOutcome::Fatal(error) => break error,
            AttemptOutcome::Retryable(error) if attempt >= max_attempts => break error,
            AttemptOutcome::Retryable(error) => {
                let delay = backoff.delay(attempt);
                log::warn!(
                    "Attempt {} of {} failed, retrying in {:?}: {:#}",
                    attempt,
                    max_attempts,
                    delay,
                    error
                );
                let wake = Instant::now()
                    .checked_add(delay)
                    .map_or(deadline, |v| v.min(deadline));
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => {}
                    _ = tokio::time::sleep_until(wake) => {}
                }
            }
        }
    };
    let error = error.with_context(context.shutdown());
    log::error!("{:#}", error);
    Err(error)
}

async fn send_attempt(
    adapter: &ClientAdapter,
    request: &QueryRequest,
    deadline: Instant,
    context: &mut RequestContext,
) -> AttemptOutcome {
    let transport = match adapter.transport() {
        Ok(transport) => transport,
        Err(e) => return AttemptOutcome::Fatal(e),
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    let body = match request.body(remaining, &adapter.request_json()) {
        Ok(body) => body,
        Err(e) => return AttemptOutcome::Fatal(e),
    };
    let response = match transport
        .send(HttpRequest {
            url: adapter.request_url(),
            credential: adapter.credential().clone(),
            body: body.into(),
        })
        .await
    {
        Ok(response) => response,
        Err(e) if e.is_retryable() => return AttemptOutcome::Retryable(e.into()),
        Err(e) => return AttemptOutcome::Fatal(e.into()),
    };
    context.record_dispatch(
        response.remote_addr.map(|v| v.to_string()),
        response.local_addr.map(|v| v.to_string()),
    );
    if !response.is_success() {
        return error_response(response).await;
    }
    let mut reader = ResultReader::new(
        response.body,
        response.status,
        request.chunk_size,
        request.deserializer.clone(),
        deadline,
        adapter.shutdown_signal(),
    );
    match reader.prime().await {
        Ok(()) => AttemptOutcome::Success(reader),
        Err(e) => classify(e),
    }
}

/// Reads a non 2xx response fully and classifies its `errors`.
async fn error_response(response: HttpResponse) -> AttemptOutcome {
    let status = response.status;
    let body = match response
        .body
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
    {
        Ok(body) => body,
        Err(e) => return classify(e.into()),
    };
    let entries = serde_json::from_slice::<ErrorBody>(&body)
        .map(|v| v.errors)
        .unwrap_or_default();
    let error = if entries.is_empty() {
        let text = String::from_utf8_lossy(&body);
        let mut error = Error::service(Some(status), Vec::new());
        if !text.trim().is_empty() {
            error = Error::new(
                ErrorKind::Service,
                format!("{}: {}", error.message(), truncate_long!(text.trim())),
            );
        }
        error
    } else {
        Error::service(Some(status), entries)
    };
    if matches!(status, 429 | 503) {
        AttemptOutcome::Retryable(error)
    } else {
        classify(error)
    }
}

/// Transport failures classify the same whether they hit the send or the body.
fn classify(error: Error) -> AttemptOutcome {
    let transport = error
        .source()
        .and_then(|v| v.downcast_ref::<TransportError>());
    let retryable = match (transport, error.kind()) {
        (Some(transport), _) => transport.is_retryable(),
        (None, ErrorKind::Connectivity) => true,
        (None, ErrorKind::Service | ErrorKind::Timeout) => {
            !error.service_errors().is_empty()
                && error.service_errors().iter().all(ServiceErrorEntry::is_transient)
        }
        (None, _) => false,
    };
    if retryable {
        AttemptOutcome::Retryable(error)
    } else {
        AttemptOutcome::Fatal(error)
    }
}

fn budget_exceeded(request: &QueryRequest) -> Error {
    Error::timeout(format!(
        "The query did not complete within {:?}",
        request.timeout
    ))
}
