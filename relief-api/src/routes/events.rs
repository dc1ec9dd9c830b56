//! Event ingestion route
//!
//! `POST /events` answers 202 only after the broker acknowledged the
//! report. Nothing is retried at this level: a 503 means the report was
//! not queued and the client should send it again.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    Json,
};
use relief_events::{Accepted, IngestError, IngestionService};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::telemetry::{with_metrics, PublishOutcome};

/// POST /events - Submit an incident or need report
pub async fn submit_event(
    State(ingestion): State<Arc<IngestionService>>,
    State(config): State<Arc<ApiConfig>>,
    auth: AuthExtractor,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let body = body.map_err(|e| {
        with_metrics(|m| m.record_report(PublishOutcome::Invalid, None));
        tracing::debug!(error = %e.body_text(), "Report body rejected");
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let limit = config.max_report_bytes;
            ApiError::validation_failed(format!("Payload exceeds the {} byte limit", limit))
                .with_details(serde_json::json!({ "limit": limit }))
        } else {
            ApiError::invalid_input(e.body_text())
        }
    })?;

    let started = Instant::now();
    let result = ingestion.submit(&body).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(accepted) => {
            with_metrics(|m| m.record_report(PublishOutcome::Accepted, Some(elapsed)));
            tracing::debug!(
                event_id = %accepted.event_id,
                key_hint = %auth.key_hint,
                "Report queued"
            );
            Ok((StatusCode::ACCEPTED, Json(accepted)))
        }
        Err(e) => {
            match &e {
                IngestError::Validation(reason) => {
                    with_metrics(|m| m.record_report(PublishOutcome::Invalid, None));
                    tracing::debug!(error = %reason, "Report rejected");
                }
                IngestError::BrokerUnavailable { reason } => {
                    with_metrics(|m| {
                        m.record_report(PublishOutcome::BrokerUnavailable, Some(elapsed))
                    });
                    tracing::error!(reason = %reason, "Report not queued");
                }
            }
            Err(e.into())
        }
    }
}
