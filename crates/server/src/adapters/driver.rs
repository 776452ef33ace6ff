//! Driver location ingest adapter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Location, LocationError};
use futures_util::{Stream, StreamExt};
use ingest::IngestService;
use tonic::{Request, Response, Status, Streaming};

use crate::middleware::IngressLimiter;
use crate::pb::driver_service_server::DriverService;
use crate::pb::{LocationUpdate, UpdateLocationAck};

/// Adapts the ingest service to the client-streaming `DriverService` RPC.
///
/// Each received message passes through the ingress limiter before being
/// validated and published; the stream ends with an acknowledgement on EOF.
pub struct DriverGrpc {
    ingest: Arc<IngestService>,
    limiter: Arc<IngressLimiter>,
}

impl DriverGrpc {
    pub fn new(ingest: Arc<IngestService>, limiter: Arc<IngressLimiter>) -> Self {
        Self { ingest, limiter }
    }

    /// Reads the stream to completion. Validation failures close the stream
    /// with `INVALID_ARGUMENT`; receive failures surface as `INTERNAL`.
    pub(crate) async fn drain<S>(&self, mut stream: S) -> Result<(), Status>
    where
        S: Stream<Item = Result<LocationUpdate, Status>> + Unpin + Send,
    {
        loop {
            self.limiter.wait().await;

            let update = match stream.next().await {
                None => return Ok(()),
                Some(Ok(update)) => update,
                Some(Err(status)) => {
                    tracing::warn!(error = %status, "update_location recv error");
                    return Err(Status::internal(format!("recv: {status}")));
                }
            };

            let location = decode_location(update)
                .map_err(|err| Status::invalid_argument(format!("invalid location: {err}")))?;

            self.ingest
                .ingest(&location)
                .await
                .map_err(|err| Status::internal(format!("ingest: {err}")))?;
        }
    }
}

#[tonic::async_trait]
impl DriverService for DriverGrpc {
    async fn update_location(
        &self,
        request: Request<Streaming<LocationUpdate>>,
    ) -> Result<Response<UpdateLocationAck>, Status> {
        let stream = request.into_inner();
        self.drain(stream).await?;
        Ok(Response::new(UpdateLocationAck {
            message: "ok".to_string(),
        }))
    }
}

/// Converts a wire update into a validated [`Location`]. A missing
/// timestamp uses the server receive time.
fn decode_location(update: LocationUpdate) -> Result<Location, LocationError> {
    let recorded_at = match update.recorded_at {
        Some(ts) => {
            let nanos = u32::try_from(ts.nanos).map_err(|_| LocationError::InvalidTimestamp)?;
            DateTime::<Utc>::from_timestamp(ts.seconds, nanos)
                .ok_or(LocationError::InvalidTimestamp)?
        }
        None => Utc::now(),
    };

    Location::new(update.courier_id, update.latitude, update.longitude, recorded_at)
}
