//! Pilot session: send one command per response until the flight ends

mod plan;

pub use plan::FlightPlan;

use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use dronesim_shared::codec::{self, FrameDecoder};
use dronesim_shared::{CrashCause, ErrorKind, Metrics, Response};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How a flight ended
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSummary {
    pub session_id: String,
    pub ticks_sent: u64,
    pub rejected: u64,
    pub metrics: Option<Metrics>,
    pub crash: Option<CrashCause>,
}

/// A connected pilot
pub struct Pilot<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    response_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite> Pilot<S> {
    pub fn new(stream: S, response_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            response_timeout,
        }
    }

    /// Wait for the greeting, then fly `plan` for at most `max_ticks` commands
    pub async fn fly(&mut self, plan: &FlightPlan, max_ticks: u64) -> Result<FlightSummary> {
        let session_id = match self.recv().await? {
            Response::Connected { session_id, message } => {
                info!("Session {}: {}", session_id, message);
                session_id
            }
            other => bail!("expected greeting, got {:?}", other),
        };

        let mut summary = FlightSummary {
            session_id,
            ticks_sent: 0,
            rejected: 0,
            metrics: None,
            crash: None,
        };

        while summary.ticks_sent < max_ticks {
            let command = plan
                .command_at(summary.ticks_sent)
                .ok_or_else(|| anyhow!("flight plan is empty"))?;

            let encoded = codec::encode(&command)?;
            self.writer.write_all(&encoded).await?;
            summary.ticks_sent += 1;

            match self.recv().await? {
                Response::Success { telemetry, metrics } => {
                    debug!(
                        "tick {}: x={} alt={} battery={:.1} wind={} dust={} sensors={:?}",
                        metrics.iterations,
                        telemetry.x_position,
                        telemetry.altitude,
                        telemetry.battery,
                        telemetry.wind_speed,
                        telemetry.dust_level,
                        telemetry.sensor_status
                    );
                    summary.metrics = Some(metrics);
                }
                Response::Crashed {
                    metrics,
                    crash_cause,
                    message,
                    ..
                } => {
                    warn!("Crashed after {} ticks: {}", metrics.iterations, message);
                    summary.metrics = Some(metrics);
                    summary.crash = Some(crash_cause);
                    return Ok(summary);
                }
                Response::Error { kind, field, message } => {
                    warn!("Command rejected ({:?}, field={:?}): {}", kind, field, message);
                    summary.rejected += 1;
                    if kind == ErrorKind::Internal {
                        bail!("session faulted: {}", message);
                    }
                }
                Response::Connected { .. } => bail!("unexpected second greeting"),
            }
        }

        Ok(summary)
    }

    async fn recv(&mut self) -> Result<Response> {
        let frame = timeout(self.response_timeout, self.next_frame())
            .await
            .map_err(|_| anyhow!("no response within {:?}", self.response_timeout))??;
        Ok(codec::decode_json(&frame)?)
    }

    async fn next_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.decoder.decode_next()? {
                return Ok(frame);
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                bail!("server closed connection");
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}
