//! Close handshake supervision and transport teardown.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::error::Elapsed;

use super::Shared;
use crate::error::{Result, WsError};
use crate::transport::SendFuture;

impl Shared {
    /// Send a close without validating the code or checking the output latch.
    ///
    /// The timeout starts now, not when the returned future is first polled.
    pub(super) fn send_close0(self: &Arc<Self>, code: u16, reason: String) -> SendFuture {
        let send = self.transport.send_close(code, reason);
        let timeout = self.close_timeout;
        let shared = self.clone();
        let supervisor = self.runtime.spawn(async move {
            let outcome = tokio::time::timeout(timeout, send).await;
            shared.process_close_outcome(outcome)
        });

        Box::pin(async move {
            match supervisor.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(WsError::ConnectionClosed),
            }
        })
    }

    fn process_close_outcome(&self, outcome: std::result::Result<Result<()>, Elapsed>) -> Result<()> {
        match outcome {
            Ok(Ok(())) => {
                tracing::debug!("send close completed successfully");
                if let Err(e) = self.transport.close_output() {
                    tracing::warn!("Failed to close output: {}", e);
                }
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::debug!("send close completed with error: {}", e);
                Err(e)
            }
            Err(_) => {
                tracing::debug!("send close timed out after {:?}", self.close_timeout);
                self.output_closed.store(true, Ordering::Release);
                if let Err(e) = self.transport.close_output() {
                    tracing::warn!("Failed to close output: {}", e);
                }
                self.input_closed.store(true, Ordering::Release);
                if let Err(e) = self.transport.close_input() {
                    tracing::warn!("Failed to close input: {}", e);
                }
                Err(WsError::CloseTimedOut)
            }
        }
    }

    /// Close issued by the endpoint itself; failures are logged and tear
    /// the transport down.
    pub(super) fn send_close_silently(self: &Arc<Self>, code: u16) {
        let close = self.send_close0(code, String::new());
        let shared = self.clone();
        self.runtime.spawn(async move {
            if let Err(e) = close.await {
                tracing::debug!("automatic closure completed with error: {}", e);
                shared.close_transport();
            }
        });
    }

    /// Close both directions, logging failures.
    pub(super) fn close_transport(&self) {
        tracing::debug!("close transport");
        if let Err(e) = self.transport.close_input() {
            tracing::warn!("Failed to close input: {}", e);
        }
        if let Err(e) = self.transport.close_output() {
            tracing::warn!("Failed to close output: {}", e);
        }
    }
}
