//! Single-flight valuation queue.
//!
//! One worker task owns the market-data port and serves requests strictly in
//! arrival order. Every request carries a correlation id that the reply must
//! echo back, so a late reply can never be matched to the wrong caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::error::LedgerError;
use crate::ports::market_port::{FundEstimate, MarketDataPort};

const QUEUE_DEPTH: usize = 64;

struct EstimateRequest {
    id: u64,
    codes: Vec<String>,
    reply: oneshot::Sender<EstimateReply>,
}

#[derive(Debug)]
struct EstimateReply {
    id: u64,
    estimates: Vec<FundEstimate>,
}

pub struct EstimateQueue {
    tx: mpsc::Sender<EstimateRequest>,
    next_id: AtomicU64,
}

impl EstimateQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(port: Arc<dyn MarketDataPort + Send + Sync>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(worker(rx, port));
        (
            EstimateQueue {
                tx,
                next_id: AtomicU64::new(1),
            },
            handle,
        )
    }

    /// Fetch estimates for `codes`. Duplicates and blank codes are dropped;
    /// codes the port cannot value are logged and left out of the result.
    pub async fn fetch_batch<S: AsRef<str>>(
        &self,
        codes: &[S],
    ) -> Result<Vec<FundEstimate>, LedgerError> {
        let mut seen = HashSet::new();
        let codes: Vec<String> = codes
            .iter()
            .map(|c| c.as_ref().trim())
            .filter(|c| !c.is_empty() && seen.insert(c.to_string()))
            .map(str::to_string)
            .collect();
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EstimateRequest {
                id,
                codes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| queue_closed())?;

        let reply = reply_rx.await.map_err(|_| queue_closed())?;
        if reply.id != id {
            return Err(LedgerError::MarketData {
                code: "*".into(),
                reason: format!("reply {} does not match request {}", reply.id, id),
            });
        }
        Ok(reply.estimates)
    }
}

fn queue_closed() -> LedgerError {
    LedgerError::MarketData {
        code: "*".into(),
        reason: "estimate queue closed".into(),
    }
}

async fn worker(
    mut rx: mpsc::Receiver<EstimateRequest>,
    port: Arc<dyn MarketDataPort + Send + Sync>,
) {
    while let Some(request) = rx.recv().await {
        let EstimateRequest { id, codes, reply } = request;
        let port = Arc::clone(&port);
        let estimates = tokio::task::spawn_blocking(move || fetch_all(port.as_ref(), &codes))
            .await
            .unwrap_or_else(|e| {
                warn!(request = id, error = %e, "estimate fetch panicked");
                Vec::new()
            });
        debug!(request = id, fetched = estimates.len(), "estimate batch served");
        // The caller may have given up; nothing to do then.
        let _ = reply.send(EstimateReply { id, estimates });
    }
}

fn fetch_all(port: &(dyn MarketDataPort + Send + Sync), codes: &[String]) -> Vec<FundEstimate> {
    codes
        .iter()
        .filter_map(|code| match port.fetch_estimate(code) {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                warn!(code = %code, error = %e, "estimate unavailable");
                None
            }
        })
        .collect()
}
