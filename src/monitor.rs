//! Continuous per-hop monitoring
//!
//! Every cycle probes all addressed hops concurrently, waits for the whole
//! cycle, then sleeps for the configured interval. Results are folded into
//! each hop's statistics under that hop's lock.

use crate::config::WARMUP_PING_COUNT;
use crate::events::EventSink;
use crate::hop::SharedHop;
use crate::icmp::{IcmpTransport, ProbeRequest, ProbeResult};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// MTR-style monitoring loop over a discovered hop set
pub struct ConcurrentMonitor {
    transport: Arc<dyn IcmpTransport>,
    probe_timeout: Duration,
    events: EventSink,
}

impl ConcurrentMonitor {
    /// Create a monitor probing through `transport`
    pub fn new(transport: Arc<dyn IcmpTransport>, probe_timeout: Duration) -> Self {
        Self {
            transport,
            probe_timeout,
            events: EventSink::none(),
        }
    }

    /// Publish status lines as events
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Probe `hops` every `interval` until `cancel` fires
    ///
    /// Returns the number of completed cycles. Probes already in flight when
    /// cancellation arrives run to completion or timeout, but their results
    /// are discarded.
    pub async fn run(
        &self,
        hops: &[SharedHop],
        interval: Duration,
        packet_size: usize,
        cancel: &CancellationToken,
    ) -> u64 {
        let targets: Vec<(SharedHop, IpAddr)> = hops
            .iter()
            .filter_map(|hop| {
                let address = hop.lock().expect("mutex poisoned").address;
                address.map(|a| (Arc::clone(hop), a))
            })
            .collect();

        self.events.status(format!(
            "Monitoring {} hops (waiting for {WARMUP_PING_COUNT} warm-up pings)",
            targets.len()
        ));
        info!("Monitoring {} of {} hops", targets.len(), hops.len());

        let warmed_up = AtomicBool::new(false);
        let mut cycles = 0u64;
        while !cancel.is_cancelled() {
            let probes = targets
                .iter()
                .map(|(hop, address)| self.probe_hop(hop, *address, packet_size, cancel, &warmed_up));
            futures::future::join_all(probes).await;
            cycles += 1;
            trace!("Monitoring cycle {cycles} complete");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        debug!("Monitoring stopped after {cycles} cycles");
        cycles
    }

    async fn probe_hop(
        &self,
        hop: &SharedHop,
        address: IpAddr,
        packet_size: usize,
        cancel: &CancellationToken,
        warmed_up: &AtomicBool,
    ) {
        let request = ProbeRequest::echo(address, packet_size, self.probe_timeout);
        let result = match self.transport.probe(request).await {
            Ok(outcome) => ProbeResult::from(outcome),
            Err(e) => {
                debug!("Probe to {address} failed: {e}");
                ProbeResult::loss()
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        let completed_warmup = hop.lock().expect("mutex poisoned").record_probe(result);
        if completed_warmup && !warmed_up.swap(true, Ordering::SeqCst) {
            self.events.status("Warm-up complete, collecting statistics");
        }
    }
}
