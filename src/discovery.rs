//! Route discovery by increasing hop limits
//!
//! One echo per hop limit, starting at 1. Every hop limit produces a hop
//! row, published to the registry as soon as its probe completes. Discovery
//! ends at the first echo reply from the target, when the path stalls, at
//! the hop-limit ceiling, or on cancellation.

use crate::config::{DEFAULT_PACKET_SIZE, STALL_THRESHOLD};
use crate::enrichment::HopEnricher;
use crate::error::DiscoveryError;
use crate::events::{EventSink, SessionEvent};
use crate::hop::{HopRegistry, HopState, SharedHop};
use crate::icmp::{IcmpTransport, ProbeRequest};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Enumerates the hops between this host and a target
pub struct RouteDiscovery {
    transport: Arc<dyn IcmpTransport>,
    registry: HopRegistry,
    enricher: HopEnricher,
    probe_timeout: Duration,
    events: EventSink,
}

impl RouteDiscovery {
    /// Create a discovery phase publishing into `registry`
    pub fn new(
        transport: Arc<dyn IcmpTransport>,
        registry: HopRegistry,
        enricher: HopEnricher,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry,
            enricher,
            probe_timeout,
            events: EventSink::none(),
        }
    }

    /// Publish discovered hops as events
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn publish(&self, hop: HopState) -> SharedHop {
        self.events.emit(SessionEvent::HopDiscovered(hop.clone()));
        self.registry.insert(hop)
    }

    /// Discover the route to `target`
    ///
    /// Returns the hops in order. A transport failure aborts discovery; a
    /// cancelled discovery returns the hops found so far. Background lookups
    /// are awaited before returning unless cancelled.
    pub async fn discover(
        &self,
        target: IpAddr,
        max_hops: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<SharedHop>, DiscoveryError> {
        let mut hops = Vec::new();
        let mut lookups = Vec::new();
        let mut last_address: Option<IpAddr> = None;
        let mut stall_count = 0u32;

        for ttl in 1..=max_hops {
            if cancel.is_cancelled() {
                info!("Discovery cancelled after {} hops", hops.len());
                break;
            }

            let request = ProbeRequest::echo(target, DEFAULT_PACKET_SIZE, self.probe_timeout)
                .with_hop_limit(ttl);
            let outcome = self.transport.probe(request).await?;

            let Some(from) = outcome.responder() else {
                debug!("No reply at hop {ttl}");
                hops.push(self.publish(HopState::no_response(ttl)));
                stall_count += 1;
                if stall_count >= STALL_THRESHOLD {
                    info!("{stall_count} consecutive hops without progress, stopping discovery");
                    break;
                }
                continue;
            };

            debug!("Hop {ttl}: {from} ({outcome:?})");
            let hop = self.publish(HopState::new(ttl, from));
            if let Some(handle) = self.enricher.dispatch(&hop) {
                lookups.push(handle);
            }
            hops.push(hop);

            if last_address == Some(from) {
                stall_count += 1;
            } else {
                stall_count = 0;
            }
            last_address = Some(from);

            if stall_count >= STALL_THRESHOLD {
                info!("Route stalled at {from}, stopping discovery");
                break;
            }
            if outcome.is_echo_reply() {
                info!("Reached {target} in {ttl} hops");
                break;
            }
        }

        let aborts: Vec<_> = lookups.iter().map(|h| h.abort_handle()).collect();
        tokio::select! {
            _ = futures::future::join_all(lookups) => {}
            _ = cancel.cancelled() => {
                for abort in aborts {
                    abort.abort();
                }
            }
        }
        Ok(hops)
    }
}
