//! Session orchestration
//!
//! A session resolves the target, discovers the route, then runs the
//! monitor and the path analyzer side by side until stopped. Only one
//! session runs per controller at a time.

use crate::analyzer::PathQualityAnalyzer;
use crate::config::SessionConfig;
use crate::diagnostics::{self, Finding};
use crate::discovery::RouteDiscovery;
use crate::enrichment::HopEnricher;
use crate::error::SessionError;
use crate::events::{EventSink, SessionEvent};
use crate::hop::{HopRegistry, HopState};
use crate::monitor::ConcurrentMonitor;
use crate::services::Services;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Starts sessions and enforces one at a time
///
/// # Examples
///
/// ```no_run
/// use mtroute::config::SessionConfig;
/// use mtroute::session::SessionController;
///
/// # async fn run() -> Result<(), mtroute::error::SessionError> {
/// let controller = SessionController::from_config(SessionConfig::default());
/// let (session, _events) = controller.start("example.com")?;
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
/// for finding in session.diagnose() {
///     println!("{}", finding.message);
/// }
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    config: SessionConfig,
    services: Services,
    registry: HopRegistry,
    busy: Arc<AtomicBool>,
}

impl SessionController {
    /// Controller with system services
    pub fn from_config(config: SessionConfig) -> Self {
        let services = Services::from_config(&config);
        Self::new(config, services)
    }

    /// Create a controller over explicitly provided services
    pub fn new(config: SessionConfig, services: Services) -> Self {
        Self {
            config,
            services,
            registry: HopRegistry::new(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hop set of the current or most recent session
    pub fn registry(&self) -> &HopRegistry {
        &self.registry
    }

    /// True while a session is running or stopping
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a session against `target`
    ///
    /// Returns the session handle and its event stream. Fails with
    /// [`SessionError::AlreadyRunning`] until the previous session has fully
    /// stopped. Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        target: &str,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        self.config.validate().map_err(SessionError::Config)?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::AlreadyRunning);
        }
        let busy = BusyGuard(Arc::clone(&self.busy));

        let (inner_tx, inner_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let report = Arc::new(Mutex::new(String::new()));
        tokio::spawn(forward_events(inner_rx, tx, Arc::clone(&report)));

        let (analysis_done, analysis_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let driver = SessionDriver {
            target: target.trim().to_string(),
            config: self.config.clone(),
            services: self.services.clone(),
            registry: self.registry.clone(),
            events: EventSink::new(inner_tx),
            cancel: cancel.clone(),
            report: Arc::clone(&report),
            analysis_done,
        };
        let handle = tokio::spawn(async move {
            let _busy = busy;
            driver.run().await
        });

        let session = SessionHandle {
            target: target.trim().to_string(),
            registry: self.registry.clone(),
            resolve_names: self.config.resolve_names,
            cancel,
            report,
            analysis_done: analysis_rx,
            driver: Mutex::new(Some(handle)),
        };
        Ok((session, rx))
    }
}

/// Clears the controller's busy flag when the driver task ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps the latest path report and relays every event to the caller
async fn forward_events(
    mut inner: mpsc::UnboundedReceiver<SessionEvent>,
    outer: mpsc::UnboundedSender<SessionEvent>,
    report: Arc<Mutex<String>>,
) {
    while let Some(event) = inner.recv().await {
        if let SessionEvent::PathReportUpdated(text) | SessionEvent::PathAnalysisComplete(text) =
            &event
        {
            *report.lock().expect("mutex poisoned") = text.clone();
        }
        let _ = outer.send(event);
    }
}

struct SessionDriver {
    target: String,
    config: SessionConfig,
    services: Services,
    registry: HopRegistry,
    events: EventSink,
    cancel: CancellationToken,
    report: Arc<Mutex<String>>,
    analysis_done: watch::Sender<bool>,
}

impl SessionDriver {
    async fn run(self) -> Result<(), SessionError> {
        let result = self.phases().await;
        self.analysis_done.send_replace(true);
        if let Err(e) = &result {
            warn!("Session for {} failed: {e}", self.target);
            self.events.emit(SessionEvent::Failed(e.to_string()));
        }
        result
    }

    async fn phases(&self) -> Result<(), SessionError> {
        let target = self.target.as_str();
        self.events.status("Detecting your network...");
        let user_asn = self.services.geo.detect_user_asn().await;
        debug!("Operator network: {user_asn}");

        self.events.status(format!("Resolving {target}..."));
        let address = self
            .services
            .names
            .resolve(target, self.config.ip_preference)
            .await
            .map_err(|e| {
                debug!("Resolution of {target} failed: {e}");
                SessionError::CouldNotResolve(target.to_string())
            })?;

        self.registry.clear();
        self.events
            .status(format!("Discovering route to {target} [{address}]..."));
        let discovery = RouteDiscovery::new(
            Arc::clone(&self.services.transport),
            self.registry.clone(),
            HopEnricher::new(self.services.clone()),
            self.config.timing.discovery_timeout,
        )
        .with_events(self.events.clone());
        let hops = discovery
            .discover(address, self.config.max_hops, &self.cancel)
            .await?;

        if self.cancel.is_cancelled() {
            info!("Session stopped during discovery");
            return Ok(());
        }
        if hops.is_empty() {
            return Err(SessionError::RouteDiscoveryFailed);
        }
        info!("Discovered {} hops to {target}", hops.len());

        let monitor = ConcurrentMonitor::new(
            Arc::clone(&self.services.transport),
            self.config.timing.monitor_timeout,
        )
        .with_events(self.events.clone());
        let analyzer = PathQualityAnalyzer::new(
            Arc::clone(&self.services.transport),
            self.config.timing.analysis_timeout,
            self.config.resolve_names,
        )
        .with_events(self.events.clone());

        let analysis = async {
            let report = analyzer
                .analyze(target, &hops, self.config.packets_per_hop, &self.cancel)
                .await;
            *self.report.lock().expect("mutex poisoned") = report;
            self.analysis_done.send_replace(true);
        };
        let monitoring = monitor.run(
            &hops,
            self.config.interval,
            self.config.packet_size,
            &self.cancel,
        );
        let ((), cycles) = tokio::join!(analysis, monitoring);
        info!("Session for {target} stopped after {cycles} monitoring cycles");
        Ok(())
    }
}

/// A running session
pub struct SessionHandle {
    target: String,
    registry: HopRegistry,
    resolve_names: bool,
    cancel: CancellationToken,
    report: Arc<Mutex<String>>,
    analysis_done: watch::Receiver<bool>,
    driver: Mutex<Option<JoinHandle<Result<(), SessionError>>>>,
}

impl SessionHandle {
    /// The target as given to [`SessionController::start`]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Consistent copy of every hop
    pub fn snapshot(&self) -> Vec<HopState> {
        self.registry.snapshot()
    }

    /// Diagnose the current statistics
    pub fn diagnose(&self) -> Vec<Finding> {
        diagnostics::evaluate(&self.snapshot(), self.resolve_names)
    }

    /// Latest path analysis report, partial while the analysis runs
    pub fn path_report(&self) -> String {
        self.report.lock().expect("mutex poisoned").clone()
    }

    /// True once the background driver has exited
    pub fn is_finished(&self) -> bool {
        self.driver
            .lock()
            .expect("mutex poisoned")
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the path analysis to finish or be cancelled
    ///
    /// Returns the latest report.
    pub async fn wait_path_analysis(&self) -> String {
        let mut done = self.analysis_done.clone();
        // An error means the driver is gone, which also ends the analysis
        let _ = done.wait_for(|finished| *finished).await;
        self.path_report()
    }

    /// Cancel the session and wait for it to wind down
    ///
    /// In-flight probes complete or time out before this returns. Returns
    /// the error that ended the session, if any.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        let handle = self.driver.lock().expect("mutex poisoned").take();
        let Some(handle) = handle else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::TaskFailed(e.to_string())),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpPreference;
    use crate::dns::{AddressProvider, ForwardResolver, NameResolutionService};
    use crate::error::{ResolveError, TransportError};
    use crate::geo::{GeoAsnLookupService, GeoProvider};
    use crate::icmp::{IcmpTransport, ProbeOutcome, ProbeRequest};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    /// Two-hop path answering every probe instantly
    struct TwoHops;

    #[async_trait]
    impl IcmpTransport for TwoHops {
        async fn probe(&self, request: ProbeRequest) -> Result<ProbeOutcome, TransportError> {
            let rtt = Duration::from_millis(4);
            Ok(match request.hop_limit {
                Some(1) => ProbeOutcome::TimeExceeded {
                    from: "192.168.1.1".parse().unwrap(),
                    rtt,
                },
                _ => ProbeOutcome::EchoReply {
                    from: request.target,
                    rtt,
                },
            })
        }
    }

    struct Silent;

    #[async_trait]
    impl IcmpTransport for Silent {
        async fn probe(&self, _request: ProbeRequest) -> Result<ProbeOutcome, TransportError> {
            Err(TransportError::Socket("socket creation refused".to_string()))
        }
    }

    struct NoAddresses;

    #[async_trait]
    impl AddressProvider for NoAddresses {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn attempt(&self, host: &str, _preference: IpPreference) -> Result<IpAddr, ResolveError> {
            Err(ResolveError::CouldNotResolve(host.to_string()))
        }
    }

    fn controller(transport: Arc<dyn IcmpTransport>, packets_per_hop: u32) -> SessionController {
        let config = SessionConfig::builder()
            .resolve_names(false)
            .packets_per_hop(packets_per_hop)
            .interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let names = NameResolutionService::with_parts(
            ForwardResolver::with_providers(vec![Box::new(NoAddresses)]),
            Arc::new(crate::dns::servers::create_default_resolver()),
            false,
        );
        let geo = GeoAsnLookupService::with_providers(Vec::<Arc<dyn GeoProvider>>::new());
        let services = Services::with_services(&config, Some(transport), Some(names), Some(geo));
        SessionController::new(config, services)
    }

    #[tokio::test]
    async fn test_session_runs_and_stops() {
        let controller = controller(Arc::new(TwoHops), 3);
        let (session, _events) = controller.start("203.0.113.10").unwrap();
        assert!(controller.is_busy());
        assert!(matches!(
            controller.start("203.0.113.11"),
            Err(SessionError::AlreadyRunning)
        ));

        let report = session.wait_path_analysis().await;
        assert!(report.contains("Tracing route to 203.0.113.10 [203.0.113.10]"));
        assert!(report.contains("0/3 = 0%"));
        assert!(report.ends_with("Analysis complete.\n"));

        let hops = session.snapshot();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].hostname, "192.168.1.1");
        assert!(!session.is_finished());

        session.stop().await.unwrap();
        assert!(session.is_finished());
        assert!(!controller.is_busy());
        assert!(controller.start("203.0.113.10").is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_before_probing() {
        let controller = controller(Arc::new(TwoHops), 1);
        let (session, mut events) = controller.start("no-such-host.invalid").unwrap();

        let err = session.stop().await.unwrap_err();
        assert!(matches!(err, SessionError::CouldNotResolve(_)));
        assert_eq!(err.to_string(), "could not resolve host: no-such-host.invalid");
        assert!(controller.registry().is_empty());

        let mut failed = None;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Failed(message) = event {
                failed = Some(message);
            }
        }
        assert_eq!(failed.as_deref(), Some("could not resolve host: no-such-host.invalid"));
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_session() {
        let controller = controller(Arc::new(Silent), 1);
        let (session, mut events) = controller.start("198.51.100.2").unwrap();
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::Failed(_)) {
                break;
            }
        }
        assert!(matches!(
            session.stop().await,
            Err(SessionError::Discovery(_))
        ));
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = SessionConfig::default();
        config.packets_per_hop = 0;
        let controller = SessionController::new(
            config.clone(),
            Services::with_services(&config, Some(Arc::new(TwoHops)), None, None),
        );
        assert!(matches!(controller.start("example.com"), Err(SessionError::Config(_))));
        assert!(!controller.is_busy());
    }
}
