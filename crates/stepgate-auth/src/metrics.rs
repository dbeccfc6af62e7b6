//! Decision metrics for Prometheus
//!
//! Counts each outcome of context validation.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Outcome of one context validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// No provider was required
    NotRequired,
    /// The provider was bypassed by policy
    Bypassed,
    /// A previously remembered bypass was honored
    RememberedBypass,
    /// The provider was unavailable and the failure mode excused it
    FailureModeExcused,
    /// The context validator confirmed a satisfied provider
    Satisfied,
    /// The context validator denied the request
    Denied,
}

impl Decision {
    pub const ALL: [Self; 6] = [
        Self::NotRequired,
        Self::Bypassed,
        Self::RememberedBypass,
        Self::FailureModeExcused,
        Self::Satisfied,
        Self::Denied,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Bypassed => "bypassed",
            Self::RememberedBypass => "remembered_bypass",
            Self::FailureModeExcused => "failure_mode_excused",
            Self::Satisfied => "satisfied",
            Self::Denied => "denied",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::NotRequired => 0,
            Self::Bypassed => 1,
            Self::RememberedBypass => 2,
            Self::FailureModeExcused => 3,
            Self::Satisfied => 4,
            Self::Denied => 5,
        }
    }
}

/// Engine metrics collector
#[derive(Debug)]
pub struct EngineMetrics {
    decisions: [AtomicU64; 6],
    /// Provider ids missing from the registry
    unknown_providers: AtomicU64,
    /// Provider checks that returned an error
    provider_errors: AtomicU64,
    /// Configuration reloads applied
    reloads: AtomicU64,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            decisions: Default::default(),
            unknown_providers: AtomicU64::new(0),
            provider_errors: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_decision(&self, decision: Decision) {
        self.decisions[decision.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_provider(&self) {
        self.unknown_providers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decisions(&self, decision: Decision) -> u64 {
        self.decisions[decision.index()].load(Ordering::Relaxed)
    }

    pub fn unknown_providers(&self) -> u64 {
        self.unknown_providers.load(Ordering::Relaxed)
    }

    pub fn provider_errors(&self) -> u64 {
        self.provider_errors.load(Ordering::Relaxed)
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);

        // writing into a String cannot fail
        let _ = writeln!(
            output,
            "# HELP stepgate_uptime_seconds Engine uptime in seconds"
        );
        let _ = writeln!(output, "# TYPE stepgate_uptime_seconds counter");
        let _ = writeln!(
            output,
            "stepgate_uptime_seconds {}",
            self.start_time.elapsed().as_secs()
        );

        let _ = writeln!(
            output,
            "# HELP stepgate_decisions_total Context validation decisions by outcome"
        );
        let _ = writeln!(output, "# TYPE stepgate_decisions_total counter");
        for decision in Decision::ALL {
            let _ = writeln!(
                output,
                "stepgate_decisions_total{{outcome=\"{}\"}} {}",
                decision.as_str(),
                self.decisions(decision)
            );
        }

        let counters = [
            (
                "stepgate_unknown_providers_total",
                "Requested providers missing from the registry",
                &self.unknown_providers,
            ),
            (
                "stepgate_provider_errors_total",
                "Provider checks that failed and were treated as unavailable",
                &self.provider_errors,
            ),
            (
                "stepgate_reloads_total",
                "Configuration reloads applied",
                &self.reloads,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {}", counter.load(Ordering::Relaxed));
        }

        output
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
