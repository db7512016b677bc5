//! Resource-bounded execution of plugin hooks and calls.
//!
//! Two limit regimes live side by side:
//!
//! - [`Sandbox::execute`] always enforces the wall-clock timeout. When
//!   `enforce_os_limits` is set it also lowers the host's soft rlimits for
//!   the duration of the call (hard enforcement).
//! - [`Sandbox::check_compliance`] samples current usage against the
//!   configured ceilings and records violations without aborting anything
//!   (advisory).
//!
//! OS ceilings are process-wide, so a registry shares one [`CeilingGate`]
//! across all sandboxes: an enforced call runs alone, unenforced calls run
//! concurrently with each other.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use vigil_config::SandboxLimits;
use vigil_core::{Event, EventBus, Result, VigilError, Violation, ViolationKind};

use crate::os_limits::{self, OsLimitGuard, ResourceUsage};

/// Serializes calls that hold non-default process ceilings.
#[derive(Debug, Clone, Default)]
pub struct CeilingGate(Arc<RwLock<()>>);

enum GatePermit<'a> {
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

impl CeilingGate {
    pub fn new() -> Self {
        Self::default()
    }

    async fn enter(&self, exclusive: bool) -> GatePermit<'_> {
        if exclusive {
            GatePermit::Exclusive(self.0.write().await)
        } else {
            GatePermit::Shared(self.0.read().await)
        }
    }
}

/// Outcome of an advisory usage check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComplianceReport {
    pub usage: Option<ResourceUsage>,
    pub subprocesses: u32,
    pub violations: Vec<Violation>,
}

impl ComplianceReport {
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}

/// One plugin's execution wrapper and violation log.
pub struct Sandbox {
    plugin: String,
    limits: SandboxLimits,
    gate: CeilingGate,
    violations: Mutex<Vec<Violation>>,
    spawned: AtomicU32,
    events: Option<EventBus>,
}

impl Sandbox {
    pub fn new(plugin: impl Into<String>, limits: SandboxLimits) -> Self {
        Self {
            plugin: plugin.into(),
            limits,
            gate: CeilingGate::new(),
            violations: Mutex::new(Vec::new()),
            spawned: AtomicU32::new(0),
            events: None,
        }
    }

    /// Share a gate with other sandboxes in the same process.
    pub fn with_gate(mut self, gate: CeilingGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run `operation` under the wall-clock timeout (and OS ceilings when
    /// enforced). A timeout cancels only this future, records one `timeout`
    /// violation and returns `SandboxTimeout`. Errors from the operation
    /// itself pass through untouched.
    pub async fn execute<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let enforce = self.limits.enforce_os_limits;
        let timeout = self.limits.execution_timeout();
        let _permit = self.gate.enter(enforce).await;
        let _ceilings = if enforce {
            Some(self.apply_ceilings(operation)?)
        } else {
            None
        };

        debug!(plugin = %self.plugin, operation, enforce, "sandboxed call");
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let seconds = timeout.as_secs_f64();
                self.record(
                    Violation::new(
                        ViolationKind::Timeout,
                        format!("{operation} exceeded {seconds}s wall-clock limit"),
                    )
                    .with_trace(operation),
                );
                Err(VigilError::SandboxTimeout {
                    plugin: self.plugin.clone(),
                    seconds,
                })
            }
        }
    }

    fn apply_ceilings(&self, operation: &str) -> Result<OsLimitGuard> {
        OsLimitGuard::apply(&self.limits).map_err(|e| {
            let reason = format!("failed to apply OS limits: {e}");
            self.record(Violation::new(ViolationKind::Other, reason.clone()).with_trace(operation));
            VigilError::SandboxResource {
                plugin: self.plugin.clone(),
                reason,
            }
        })
    }

    /// Sample current usage against the ceilings. Advisory: violations are
    /// recorded and returned, nothing is aborted.
    pub fn check_compliance(&self) -> ComplianceReport {
        let subprocesses = self.spawned.load(Ordering::SeqCst);
        let usage = match os_limits::process_usage() {
            Ok(u) => u,
            Err(e) => {
                warn!(plugin = %self.plugin, error = %e, "resource usage unavailable");
                return ComplianceReport {
                    usage: None,
                    subprocesses,
                    violations: Vec::new(),
                };
            }
        };

        let mut found = Vec::new();
        if usage.memory_bytes > self.limits.max_memory_bytes() {
            found.push(Violation::new(
                ViolationKind::Memory,
                format!(
                    "resident memory {} bytes exceeds {} MiB",
                    usage.memory_bytes, self.limits.max_memory_mb
                ),
            ));
        }
        if usage.cpu_seconds > self.limits.max_cpu_time_seconds as f64 {
            found.push(Violation::new(
                ViolationKind::Cpu,
                format!(
                    "cpu time {:.2}s exceeds {}s",
                    usage.cpu_seconds, self.limits.max_cpu_time_seconds
                ),
            ));
        }
        if usage.open_files > self.limits.max_open_files {
            found.push(Violation::new(
                ViolationKind::Other,
                format!(
                    "{} open files exceeds {}",
                    usage.open_files, self.limits.max_open_files
                ),
            ));
        }
        for v in &found {
            self.record(v.clone());
        }

        ComplianceReport {
            usage: Some(usage),
            subprocesses,
            violations: found,
        }
    }

    /// Spawn a child within the subprocess budget, with the memory, CPU and
    /// descriptor ceilings applied to the child itself.
    pub fn spawn(&self, command: &mut tokio::process::Command) -> Result<tokio::process::Child> {
        let max = self.limits.max_subprocesses;
        let previous = self.spawned.fetch_add(1, Ordering::SeqCst);
        if max == 0 || previous >= max {
            self.spawned.fetch_sub(1, Ordering::SeqCst);
            let reason = if max == 0 {
                "subprocess spawning is disabled".to_string()
            } else {
                format!("subprocess limit of {max} reached")
            };
            return Err(self.illegal_subprocess(reason));
        }

        #[cfg(unix)]
        os_limits::apply_child_limits(command, &self.limits);
        command.kill_on_drop(true);

        command.spawn().map_err(|e| {
            self.spawned.fetch_sub(1, Ordering::SeqCst);
            VigilError::Io(e)
        })
    }

    /// Record an illegal-subprocess violation and build the matching error.
    pub(crate) fn illegal_subprocess(&self, reason: String) -> VigilError {
        self.record(Violation::new(ViolationKind::IllegalSubprocess, reason.clone()));
        VigilError::SandboxResource {
            plugin: self.plugin.clone(),
            reason,
        }
    }

    /// Number of subprocesses spawned so far.
    pub fn spawned(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn record(&self, violation: Violation) {
        warn!(
            plugin = %self.plugin,
            kind = %violation.kind,
            message = %violation.message,
            "sandbox violation"
        );
        if let Some(events) = &self.events {
            events.publish(Event::ViolationRecorded {
                plugin: self.plugin.clone(),
                violation: violation.kind,
            });
        }
        self.violations.lock().push(violation);
    }

    /// Snapshot of the violation log.
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    pub fn violation_count(&self) -> usize {
        self.violations.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(seconds: f64) -> SandboxLimits {
        SandboxLimits {
            max_execution_time_seconds: seconds,
            ..SandboxLimits::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_records_exactly_one_violation() {
        let sandbox = Sandbox::new("slow", limits(1.0));
        let result = sandbox
            .execute("call:block", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(VigilError::SandboxTimeout { plugin, seconds }) => {
                assert_eq!(plugin, "slow");
                assert_eq!(seconds, 1.0);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let violations = sandbox.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Timeout);
        assert_eq!(violations[0].trace.as_deref(), Some("call:block"));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_value_through() {
        let sandbox = Sandbox::new("fast", limits(1.0));
        let value = sandbox
            .execute("call:echo", async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(sandbox.violation_count(), 0);
    }

    #[tokio::test]
    async fn plugin_errors_are_not_violations() {
        let sandbox = Sandbox::new("faulty", limits(5.0));
        let result: Result<()> = sandbox
            .execute("start", async { Err(VigilError::plugin("faulty", "boom")) })
            .await;
        assert!(matches!(result, Err(VigilError::Plugin { .. })));
        assert_eq!(sandbox.violation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_does_not_affect_sibling_sandbox() {
        let gate = CeilingGate::new();
        let slow = Sandbox::new("slow", limits(1.0)).with_gate(gate.clone());
        let quick = Sandbox::new("quick", limits(10.0)).with_gate(gate);

        let (a, b) = tokio::join!(
            slow.execute("call", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
            quick.execute("call", async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok("done")
            }),
        );
        assert!(a.is_err());
        assert_eq!(b.unwrap(), "done");
        assert_eq!(quick.violation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enforced_call_never_overlaps_other_sandboxes() {
        use tokio::time::Instant;

        let gate = CeilingGate::new();
        // Ceilings above any real limit, so the guard changes nothing.
        let enforced_limits = SandboxLimits {
            max_memory_mb: 1 << 30,
            max_cpu_time_seconds: u64::MAX / 2,
            max_open_files: u64::MAX / 2,
            max_execution_time_seconds: 10.0,
            enforce_os_limits: true,
            ..SandboxLimits::default()
        };
        let enforced = Sandbox::new("enforced", enforced_limits).with_gate(gate.clone());
        let before = Sandbox::new("before", limits(10.0)).with_gate(gate.clone());
        let after = Sandbox::new("after", limits(10.0)).with_gate(gate);

        let window = || async {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, VigilError>((start, Instant::now()))
        };
        let (b, e, a) = tokio::join!(
            before.execute("call", window()),
            enforced.execute("call", window()),
            after.execute("call", window()),
        );
        let (b, e, a) = (b.unwrap(), e.unwrap(), a.unwrap());

        let disjoint = |x: (Instant, Instant), y: (Instant, Instant)| x.1 <= y.0 || y.1 <= x.0;
        assert!(disjoint(e, b), "enforced call overlapped an earlier call");
        assert!(disjoint(e, a), "enforced call overlapped a later call");
        assert_eq!(enforced.violation_count(), 0);
    }

    #[tokio::test]
    async fn violations_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sandbox = Sandbox::new("noisy", limits(1.0)).with_events(bus);
        sandbox.record(Violation::new(ViolationKind::Memory, "too big"));

        match rx.recv().await.unwrap() {
            Event::ViolationRecorded { plugin, violation } => {
                assert_eq!(plugin, "noisy");
                assert_eq!(violation, ViolationKind::Memory);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawning_disabled_records_violation() {
        let sandbox = Sandbox::new("quiet", SandboxLimits::default());
        let mut cmd = tokio::process::Command::new("true");
        let err = sandbox.spawn(&mut cmd).unwrap_err();
        assert!(matches!(err, VigilError::SandboxResource { .. }));
        assert_eq!(sandbox.violations()[0].kind, ViolationKind::IllegalSubprocess);
        assert_eq!(sandbox.spawned(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_budget_is_enforced() {
        let sandbox = Sandbox::new(
            "worker",
            SandboxLimits {
                max_subprocesses: 1,
                ..SandboxLimits::default()
            },
        );
        let mut child = sandbox
            .spawn(&mut tokio::process::Command::new("true"))
            .unwrap();
        assert!(child.wait().await.unwrap().success());
        assert_eq!(sandbox.spawned(), 1);

        assert!(sandbox.spawn(&mut tokio::process::Command::new("true")).is_err());
        assert_eq!(sandbox.violation_count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn compliance_is_advisory() {
        let tight = Sandbox::new(
            "hog",
            SandboxLimits {
                max_memory_mb: 0,
                max_open_files: 0,
                ..SandboxLimits::default()
            },
        );
        let report = tight.check_compliance();
        assert!(!report.is_compliant());
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::Memory));
        assert!(kinds.contains(&ViolationKind::Other));
        assert_eq!(tight.violation_count(), report.violations.len());

        let roomy = Sandbox::new(
            "calm",
            SandboxLimits {
                max_memory_mb: 1 << 30,
                max_cpu_time_seconds: u64::MAX,
                max_open_files: u64::MAX,
                ..SandboxLimits::default()
            },
        );
        let report = roomy.check_compliance();
        assert!(report.is_compliant());
        assert!(report.usage.is_some());
    }
}
