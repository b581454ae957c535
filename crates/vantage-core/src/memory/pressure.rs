//! Memory pressure sampling.

/// One reading of memory use against a budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

impl MemorySample {
    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.budget_bytes as f64
    }
}

/// Source of memory readings for the pressure valve.
pub trait MemorySampler: Send + Sync {
    /// `None` when the platform cannot report memory use.
    fn sample(&self) -> Option<MemorySample>;
}

/// Fixed reading, for hosts that report memory themselves.
#[derive(Debug, Clone, Copy)]
pub struct StaticSampler(pub MemorySample);

impl MemorySampler for StaticSampler {
    fn sample(&self) -> Option<MemorySample> {
        Some(self.0)
    }
}

/// Resident memory of the current process, via `sysinfo`.
#[cfg(feature = "pressure-monitor")]
pub struct ProcessMemorySampler {
    system: std::sync::Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
    budget_bytes: u64,
}

#[cfg(feature = "pressure-monitor")]
impl ProcessMemorySampler {
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            system: std::sync::Mutex::new(sysinfo::System::new()),
            pid: sysinfo::get_current_pid().ok(),
            budget_bytes,
        }
    }
}

#[cfg(feature = "pressure-monitor")]
impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> Option<MemorySample> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        let used_bytes = system.process(pid)?.memory();
        Some(MemorySample {
            used_bytes,
            budget_bytes: self.budget_bytes,
        })
    }
}
