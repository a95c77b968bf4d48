//! Host load sampling and worker status derivation.
//!
//! The reported figures are the worse of two views: whole-host load from
//! the OS, and the average across this agent's containers. A host that is
//! busy with something other than our containers still reads as busy.

use flotilla_proto::{WorkerLoad, WorkerState};

use crate::drivers::ContainerStats;

/// Whole-host readings, as percentages.
pub trait SystemProbe: Send + Sync {
    /// 1-minute load average normalized by core count, 0–100.
    fn cpu_percent(&self) -> f64;
    /// Physical memory in use, 0–100.
    fn memory_percent(&self) -> f64;
}

/// Reads host figures through libc.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcProbe;

impl SystemProbe for LibcProbe {
    fn cpu_percent(&self) -> f64 {
        let mut loadavg = [0f64; 1];
        // getloadavg fails only on exotic platforms; report idle there.
        let written = unsafe { libc::getloadavg(loadavg.as_mut_ptr(), 1) };
        if written < 1 {
            return 0.0;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        (loadavg[0] / cores * 100.0).min(100.0)
    }

    fn memory_percent(&self) -> f64 {
        unsafe {
            let total = libc::sysconf(libc::_SC_PHYS_PAGES);
            let available = libc::sysconf(libc::_SC_AVPHYS_PAGES);
            if total <= 0 || available < 0 {
                return 0.0;
            }
            let used = (total - available) as f64;
            (used / total as f64 * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// Combine host readings and container stats into one load report.
pub fn aggregate_load(
    host_cpu: f64,
    host_memory: f64,
    containers: &[ContainerStats],
) -> WorkerLoad {
    let (avg_cpu, avg_memory) = if containers.is_empty() {
        (0.0, 0.0)
    } else {
        let n = containers.len() as f64;
        (
            containers.iter().map(|c| c.cpu_percent).sum::<f64>() / n,
            containers.iter().map(|c| c.memory_percent).sum::<f64>() / n,
        )
    };

    WorkerLoad {
        cpu_usage: host_cpu.max(avg_cpu),
        memory_usage: host_memory.max(avg_memory),
        running_containers: containers.len() as u32,
    }
}

/// Derive the advertised worker status from a load report.
pub fn derive_state(load: &WorkerLoad) -> WorkerState {
    if load.cpu_usage > 80.0 || load.memory_usage > 90.0 {
        WorkerState::Overloaded
    } else if load.cpu_usage > 60.0 || load.memory_usage > 70.0 {
        WorkerState::Busy
    } else {
        WorkerState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cpu: f64, memory: f64) -> ContainerStats {
        ContainerStats {
            name: "app-1-1".to_string(),
            cpu_percent: cpu,
            memory_percent: memory,
        }
    }

    #[test]
    fn takes_the_worse_of_host_and_containers() {
        let load = aggregate_load(20.0, 80.0, &[stats(70.0, 10.0), stats(50.0, 20.0)]);
        // Containers dominate CPU (avg 60), host dominates memory.
        assert!((load.cpu_usage - 60.0).abs() < f64::EPSILON);
        assert!((load.memory_usage - 80.0).abs() < f64::EPSILON);
        assert_eq!(load.running_containers, 2);
    }

    #[test]
    fn no_containers_means_host_figures_only() {
        let load = aggregate_load(35.0, 40.0, &[]);
        assert!((load.cpu_usage - 35.0).abs() < f64::EPSILON);
        assert_eq!(load.running_containers, 0);
    }

    #[test]
    fn status_thresholds() {
        let mk = |cpu, memory| WorkerLoad {
            cpu_usage: cpu,
            memory_usage: memory,
            running_containers: 0,
        };

        assert_eq!(derive_state(&mk(50.0, 50.0)), WorkerState::Active);
        assert_eq!(derive_state(&mk(61.0, 50.0)), WorkerState::Busy);
        assert_eq!(derive_state(&mk(50.0, 71.0)), WorkerState::Busy);
        assert_eq!(derive_state(&mk(81.0, 50.0)), WorkerState::Overloaded);
        assert_eq!(derive_state(&mk(50.0, 91.0)), WorkerState::Overloaded);

        // Boundary values stay one tier down.
        assert_eq!(derive_state(&mk(60.0, 70.0)), WorkerState::Active);
        assert_eq!(derive_state(&mk(80.0, 90.0)), WorkerState::Busy);
    }

    #[test]
    fn libc_probe_returns_sane_percentages() {
        let probe = LibcProbe;
        let cpu = probe.cpu_percent();
        let memory = probe.memory_percent();
        assert!((0.0..=100.0).contains(&cpu));
        assert!((0.0..=100.0).contains(&memory));
    }
}
