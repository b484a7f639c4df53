use std::cmp::Ordering;
use std::collections::HashMap;

use super::agent::Gpu;

// Weighted priority score, lower is better. The weights encode the
// operator's preference order: avoid stacking jobs onto one device first,
// then busy devices, then hot devices, then devices with little free
// memory.
const WEIGHT_TEMPERATURE: f64 = 2.0;
const WEIGHT_UTILIZATION: f64 = 3.0;
const WEIGHT_ACTIVE_JOBS: f64 = 5.0;
const WEIGHT_MEMORY: f64 = 1.5;

/// Above this point a device has no thermal headroom left and its
/// temperature term is doubled.
const HOT_TEMPERATURE_C: i64 = 80;

/// Assumed when the agent's probe reported no temperature reading.
const ASSUMED_TEMPERATURE_C: i64 = 50;

/// Assumed memory usage when the memory pair is unknown.
const ASSUMED_MEMORY_PCT: f64 = 50.0;

const ACTIVE_JOB_PENALTY: u32 = 20;

/// Compute the priority score for one candidate. Pure ranking signal: no
/// threshold here ever rejects a device.
pub fn priority_score(gpu: &Gpu, active_jobs: u32) -> f64 {
    let temp = gpu.temperature_c.unwrap_or(ASSUMED_TEMPERATURE_C);
    let temp_score = if temp > HOT_TEMPERATURE_C {
        (temp * 2) as f64
    } else {
        temp as f64
    };

    let util_score = gpu.utilization_pct.unwrap_or(0) as f64;
    let jobs_score = (active_jobs * ACTIVE_JOB_PENALTY) as f64;

    // The pair counts as known only when both values are present, the
    // total is positive, and used does not exceed total.
    let memory_pct = match (gpu.memory_used_bytes, gpu.memory_total_bytes) {
        (Some(used), Some(total)) if total > 0 && used <= total => {
            used as f64 / total as f64 * 100.0
        }
        _ => ASSUMED_MEMORY_PCT,
    };

    temp_score * WEIGHT_TEMPERATURE
        + util_score * WEIGHT_UTILIZATION
        + jobs_score * WEIGHT_ACTIVE_JOBS
        + memory_pct * WEIGHT_MEMORY
}

/// Pick the best-scoring candidate. Ties break on the lexicographically
/// smallest GPU id, which makes the selection deterministic for a given
/// inventory and set of active-job counts.
pub fn select_gpu<'a>(
    candidates: &'a [Gpu],
    active_jobs: &HashMap<String, u32>,
) -> Option<&'a Gpu> {
    candidates
        .iter()
        .map(|gpu| {
            let jobs = active_jobs.get(&gpu.id).copied().unwrap_or(0);
            (priority_score(gpu, jobs), gpu)
        })
        .min_by(|(score_a, gpu_a), (score_b, gpu_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| gpu_a.id.cmp(&gpu_b.id))
        })
        .map(|(_, gpu)| gpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::GpuStatus;

    fn gpu(id: &str) -> Gpu {
        Gpu {
            id: id.to_string(),
            agent_id: 1,
            model: "test".to_string(),
            status: GpuStatus::Healthy,
            temperature_c: Some(50),
            utilization_pct: Some(0),
            memory_total_bytes: None,
            memory_used_bytes: None,
            is_available: true,
            pci_bus_id: String::new(),
        }
    }

    #[test]
    fn test_reference_score() {
        // 2*50 + 3*0 + 5*0 + 1.5*0 = 100
        let mut g = gpu("GPU-0");
        g.memory_total_bytes = Some(100);
        g.memory_used_bytes = Some(0);
        assert_eq!(priority_score(&g, 0), 100.0);
    }

    #[test]
    fn test_unknown_telemetry_assumptions() {
        let mut g = gpu("GPU-0");
        g.temperature_c = None;
        g.utilization_pct = None;
        // temp 50 assumed, util 0 assumed, memory 50% assumed
        assert_eq!(priority_score(&g, 0), 2.0 * 50.0 + 1.5 * 50.0);
    }

    #[test]
    fn test_zero_memory_total_counts_as_unknown() {
        let mut g = gpu("GPU-0");
        g.memory_total_bytes = Some(0);
        g.memory_used_bytes = Some(0);
        assert_eq!(priority_score(&g, 0), 2.0 * 50.0 + 1.5 * 50.0);
    }

    #[test]
    fn test_used_above_total_counts_as_unknown() {
        let mut g = gpu("GPU-0");
        g.memory_total_bytes = Some(100);
        g.memory_used_bytes = Some(200);
        assert_eq!(priority_score(&g, 0), 2.0 * 50.0 + 1.5 * 50.0);
    }

    #[test]
    fn test_fewer_active_jobs_wins() {
        let a = gpu("G-A");
        let b = gpu("G-B");
        let candidates = vec![a, b];
        let mut counts = HashMap::new();
        counts.insert("G-A".to_string(), 1u32);

        let selected = select_gpu(&candidates, &counts).unwrap();
        assert_eq!(selected.id, "G-B");
    }

    #[test]
    fn test_hot_gpu_loses_to_cooler_one() {
        // 85 °C crosses the doubling threshold, 79 °C does not, so the
        // hotter device scores 2*170 = 340 against 2*79 = 158.
        let mut a = gpu("G-A");
        a.temperature_c = Some(85);
        let mut b = gpu("G-B");
        b.temperature_c = Some(79);
        let candidates = vec![a, b];

        let selected = select_gpu(&candidates, &HashMap::new()).unwrap();
        assert_eq!(selected.id, "G-B");
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let candidates = vec![gpu("G-B"), gpu("G-A")];
        let selected = select_gpu(&candidates, &HashMap::new()).unwrap();
        assert_eq!(selected.id, "G-A");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut a = gpu("G-A");
        a.utilization_pct = Some(30);
        let mut b = gpu("G-B");
        b.utilization_pct = Some(10);
        let candidates = vec![a, b];
        let mut counts = HashMap::new();
        counts.insert("G-B".to_string(), 0u32);

        let first = select_gpu(&candidates, &counts).unwrap().id.clone();
        for _ in 0..10 {
            assert_eq!(select_gpu(&candidates, &counts).unwrap().id, first);
        }
    }

    #[test]
    fn test_empty_inventory_has_no_fit() {
        assert!(select_gpu(&[], &HashMap::new()).is_none());
    }
}
