//! Stateless rendering of run progress.
//!
//! Pure functions from snapshot/summary values to strings, kept apart from
//! the progress state itself so the state is testable without capturing
//! console output and the CLI decides how/where to print.

use std::time::Duration;

use super::{RunSnapshot, RunSummary};

/// ASCII progress bar, e.g. `[########------------]`.
pub fn progress_bar(completed: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = if total == 0 {
        0
    } else {
        (completed * width) / total
    };
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// Human ETA: "42 sec", "7 min", "1 hr 05 min", "complete", or "--" when
/// unknown.
pub fn format_eta(eta_secs: Option<f64>) -> String {
    let Some(secs) = eta_secs else {
        return "--".to_string();
    };
    if secs <= 0.0 {
        return "complete".to_string();
    }
    let secs = secs.round() as u64;
    if secs < 60 {
        format!("{} sec", secs)
    } else if secs < 3600 {
        format!("{} min", secs / 60)
    } else {
        format!("{} hr {:02} min", secs / 3600, (secs % 3600) / 60)
    }
}

/// Compact elapsed time: "4m12s" / "1h02m".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Render the live status view: aggregate line, one row per worker, and a
/// verification call-out when any session is paused.
pub fn render(snapshot: &RunSnapshot) -> String {
    let mut out = String::new();
    let percent = if snapshot.run_units == 0 {
        100
    } else {
        snapshot.completed * 100 / snapshot.run_units
    };
    out.push_str(&format!(
        "progress: {}/{} units ({}%) | failed: {} | elapsed: {} | eta: {}\n",
        snapshot.completed,
        snapshot.run_units,
        percent,
        snapshot.failed,
        format_duration(snapshot.elapsed),
        format_eta(snapshot.eta_secs),
    ));

    for w in &snapshot.workers {
        let bar = progress_bar(w.completed.len(), w.assigned, 20);
        out.push_str(&format!(
            "  worker {:>2}  {} {:>4}/{:<4} {}\n",
            w.worker_id,
            bar,
            w.completed.len(),
            w.assigned,
            w.state.as_str(),
        ));
    }

    let awaiting = snapshot.awaiting_checkpoint();
    if !awaiting.is_empty() {
        let ids: Vec<String> = awaiting.iter().map(|id| format!("#{}", id)).collect();
        out.push_str(&format!(
            "verification needed in worker(s): {}\n",
            ids.join(", ")
        ));
    }

    out
}

/// Render the end-of-run summary, including failed indices for operator
/// follow-up.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "run {} in {}\n",
        if summary.aborted {
            "aborted"
        } else if summary.is_complete() {
            "finished"
        } else {
            "incomplete"
        },
        format_duration(summary.duration),
    ));
    out.push_str(&format!(
        "  completed: {}/{} units\n",
        summary.completed.len(),
        summary.total_units
    ));
    if !summary.failed.is_empty() {
        let ids: Vec<String> = summary.failed.iter().map(|i| i.to_string()).collect();
        out.push_str(&format!(
            "  failed: {} unit(s): {}\n",
            summary.failed.len(),
            ids.join(", ")
        ));
    }
    if !summary.missing.is_empty() {
        out.push_str(&format!(
            "  missing: {} unit(s), rerun to continue\n",
            summary.missing.len()
        ));
    }
    out.push_str(&format!(
        "  workers: {} succeeded, {} failed\n",
        summary.workers_succeeded, summary.workers_failed
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::WorkerProgress;
    use crate::worker::WorkerState;
    use std::collections::BTreeSet;

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(progress_bar(0, 10, 10), "[----------]");
        assert_eq!(progress_bar(5, 10, 10), "[#####-----]");
        assert_eq!(progress_bar(10, 10, 10), "[##########]");
        assert_eq!(progress_bar(0, 0, 10), "[----------]");
        assert_eq!(progress_bar(20, 10, 10), "[##########]");
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(0.0)), "complete");
        assert_eq!(format_eta(Some(42.0)), "42 sec");
        assert_eq!(format_eta(Some(420.0)), "7 min");
        assert_eq!(format_eta(Some(3900.0)), "1 hr 05 min");
    }

    #[test]
    fn render_lists_workers_and_checkpoint_callout() {
        let mut paused = WorkerProgress::new(2, 53);
        paused.state = WorkerState::AwaitingCheckpoint;
        paused.completed = (0..32).collect::<BTreeSet<_>>();
        let mut working = WorkerProgress::new(1, 53);
        working.state = WorkerState::Working;
        working.completed = (100..128).collect::<BTreeSet<_>>();

        let snap = RunSnapshot {
            run_units: 106,
            completed: 60,
            failed: 0,
            elapsed: Duration::from_secs(252),
            eta_secs: Some(480.0),
            workers: vec![working, paused],
        };
        let text = render(&snap);
        assert!(text.contains("progress: 60/106"));
        assert!(text.contains("worker  1"));
        assert!(text.contains("awaiting checkpoint"));
        assert!(text.contains("verification needed in worker(s): #2"));
        assert!(text.contains("eta: 8 min"));
    }

    #[test]
    fn summary_reports_failed_indices() {
        let summary = RunSummary {
            total_units: 12,
            completed: (0..10).collect(),
            failed: [10, 11].into_iter().collect(),
            missing: BTreeSet::new(),
            duration: Duration::from_secs(61),
            workers_succeeded: 3,
            workers_failed: 0,
            aborted: false,
        };
        let text = render_summary(&summary);
        assert!(text.contains("run finished"));
        assert!(text.contains("completed: 10/12"));
        assert!(text.contains("failed: 2 unit(s): 10, 11"));
        assert!(text.contains("3 succeeded, 0 failed"));
    }
}
