//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use chrono::Utc;

use vmci_core::TaskState;

use crate::state::AppState;
use crate::store::StoreError;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &AppState) -> Result<String, StoreError> {
    let mut output = String::new();

    collect_worker_metrics(state, &mut output).await?;
    collect_task_metrics(state, &mut output).await?;
    collect_event_metrics(state, &mut output);

    Ok(output)
}

/// Collect worker metrics by liveness.
async fn collect_worker_metrics(state: &AppState, output: &mut String) -> Result<(), StoreError> {
    let workers = state.workers.list().await?;
    let now = Utc::now();
    let timeout = state.config.worker_timeout();

    let alive = workers.iter().filter(|w| w.is_alive(now, timeout)).count();
    let stale = workers.len() - alive;

    writeln!(output, "# HELP vmci_workers Number of known workers by liveness").ok();
    writeln!(output, "# TYPE vmci_workers gauge").ok();
    writeln!(output, "vmci_workers{{alive=\"true\"}} {alive}").ok();
    writeln!(output, "vmci_workers{{alive=\"false\"}} {stale}").ok();
    Ok(())
}

/// Collect task metrics by state.
async fn collect_task_metrics(state: &AppState, output: &mut String) -> Result<(), StoreError> {
    let counts = state.tasks.count_by_state().await?;

    writeln!(output).ok();
    writeln!(output, "# HELP vmci_tasks Number of tasks by state").ok();
    writeln!(output, "# TYPE vmci_tasks gauge").ok();
    for task_state in TaskState::ALL {
        let count = counts.get(&task_state).copied().unwrap_or(0);
        writeln!(
            output,
            "vmci_tasks{{state=\"{}\"}} {count}",
            task_state.as_str()
        )
        .ok();
    }
    Ok(())
}

fn collect_event_metrics(state: &AppState, output: &mut String) {
    writeln!(output).ok();
    writeln!(output, "# HELP vmci_event_subscribers Connected event stream subscribers").ok();
    writeln!(output, "# TYPE vmci_event_subscribers gauge").ok();
    writeln!(output, "vmci_event_subscribers {}", state.events.subscriber_count()).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use vmci_core::{Task, TaskConfiguration, WorkerId};

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = AppState::new(DispatcherConfig::default());
        let output = collect_metrics(&state).await.unwrap();

        assert!(output.contains("vmci_workers{alive=\"true\"} 0"));
        assert!(output.contains("vmci_tasks{state=\"pending\"} 0"));
        assert!(output.contains("vmci_tasks{state=\"failed\"} 0"));
        assert!(output.contains("vmci_event_subscribers 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts() {
        let state = AppState::new(DispatcherConfig::default());
        state.tasks.insert(Task::new(TaskConfiguration::new("m"))).await.unwrap();
        state.tasks.insert(Task::new(TaskConfiguration::new("m"))).await.unwrap();
        state.tasks.claim_pending(&WorkerId::new("w")).await.unwrap();
        state.workers.keep_alive(&WorkerId::new("w")).await.unwrap();

        let output = collect_metrics(&state).await.unwrap();

        assert!(output.contains("vmci_tasks{state=\"pending\"} 1"));
        assert!(output.contains("vmci_tasks{state=\"running\"} 1"));
        assert!(output.contains("vmci_workers{alive=\"true\"} 1"));
        assert!(output.contains("vmci_workers{alive=\"false\"} 0"));
    }
}
