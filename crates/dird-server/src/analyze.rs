//! Profiling aggregates over job records

use dird_core::job::JobRecord;
use dird_core::rpc::AnalysisReport;
use dird_core::types::JobState;

/// Aggregate one job
pub fn analyze_job(record: &JobRecord) -> AnalysisReport {
    analyze(record.job_id.to_string(), std::slice::from_ref(record))
}

/// Aggregate every child of an orchestration parent
pub fn analyze_parent(parent_id: &str, records: &[JobRecord]) -> AnalysisReport {
    analyze(parent_id.to_string(), records)
}

fn analyze(subject: String, records: &[JobRecord]) -> AnalysisReport {
    let mut report = AnalysisReport {
        subject,
        total_jobs: records.len(),
        ..AnalysisReport::default()
    };

    let mut min_created: Option<u64> = None;
    let mut max_returned: Option<u64> = None;
    let mut fastest_exec: Option<(f64, String)> = None;
    let mut slowest_exec: Option<(f64, String)> = None;
    let mut fastest_rt: Option<(f64, String)> = None;
    let mut slowest_rt: Option<(f64, String)> = None;

    for record in records {
        min_created = Some(match min_created {
            Some(current) => current.min(record.created_at_ms),
            None => record.created_at_ms,
        });

        for (identity, node) in &record.per_node {
            report.total_node_count += 1;
            match node.state {
                JobState::Succeeded => report.total_successes += 1,
                JobState::Failed | JobState::Timedout | JobState::Nacked => {
                    report.total_failures += 1
                }
                _ => {}
            }

            if let Some(returned) = node.returned_at_ms {
                max_returned = Some(match max_returned {
                    Some(current) => current.max(returned),
                    None => returned,
                });
            }

            if let Some(execution) = node.execution_seconds {
                report.combined_execution_time += execution;
                let name = identity.to_string();
                if fastest_exec.as_ref().map_or(true, |(t, _)| execution < *t) {
                    fastest_exec = Some((execution, name.clone()));
                }
                if slowest_exec.as_ref().map_or(true, |(t, _)| execution > *t) {
                    slowest_exec = Some((execution, name));
                }
            }

            if let Some(roundtrip) = node.roundtrip_seconds {
                let name = identity.to_string();
                if fastest_rt.as_ref().map_or(true, |(t, _)| roundtrip < *t) {
                    fastest_rt = Some((roundtrip, name.clone()));
                }
                if slowest_rt.as_ref().map_or(true, |(t, _)| roundtrip > *t) {
                    slowest_rt = Some((roundtrip, name));
                }
            }
        }
    }

    if let (Some(created), Some(returned)) = (min_created, max_returned) {
        report.actual_runtime = returned.saturating_sub(created) as f64 / 1000.0;
    }

    let timed_nodes = records
        .iter()
        .flat_map(|r| r.per_node.values())
        .filter(|n| n.execution_seconds.is_some())
        .count();
    if timed_nodes > 0 {
        report.avg_execution_time = report.combined_execution_time / timed_nodes as f64;
    }

    report.fastest_node_by_execution = fastest_exec.map(|(_, name)| name);
    report.slowest_node_by_execution = slowest_exec.map(|(_, name)| name);
    report.fastest_node_by_roundtrip = fastest_rt.map(|(_, name)| name);
    report.slowest_node_by_roundtrip = slowest_rt.map(|(_, name)| name);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use dird_core::job::{JobDefinition, JobSpec, NodeResult};
    use dird_core::types::Identity;
    use serde_json::json;

    fn record_with_results(results: &[(&str, bool, f64, f64)]) -> JobRecord {
        let mut def = JobDefinition::new();
        def.set("command", json!("true"));
        let spec = JobSpec::new("RUN", def);
        let targets: Vec<Identity> = results.iter().map(|(n, ..)| Identity::new(*n)).collect();
        let mut record = JobRecord::new(&spec, targets);

        for (name, success, execution, roundtrip) in results {
            let identity = Identity::new(*name);
            record.merge_node(
                &identity,
                NodeResult {
                    state: if *success {
                        JobState::Succeeded
                    } else {
                        JobState::Failed
                    },
                    success: Some(*success),
                    execution_seconds: Some(*execution),
                    roundtrip_seconds: Some(*roundtrip),
                    returned_at_ms: Some(record.created_at_ms + (*roundtrip * 1000.0) as u64),
                    ..NodeResult::pending()
                },
            );
        }
        record
    }

    #[test]
    fn test_analyze_job_totals() {
        let record = record_with_results(&[
            ("n1", true, 1.0, 1.5),
            ("n2", true, 3.0, 3.5),
            ("n3", false, 2.0, 2.5),
        ]);
        let report = analyze_job(&record);

        assert_eq!(report.total_jobs, 1);
        assert_eq!(report.total_node_count, 3);
        assert_eq!(report.total_successes, 2);
        assert_eq!(report.total_failures, 1);
        assert!((report.combined_execution_time - 6.0).abs() < f64::EPSILON);
        assert!((report.avg_execution_time - 2.0).abs() < f64::EPSILON);
        assert_eq!(report.fastest_node_by_execution.as_deref(), Some("n1"));
        assert_eq!(report.slowest_node_by_execution.as_deref(), Some("n2"));
        assert_eq!(report.fastest_node_by_roundtrip.as_deref(), Some("n1"));
        assert_eq!(report.slowest_node_by_roundtrip.as_deref(), Some("n2"));
        // max returned - min created = slowest roundtrip
        assert!((report.actual_runtime - 3.5).abs() < 0.01);
    }

    #[test]
    fn test_analyze_parent_spans_jobs() {
        let a = record_with_results(&[("n1", true, 1.0, 1.0)]);
        let b = record_with_results(&[("n1", true, 2.0, 2.0)]);
        let report = analyze_parent("parent", &[a, b]);

        assert_eq!(report.total_jobs, 2);
        assert_eq!(report.total_node_count, 2);
        assert_eq!(report.total_successes, 2);
        assert!((report.combined_execution_time - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_analyze_empty() {
        let report = analyze_parent("parent", &[]);
        assert_eq!(report.total_jobs, 0);
        assert_eq!(report.total_node_count, 0);
        assert_eq!(report.actual_runtime, 0.0);
        assert!(report.fastest_node_by_execution.is_none());
    }
}
