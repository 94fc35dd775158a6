//! Output formatting utilities for the CLI
//!
//! Renders nodes, jobs, and profiling reports as ASCII tables for the
//! terminal, plus small status-line helpers.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use dird_core::job::JobRecord;
use dird_core::rpc::{AnalysisReport, NodeReport};

/// Format the node listing as an ASCII table
pub fn format_nodes(nodes: &[NodeReport]) -> String {
    if nodes.is_empty() {
        return "No nodes known".to_string();
    }

    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "IDENTITY")]
        identity: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "EXPIRY")]
        expiry: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "HOST UPTIME")]
        host_uptime: String,
        #[tabled(rename = "AGENT UPTIME")]
        agent_uptime: String,
        #[tabled(rename = "COMPONENTS")]
        components: usize,
    }

    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| NodeRow {
            identity: n.identity.clone(),
            state: if n.alive { "alive" } else { "expired" }.to_string(),
            expiry: format!("{:.0}s", n.expiry_secs),
            version: dash_if_empty(&n.version),
            host_uptime: dash_if_empty(&n.host_uptime),
            agent_uptime: dash_if_empty(&n.agent_uptime),
            components: n.components.len(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the job listing as an ASCII table
pub fn format_jobs(jobs: &[JobRecord]) -> String {
    if jobs.is_empty() {
        return "No jobs tracked".to_string();
    }

    #[derive(Tabled)]
    struct JobRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "PARENT")]
        parent: String,
        #[tabled(rename = "VERB")]
        verb: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "NODES")]
        nodes: usize,
        #[tabled(rename = "OK")]
        successes: usize,
        #[tabled(rename = "FAILED")]
        failures: usize,
    }

    let rows: Vec<JobRow> = jobs
        .iter()
        .map(|job| JobRow {
            id: truncate(&job.job_id.to_string(), 12),
            parent: truncate(&job.parent_id.to_string(), 12),
            verb: job.verb.clone(),
            state: job.state.to_string(),
            nodes: job.per_node.len(),
            successes: job
                .per_node
                .values()
                .filter(|n| n.success == Some(true))
                .count(),
            failures: job
                .per_node
                .values()
                .filter(|n| n.success == Some(false))
                .count(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Render one job's full record, per-node results included
pub fn format_job_info(job: &JobRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("Job:      {}\n", job.job_id));
    out.push_str(&format!("Parent:   {}\n", job.parent_id));
    out.push_str(&format!("Verb:     {}\n", job.verb));
    out.push_str(&format!("Sha:      {}\n", job.job_sha));
    out.push_str(&format!("State:    {}\n", job.state));
    if let Some(reason) = &job.failure_reason {
        out.push_str(&format!("Reason:   {}\n", reason));
    }

    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "IDENTITY")]
        identity: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "EXEC(S)")]
        execution: String,
        #[tabled(rename = "ROUNDTRIP(S)")]
        roundtrip: String,
        #[tabled(rename = "STDOUT")]
        stdout: String,
        #[tabled(rename = "INFO")]
        info: String,
    }

    let mut rows: Vec<NodeRow> = job
        .per_node
        .iter()
        .map(|(identity, node)| NodeRow {
            identity: identity.to_string(),
            state: node.state.to_string(),
            execution: node
                .execution_seconds
                .map(|t| format!("{:.3}", t))
                .unwrap_or_else(|| "-".to_string()),
            roundtrip: node
                .roundtrip_seconds
                .map(|t| format!("{:.3}", t))
                .unwrap_or_else(|| "-".to_string()),
            stdout: truncate(node.stdout.trim_end(), 40),
            info: truncate(node.info.trim_end(), 40),
        })
        .collect();
    rows.sort_by(|a, b| a.identity.cmp(&b.identity));

    if !rows.is_empty() {
        out.push('\n');
        out.push_str(
            &Table::new(rows)
                .with(Style::rounded())
                .with(Width::wrap(140))
                .to_string(),
        );
    }
    out
}

/// Render a profiling report
pub fn format_analysis(report: &AnalysisReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Subject:                 {}\n", report.subject));
    out.push_str(&format!("Total jobs:              {}\n", report.total_jobs));
    out.push_str(&format!(
        "Total node results:      {}\n",
        report.total_node_count
    ));
    out.push_str(&format!(
        "Successes / failures:    {} / {}\n",
        report.total_successes, report.total_failures
    ));
    out.push_str(&format!(
        "Actual runtime:          {:.3}s\n",
        report.actual_runtime
    ));
    out.push_str(&format!(
        "Combined execution time: {:.3}s\n",
        report.combined_execution_time
    ));
    out.push_str(&format!(
        "Average execution time:  {:.3}s\n",
        report.avg_execution_time
    ));
    if let Some(node) = &report.fastest_node_by_execution {
        out.push_str(&format!("Fastest by execution:    {}\n", node));
    }
    if let Some(node) = &report.slowest_node_by_execution {
        out.push_str(&format!("Slowest by execution:    {}\n", node));
    }
    if let Some(node) = &report.fastest_node_by_roundtrip {
        out.push_str(&format!("Fastest by roundtrip:    {}\n", node));
    }
    if let Some(node) = &report.slowest_node_by_roundtrip {
        out.push_str(&format!("Slowest by roundtrip:    {}\n", node));
    }
    out
}

/// Print an informational status line
pub fn print_info(message: &str) {
    println!("[+] {}", message);
}

/// Print a warning line
pub fn print_warning(message: &str) {
    eprintln!("[-] {}", message);
}

/// Print an error line
pub fn print_error(message: &str) {
    eprintln!("[!] {}", message);
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let kept: String = value.chars().take(width).collect();
        format!("{}…", kept)
    }
}

fn dash_if_empty(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_nodes_empty() {
        assert_eq!(format_nodes(&[]), "No nodes known");
    }

    #[test]
    fn test_format_nodes_table() {
        let nodes = vec![NodeReport {
            identity: "node1".to_string(),
            alive: true,
            expiry_secs: 120.0,
            version: "0.1.0".to_string(),
            host_uptime: "1:00:00".to_string(),
            agent_uptime: "0:05:00".to_string(),
            machine_id: "m-1".to_string(),
            components: vec!["RUN".to_string(), "ARG".to_string()],
        }];
        let table = format_nodes(&nodes);
        assert!(table.contains("node1"));
        assert!(table.contains("alive"));
        assert!(table.contains("120s"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 12), "short");
        let long = truncate("a-rather-long-identifier", 12);
        assert!(long.starts_with("a-rather-lon"));
        assert!(long.ends_with('…'));
    }
}
