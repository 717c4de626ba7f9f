//! SLURM batch-system adapter. Directive-formatting algorithm ported from
//! `job_runner_handlers/slurm.py`: job-name/output/error derived from the
//! job context, `--time` derived from the execution time limit unless an
//! explicit `--time` directive is given, and heterogeneous-job directive
//! groups (`hetjob_<n>_`/`packjob_<n>_`) split and separated.

use regex::Regex;

use crate::batch::adapter::{split_heterogeneous, BatchAdapter, DirectiveContext};
use crate::cycling::Duration;

pub struct SlurmAdapter;

impl SlurmAdapter {
    /// `REC_ID_FROM_SUBMIT_OUT`: `sbatch` prints `Submitted batch job 123`.
    fn submit_id_regex() -> Regex {
        Regex::new(r"Submitted batch job\s+(\d+)").expect("static regex")
    }

    /// `REC_ID_FROM_POLL_OUT`: one id per line from `squeue -h -o %i`.
    fn poll_id_regex() -> Regex {
        Regex::new(r"^\s*(\d+)\s*$").expect("static regex")
    }
}

/// Format a [`Duration`] as SLURM's `[D-]H:MM:SS`/`M:SS` time-limit syntax.
fn format_time_limit(d: &Duration) -> String {
    let total_seconds = d.days * 86_400 + d.hours * 3_600 + d.minutes * 60 + d.seconds;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

impl BatchAdapter for SlurmAdapter {
    fn key(&self) -> &'static str {
        "slurm"
    }

    fn format_directives(&self, ctx: &DirectiveContext) -> Vec<String> {
        let mut lines = vec![
            format!("#SBATCH --job-name={}", ctx.job_name),
            format!("#SBATCH --output={}", ctx.output_path),
            format!("#SBATCH --error={}", ctx.error_path),
        ];

        let (base, groups) = split_heterogeneous(&ctx.directives);

        if !base.contains_key("--time") {
            if let Some(limit) = &ctx.execution_time_limit {
                lines.push(format!("#SBATCH --time={}", format_time_limit(limit)));
            }
        }
        for (key, value) in &base {
            lines.push(format!("#SBATCH {key}={value}"));
        }

        let mut first_group = true;
        for (_, group_directives) in &groups {
            if !first_group {
                lines.push("#SBATCH hetjob".to_string());
            }
            first_group = false;
            for (key, value) in group_directives {
                lines.push(format!("#SBATCH {key}={value}"));
            }
        }
        lines
    }

    fn submit_command(&self, script_path: &str) -> Vec<String> {
        vec!["sbatch".to_string(), script_path.to_string()]
    }

    fn poll_command(&self, ids: &[String]) -> Vec<String> {
        let mut argv = vec!["squeue".to_string(), "-h".to_string(), "-o".to_string(), "%i".to_string(), "-j".to_string()];
        argv.push(ids.join(","));
        argv
    }

    fn kill_command(&self, id: &str) -> Vec<String> {
        vec!["scancel".to_string(), id.to_string()]
    }

    fn parse_submit_id_from_stdout(&self, stdout: &str) -> Option<String> {
        Self::submit_id_regex().captures(stdout).map(|c| c[1].to_string())
    }

    fn filter_poll_output(&self, stdout: &str) -> Vec<String> {
        let re = Self::poll_id_regex();
        stdout
            .lines()
            .filter_map(|line| re.captures(line).map(|c| c[1].to_string()))
            .collect()
    }

    fn fail_signals(&self) -> Vec<&'static str> {
        vec!["SIGTERM", "SIGKILL", "NODE_FAIL"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn scenario_heterogeneous_directives_order_and_separator() {
        let mut directives = BTreeMap::new();
        directives.insert("-p".to_string(), "middle".to_string());
        directives.insert("hetjob_0_--mem".to_string(), "1G".to_string());
        directives.insert("hetjob_0_--nodes".to_string(), "3".to_string());
        directives.insert("hetjob_1_--mem".to_string(), "2G".to_string());
        directives.insert("hetjob_1_--nodes".to_string(), "6".to_string());

        let ctx = DirectiveContext {
            job_name: "foo.1".to_string(),
            output_path: "job.out".to_string(),
            error_path: "job.err".to_string(),
            execution_time_limit: Some(Duration { seconds: 200, ..Duration::ZERO }),
            directives,
        };

        let lines = SlurmAdapter.format_directives(&ctx);
        assert_eq!(
            lines,
            vec![
                "#SBATCH --job-name=foo.1".to_string(),
                "#SBATCH --output=job.out".to_string(),
                "#SBATCH --error=job.err".to_string(),
                "#SBATCH --time=3:20".to_string(),
                "#SBATCH -p=middle".to_string(),
                "#SBATCH --mem=1G".to_string(),
                "#SBATCH --nodes=3".to_string(),
                "#SBATCH hetjob".to_string(),
                "#SBATCH --mem=2G".to_string(),
                "#SBATCH --nodes=6".to_string(),
            ]
        );
    }

    #[test]
    fn explicit_time_directive_suppresses_derived_time() {
        let mut directives = BTreeMap::new();
        directives.insert("--time".to_string(), "1:00:00".to_string());
        let ctx = DirectiveContext {
            job_name: "foo.1".to_string(),
            output_path: "job.out".to_string(),
            error_path: "job.err".to_string(),
            execution_time_limit: Some(Duration { seconds: 200, ..Duration::ZERO }),
            directives,
        };
        let lines = SlurmAdapter.format_directives(&ctx);
        assert!(lines.iter().any(|l| l == "#SBATCH --time=1:00:00"));
        assert!(!lines.iter().any(|l| l == "#SBATCH --time=3:20"));
    }

    #[test]
    fn parses_submit_id_and_filters_poll_output() {
        let adapter = SlurmAdapter;
        let id = adapter.parse_submit_id_from_stdout("Submitted batch job 4567890\n").unwrap();
        assert_eq!(id, "4567890");
        let live = adapter.filter_poll_output("4567890\n4567891\n");
        assert_eq!(live, vec!["4567890".to_string(), "4567891".to_string()]);
    }
}
