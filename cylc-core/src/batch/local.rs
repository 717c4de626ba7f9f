//! Local-shell adapter: the default/degenerate batch system. No
//! directives, no polling id (the process pool tracks the child directly),
//! immediate completion once the child process exits.

use crate::batch::adapter::{BatchAdapter, DirectiveContext};

pub struct LocalShellHandler;

impl BatchAdapter for LocalShellHandler {
    fn key(&self) -> &'static str {
        "background"
    }

    fn format_directives(&self, _ctx: &DirectiveContext) -> Vec<String> {
        Vec::new()
    }

    fn submit_command(&self, script_path: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), script_path.to_string()]
    }

    fn poll_command(&self, _ids: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn kill_command(&self, id: &str) -> Vec<String> {
        vec!["kill".to_string(), id.to_string()]
    }

    fn parse_submit_id_from_stdout(&self, _stdout: &str) -> Option<String> {
        None
    }

    fn filter_poll_output(&self, stdout: &str) -> Vec<String> {
        stdout.lines().map(str::to_string).collect()
    }
}
