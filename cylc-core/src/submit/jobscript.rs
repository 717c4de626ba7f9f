//! Job script emission: assembles the POSIX shell file the scheduler hands
//! to the batch-system adapter for submission. Section ordering ported
//! from `job_file.py`.

use std::collections::BTreeMap;

use crate::batch::{BatchAdapter, DirectiveContext};
use crate::taskdef::TaskDefinition;

/// Everything needed to render one job script instance.
pub struct JobScriptContext<'a> {
    pub task_id: String,
    pub namespace_hierarchy: Vec<String>,
    pub dependencies: Vec<String>,
    pub try_number: u32,
    pub job_dir: String,
    pub suite_run_dir: String,
    pub suite_work_dir_root: String,
    pub suite_def_path: String,
    pub suite_uuid: String,
    pub cylc_version: &'static str,
    pub debug: bool,
    pub task_def: &'a TaskDefinition,
}

/// Render the full job script as a single string.
pub fn render_job_script(ctx: &JobScriptContext, adapter: &dyn BatchAdapter) -> String {
    let mut out = String::new();

    // 1. Shebang.
    out.push_str("#!/bin/bash\n");

    // 2. Diagnostic header comments.
    out.push_str(&format!("# job script for {}\n", ctx.task_id));
    out.push_str(&format!("# batch system: {}\n", adapter.key()));

    // 3. Directive block.
    let directive_ctx = DirectiveContext {
        job_name: ctx.task_id.clone(),
        output_path: format!("{}/job.out", ctx.job_dir),
        error_path: format!("{}/job.err", ctx.job_dir),
        execution_time_limit: ctx.task_def.execution_time_limit,
        directives: ctx.task_def.submission.directives.clone(),
    };
    for line in adapter.format_directives(&directive_ctx) {
        out.push_str(&line);
        out.push('\n');
    }

    // 4. Prelude exports.
    out.push_str("export CYLC_DIR\n");
    out.push_str(&format!("export CYLC_VERSION={}\n", ctx.cylc_version));
    if ctx.debug {
        out.push_str("export CYLC_DEBUG=true\n");
    }
    for key in ctx.task_def.environment.keys() {
        out.push_str(&format!("export {key}\n"));
    }
    let fail_signals = adapter.fail_signals().join(" ");
    out.push_str(&format!("export CYLC_FAIL_SIGNALS=\"{fail_signals}\"\n"));

    // 5. cylc__job__inst__cylc_env
    out.push_str("cylc__job__inst__cylc_env() {\n");
    for (key, value) in &ctx.task_def.environment {
        out.push_str(&format!("    export {key}={}\n", shell_quote(value)));
    }
    out.push_str("    export TZ=UTC\n");
    out.push_str(&format!("    export CYLC_SUITE_RUN_DIR={}\n", shell_quote(&ctx.suite_run_dir)));
    out.push_str(&format!("    export CYLC_SUITE_WORK_DIR_ROOT={}\n", shell_quote(&ctx.suite_work_dir_root)));
    out.push_str(&format!("    export CYLC_SUITE_DEF_PATH={}\n", shell_quote(&ctx.suite_def_path)));
    out.push_str(&format!("    export CYLC_SUITE_UUID={}\n", shell_quote(&ctx.suite_uuid)));
    out.push_str(&format!("    export CYLC_TASK_JOB={}\n", shell_quote(&ctx.task_id)));
    out.push_str(&format!(
        "    export CYLC_TASK_NAMESPACE_HIERARCHY={}\n",
        shell_quote(&ctx.namespace_hierarchy.join(" "))
    ));
    out.push_str(&format!("    export CYLC_TASK_DEPENDENCIES={}\n", shell_quote(&ctx.dependencies.join(" "))));
    out.push_str(&format!("    export CYLC_TASK_TRY_NUMBER={}\n", ctx.try_number));
    out.push_str("}\n");

    // 6. Optional user env function.
    if !ctx.task_def.environment.is_empty() {
        out.push_str("cylc__job__inst__user_env() {\n");
        for (key, value) in &ctx.task_def.environment {
            out.push_str(&format!("    export {key}={}\n", tilde_preserving_quote(value)));
        }
        out.push_str("}\n");
    }

    // 7. Optional global init script.
    if let Some(script) = &ctx.task_def.submission.scripts.global_init_script {
        out.push_str("cylc__job__inst__global_init_script() {\n");
        out.push_str(script);
        out.push_str("\n}\n");
    }

    // 8. Fixed-order optional scripts.
    let fragments: [(&str, &Option<String>); 7] = [
        ("init_script", &ctx.task_def.submission.scripts.init_script),
        ("env_script", &ctx.task_def.submission.scripts.env_script),
        ("err_script", &ctx.task_def.submission.scripts.err_script),
        ("pre_script", &ctx.task_def.submission.scripts.pre_script),
        ("script", &ctx.task_def.submission.scripts.script),
        ("post_script", &ctx.task_def.submission.scripts.post_script),
        ("exit_script", &ctx.task_def.submission.scripts.exit_script),
    ];
    for (name, body) in fragments {
        if let Some(body) = body {
            out.push_str(&format!("cylc__job__inst__{name}() {{\n{body}\n}}\n"));
        }
    }

    // 9. Epilogue.
    out.push_str("source \"${CYLC_SUITE_RUN_DIR}/runtime.sh\"\n");
    out.push_str("cylc__job__main\n");
    out.push_str(&format!("#EOF {}\n", ctx.job_dir));

    out
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Preserve a leading `~user/...` so the shell still expands it, but quote
/// the remainder (and any internal whitespace).
fn tilde_preserving_quote(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('~') {
        if let Some(slash) = rest.find('/') {
            let (user, tail) = rest.split_at(slash);
            return format!("~{user}{}", shell_quote(tail));
        }
        return format!("~{}", shell_quote(""));
    }
    shell_quote(value)
}

/// Build the dependency-descriptor strings for `CYLC_TASK_DEPENDENCIES`,
/// one per atomic prerequisite: `name.cycle:message`.
pub fn describe_dependencies(deps: &BTreeMap<String, String>) -> Vec<String> {
    deps.iter().map(|(k, v)| format!("{k}:{v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::LocalShellHandler;
    use crate::cycling::Duration;

    fn def() -> TaskDefinition {
        let mut def = TaskDefinition::new("foo");
        def.execution_time_limit = Some(Duration::from_days(0));
        def
    }

    #[test]
    fn script_sections_appear_in_order() {
        let task_def = def();
        let ctx = JobScriptContext {
            task_id: "foo.1".to_string(),
            namespace_hierarchy: vec!["root".to_string(), "foo".to_string()],
            dependencies: vec!["bar.1:succeeded".to_string()],
            try_number: 1,
            job_dir: "/run/foo/1".to_string(),
            suite_run_dir: "/run".to_string(),
            suite_work_dir_root: "/work".to_string(),
            suite_def_path: "/def".to_string(),
            suite_uuid: "uuid-1".to_string(),
            cylc_version: "1.0.0",
            debug: false,
            task_def: &task_def,
        };
        let script = render_job_script(&ctx, &LocalShellHandler);
        let shebang_pos = script.find("#!/bin/bash").unwrap();
        let cylc_env_pos = script.find("cylc__job__inst__cylc_env").unwrap();
        let epilogue_pos = script.find("cylc__job__main").unwrap();
        let eof_pos = script.find("#EOF").unwrap();
        assert!(shebang_pos < cylc_env_pos);
        assert!(cylc_env_pos < epilogue_pos);
        assert!(epilogue_pos < eof_pos);
    }

    #[test]
    fn tilde_prefixed_values_preserve_expansion() {
        assert_eq!(tilde_preserving_quote("~bob/some path"), "~bob'/some path'");
    }
}
