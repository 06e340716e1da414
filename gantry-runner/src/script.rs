//! Job script assembly
//!
//! All steps of a job run as one POSIX shell script. Each step is wrapped in
//! timestamped start/completion markers so output can be attributed to a
//! step afterwards; `set -e` stops the script at the first failing command.

use gantry_core::domain::job::Step;

const PREAMBLE: &str = "#!/bin/sh\nset -e\nexec 2>&1\n";
const TIMESTAMP: &str = "\"$(date '+%Y-%m-%d %H:%M:%S')\"";

/// Builds the combined script for a job's steps
pub fn build_script(steps: &[Step]) -> String {
    let mut script = String::from(PREAMBLE);

    for (idx, step) in steps.iter().enumerate() {
        let name = shell_quote(&step.name);

        script.push_str(&format!("\n# Step {}\n", idx + 1));
        script.push_str(&marker("Starting", &name));
        script.push_str(step.run.trim_end());
        script.push('\n');
        script.push_str(&marker("Completed", &name));
    }

    script
}

fn marker(event: &str, quoted_name: &str) -> String {
    format!("printf '=== [%s] {event}: %s ===\\n' {TIMESTAMP} {quoted_name}\n")
}

/// Single-quotes `value` for the shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
