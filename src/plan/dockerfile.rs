//! Dockerfile rendering

use super::{BuildPlan, Instruction};
use std::fmt::Write;

const SYNTAX: &str = "docker/dockerfile:1.7";

fn quote_json(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One instruction as a single Dockerfile line
pub fn render_instruction(instruction: &Instruction) -> String {
    match instruction {
        Instruction::Run {
            command,
            cache_mounts,
            ..
        } => {
            let mut line = String::from("RUN");
            for mount in cache_mounts {
                let _ = write!(
                    line,
                    " --mount=type=cache,target={},sharing=locked",
                    mount.display()
                );
            }
            let _ = write!(line, " {}", command);
            line
        }
        Instruction::Env { vars } => {
            let pairs: Vec<String> = vars
                .iter()
                .map(|(k, v)| format!("{}={}", k, quote_json(v)))
                .collect();
            format!("ENV {}", pairs.join(" "))
        }
        Instruction::Copy {
            from,
            src,
            dest,
            chown,
            chmod,
        } => {
            let mut line = String::from("COPY");
            if let Some(from) = from {
                let _ = write!(line, " --from={}", from);
            }
            if let Some(chown) = chown {
                let _ = write!(line, " --chown={}", chown);
            }
            if let Some(chmod) = chmod {
                let _ = write!(line, " --chmod={}", chmod);
            }
            let _ = write!(line, " {} {}", src, dest.display());
            line
        }
        Instruction::Workdir { path } => format!("WORKDIR {}", path.display()),
        Instruction::User { name } => format!("USER {}", name),
        Instruction::Expose { port } => format!("EXPOSE {}", port),
        // Docker reserves exit code 2, which the launcher uses for config errors
        Instruction::Healthcheck { policy, argv } => format!(
            "HEALTHCHECK {} CMD {} || exit 1",
            policy.docker_flags(),
            argv.join(" ")
        ),
        Instruction::Cmd { argv } => {
            let args: Vec<String> = argv.iter().map(|a| quote_json(a)).collect();
            format!("CMD [{}]", args.join(", "))
        }
    }
}

/// Full Dockerfile text for `plan`
pub fn render(plan: &BuildPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# syntax={}", SYNTAX);
    let _ = writeln!(
        out,
        "# Generated by {} {}; regenerate with `{} plan`",
        crate::NAME,
        crate::VERSION,
        crate::NAME
    );

    for stage in &plan.stages {
        let _ = writeln!(out);
        let _ = writeln!(out, "FROM {} AS {}", stage.base, stage.name);
        for instruction in &stage.instructions {
            let _ = writeln!(out, "{}", render_instruction(instruction));
        }
    }

    out
}
