//! Renders fetch plans as a bash script equivalent to what the executor does.

use crate::fs_util::{MAX_FLATTEN_ROUNDS, SET_ASIDE_SUFFIX};
use crate::ops::{FetchOperation, FetchPlan, FetchTarget};

pub const INSTRUCTIONS_FILE_NAME: &str = "instructions.txt";

/// Script lines built up one plan at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    lines: Vec<String>,
}

impl Script {
    /// Shebang, strict mode and the working-directory capture, emitted once.
    pub fn new(root: &str) -> Self {
        Self {
            lines: vec![
                "#!/bin/bash".to_string(),
                "set -u".to_string(),
                "root=\"$(pwd)\"".to_string(),
                format!("mkdir -p {}", quote(root)),
                String::new(),
            ],
        }
    }

    /// Returns the script with `plan` appended.
    pub fn with_plan(mut self, plan: &FetchPlan) -> Self {
        self.lines.extend(ScriptRenderer::render_plan(plan));
        self
    }

    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

pub struct ScriptRenderer;

impl ScriptRenderer {
    /// One subshell per item. `set -e` does not apply under `||`, so every
    /// step exits the subshell itself and only that item is skipped.
    pub fn render_plan(plan: &FetchPlan) -> Vec<String> {
        let folder = plan
            .output_folder
            .file_name()
            .unwrap_or(plan.token.as_str());
        let mut lines = vec![
            format!("# {} ({})", plan.token, plan.source_url),
            "cd \"$root\"".to_string(),
            "(".to_string(),
        ];
        for op in &plan.operations {
            lines.extend(Self::render_operation(op).into_iter().map(|line| format!("  {line}")));
        }
        lines.push(format!(
            ") || echo {} >&2",
            quote(&format!("warning: {folder} failed"))
        ));
        lines.push(String::new());
        lines
    }

    pub fn render_operation(op: &FetchOperation) -> Vec<String> {
        match op {
            FetchOperation::CreateDir { path } => {
                vec![format!("mkdir -p {} || exit 1", quote(path.as_str()))]
            }
            FetchOperation::FetchUrl { url, target } => match target {
                FetchTarget::File(path) => vec![format!(
                    "wget -q -O {} {} || exit 1",
                    quote(path.as_str()),
                    quote(url)
                )],
                FetchTarget::Directory(dir) => vec![format!(
                    "wget -q --content-disposition -P {} {} || exit 1",
                    quote(dir.as_str()),
                    quote(url)
                )],
            },
            FetchOperation::ExtractArchive {
                archive,
                into,
                rename_to,
            } => {
                let staging = into.join(format!(".staging-{rename_to}"));
                let target = into.join(rename_to);
                vec![
                    format!("staging={}", quote(staging.as_str())),
                    "rm -rf \"$staging\" && mkdir -p \"$staging\" || exit 1".to_string(),
                    format!(
                        "unzip -q {} -d \"$staging\" || {{ rm -rf \"$staging\"; exit 1; }}",
                        quote(archive.as_str())
                    ),
                    "shopt -s dotglob nullglob".to_string(),
                    "set -- \"$staging\"/*".to_string(),
                    "shopt -u dotglob nullglob".to_string(),
                    format!(
                        "if [ \"$#\" -ne 1 ] || [ ! -d \"$1\" ]; then echo {} >&2; rm -rf \"$staging\"; exit 1; fi",
                        quote(&format!("unexpected archive layout: {archive}"))
                    ),
                    format!("rm -rf {} || exit 1", quote(target.as_str())),
                    format!("mv \"$1\" {} || exit 1", quote(target.as_str())),
                    format!("rm -rf \"$staging\" {}", quote(archive.as_str())),
                ]
            }
            FetchOperation::FlattenNested { dir } => {
                let find = format!(
                    "find {} -type f \\( -iname '*.zip' -o -iname '*.gz' \\)",
                    quote(dir.as_str())
                );
                vec![
                    "rounds=0".to_string(),
                    format!("while [ -n \"$({find} -print -quit)\" ]; do"),
                    format!(
                        "  if [ \"$rounds\" -ge {MAX_FLATTEN_ROUNDS} ]; then echo {} >&2; exit 1; fi",
                        quote(&format!(
                            "nested archives under {dir} still present after {MAX_FLATTEN_ROUNDS} rounds"
                        ))
                    ),
                    "  rounds=$((rounds + 1))".to_string(),
                    "  while IFS= read -r -d '' found; do".to_string(),
                    format!(
                        "    held=\"$(dirname \"$found\")/.$(basename \"$found\").{SET_ASIDE_SUFFIX}\""
                    ),
                    "    mv \"$found\" \"$held\" || exit 1".to_string(),
                    "    case \"$found\" in".to_string(),
                    "      *.[zZ][iI][pP]) unzip -q -o \"$held\" -d \"$(dirname \"$found\")\" || exit 1 ;;"
                        .to_string(),
                    "      *) gunzip -c \"$held\" > \"${found%.*}\" || exit 1 ;;".to_string(),
                    "    esac".to_string(),
                    "    rm -f \"$held\"".to_string(),
                    format!("  done < <({find} -print0)"),
                    "done".to_string(),
                ]
            }
            FetchOperation::InvokeExternal {
                program,
                args,
                dest,
            } => {
                let mut command = vec![quote(program)];
                command.extend(args.iter().map(|arg| quote(arg)));
                vec![
                    format!("{} || exit 1", command.join(" ")),
                    format!(
                        "[ -n \"$(ls -A {})\" ] || {{ echo {} >&2; exit 1; }}",
                        quote(dest.as_str()),
                        quote(&format!("no files downloaded into {dest}"))
                    ),
                ]
            }
        }
    }
}

pub fn instructions(script_name: &str) -> String {
    [
        "To run the shell script, type the following commands in a terminal:".to_string(),
        format!("$ chmod +x {script_name}"),
        format!("$ ./{script_name}"),
        String::new(),
        "Requires bash, wget and unzip; datasets fetched through an external tool".to_string(),
        "also need that tool on PATH. Items that fail print a warning and are skipped.".to_string(),
    ]
    .join("\n")
        + "\n"
}

/// Single-quotes `value` unless it only holds shell-safe characters.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '@' | '%' | '+')
        });
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}
