//! Bash script renderer
//!
//! Each step becomes a shell function. The script checks the step first and
//! skips it when already satisfied. A failing required step exits the script;
//! a failing optional step bumps `ERRORS` and the script moves on.
//!
//! In verbose mode every step also prints progress markers on stdout:
//! `DOCKHAND_STEP:<START|DONE|SKIP|FAIL>:<n>:<description>` and a final
//! `DOCKHAND_STEP:COMPLETE:<total>:<errors>`.

use std::convert::Infallible;
use std::fmt::Write as _;

use super::Renderer;
use crate::Manifest;

/// Prefix of the machine-readable progress lines
pub const MARKER_PREFIX: &str = "DOCKHAND_STEP";

/// Renders a manifest as a standalone bash script
#[derive(Debug, Clone)]
pub struct BashRenderer {
    verbose: bool,
    color: bool,
    require_root: bool,
}

impl Default for BashRenderer {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
            require_root: true,
        }
    }
}

impl BashRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit progress markers
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Colorize status lines
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Refuse to run unless executed as root (on by default)
    pub fn require_root(mut self, require: bool) -> Self {
        self.require_root = require;
        self
    }

    fn preamble(&self, out: &mut String, manifest: &Manifest) {
        let _ = writeln!(out, "#!/usr/bin/env bash");
        let _ = writeln!(out, "# {}: {} steps", manifest.name, manifest.len());
        let _ = writeln!(out, "set -uo pipefail");
        let _ = writeln!(out, "export DEBIAN_FRONTEND=noninteractive");
        out.push('\n');

        if self.color {
            out.push_str(
                "GREEN='\\033[0;32m'\nYELLOW='\\033[0;33m'\nRED='\\033[0;31m'\nNC='\\033[0m'\n",
            );
        } else {
            out.push_str("GREEN=''\nYELLOW=''\nRED=''\nNC=''\n");
        }
        out.push_str("ERRORS=0\n\n");

        if self.require_root {
            out.push_str(
                "if [ \"$(id -u)\" -ne 0 ]; then\n    \
                 printf '%berror%b must run as root (try sudo)\\n' \"$RED\" \"$NC\" >&2\n    \
                 exit 1\nfi\n\n",
            );
        }
    }

    fn marker(&self, out: &mut String, action: &str, index: usize, text: &str) {
        if self.verbose {
            let _ = writeln!(out, "    echo {}", quote(&format!("{MARKER_PREFIX}:{action}:{index}:{text}")));
        }
    }
}

impl Renderer for BashRenderer {
    type Output = String;
    type Error = Infallible;

    fn render(&self, manifest: &Manifest) -> Result<String, Infallible> {
        let mut out = String::new();
        self.preamble(&mut out, manifest);

        let total = manifest.len();
        for (i, planned) in manifest.steps.iter().enumerate() {
            let n = i + 1;
            let desc = planned.description();

            let _ = writeln!(out, "# [{n}/{total}] {desc}");
            let _ = writeln!(out, "step_{n}() {{");
            let commands = planned.step.to_bash();
            if commands.is_empty() {
                out.push_str("    :\n");
            }
            for cmd in commands {
                // Braces keep heredocs intact and give one status per command
                let _ = writeln!(out, "{{\n{cmd}\n}} || return 1");
            }
            out.push_str("}\n");

            let _ = writeln!(out, "run_step_{n}() {{");
            self.marker(&mut out, "START", n, desc);
            if let Some(check) = planned.step.check_command() {
                let _ = writeln!(out, "    if {{ {check}; }} >/dev/null 2>&1; then");
                self.marker(&mut out, "SKIP", n, desc);
                let _ = writeln!(
                    out,
                    "    printf '%bskip%b  %s\\n' \"$YELLOW\" \"$NC\" {}",
                    quote(desc)
                );
                out.push_str("        return 0\n    fi\n");
            }
            out.push_str("    if step_");
            let _ = writeln!(out, "{n}; then");
            self.marker(&mut out, "DONE", n, desc);
            let _ = writeln!(out, "    printf '%bok%b    %s\\n' \"$GREEN\" \"$NC\" {}", quote(desc));
            out.push_str("    else\n");
            self.marker(&mut out, "FAIL", n, desc);
            let _ = writeln!(out, "    printf '%berror%b %s\\n' \"$RED\" \"$NC\" {} >&2", quote(desc));
            if planned.is_required() {
                out.push_str("        exit 1\n");
            } else {
                out.push_str("        ERRORS=$((ERRORS + 1))\n");
            }
            out.push_str("    fi\n}\n");
            let _ = writeln!(out, "run_step_{n}\n");
        }

        if self.verbose {
            let _ = writeln!(out, "echo \"{MARKER_PREFIX}:COMPLETE:{total}:$ERRORS\"");
        }
        out.push_str(
            "if [ \"$ERRORS\" -gt 0 ]; then\n    \
             printf '%bdone%b with %d optional step(s) failed\\n' \"$YELLOW\" \"$NC\" \"$ERRORS\"\n\
             else\n    \
             printf '%bdone%b\\n' \"$GREEN\" \"$NC\"\n\
             fi\n",
        );

        Ok(out)
    }
}

/// Single-quote `s` for the shell
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
