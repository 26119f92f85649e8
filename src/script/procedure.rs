//! Bootstrap procedures as ordered stages
//!
//! A [`Procedure`] is the artifact the generator produces: named stages, each
//! with a shell body and a severity. It renders to a single self-contained
//! shell script, or runs stage by stage against an [`Interpreter`].

use crate::error::{FleetError, Result};
use tracing::{info, warn};

/// Heredoc delimiter wrapping the privileged body
const ROOT_DELIMITER: &str = "GUILDSETUP";

/// What a failing stage does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the whole procedure
    Fatal,
    /// Log and continue
    Warning,
}

/// One step of a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Stable identifier, e.g. `docker`
    pub id: &'static str,
    /// Human readable title
    pub title: String,
    /// Shell body; runs in its own subshell with `set -e`
    pub body: String,
    pub severity: Severity,
}

/// A complete bootstrap procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    /// Variable assignments and helper functions shared by every stage
    pub preamble: String,
    pub stages: Vec<Stage>,
    /// Message printed after the last stage
    pub completion: String,
}

/// Builds a procedure stage by stage
#[derive(Debug, Default)]
pub struct ProcedureBuilder {
    preamble: String,
    stages: Vec<Stage>,
    completion: String,
}

impl ProcedureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn fatal(mut self, id: &'static str, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.stages.push(Stage {
            id,
            title: title.into(),
            body: body.into(),
            severity: Severity::Fatal,
        });
        self
    }

    pub fn warning(mut self, id: &'static str, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.stages.push(Stage {
            id,
            title: title.into(),
            body: body.into(),
            severity: Severity::Warning,
        });
        self
    }

    pub fn completion(mut self, message: impl Into<String>) -> Self {
        self.completion = message.into();
        self
    }

    pub fn build(self) -> Procedure {
        Procedure {
            preamble: self.preamble,
            stages: self.stages,
            completion: self.completion,
        }
    }
}

impl Procedure {
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Render the privileged body: preamble plus every stage
    pub fn render_body(&self) -> String {
        let mut script = String::new();
        script.push_str("set -e\n");
        script.push_str(&self.preamble);
        script.push('\n');

        for (index, stage) in self.stages.iter().enumerate() {
            let number = index + 1;
            let title = stage.title.replace('"', "\\\"");
            script.push_str(&format!("\nlog_step \"{}. {}\"\n", number, title));
            script.push_str("set +e\n(\nset -e\n");
            script.push_str(stage.body.trim_matches('\n'));
            script.push_str("\n)\nstage_status=$?\nset -e\n");
            script.push_str("if [ \"$stage_status\" -ne 0 ]; then\n");
            match stage.severity {
                Severity::Fatal => {
                    script.push_str(&format!(
                        "\techo \"Stage {}. {} failed with exit code $stage_status ❌\" >&2\n\texit \"$stage_status\"\n",
                        number, title
                    ));
                }
                Severity::Warning => {
                    script.push_str(&format!(
                        "\techo \"Warning: {}. {} reported a problem, continuing\" >&2\n",
                        number, title
                    ));
                }
            }
            script.push_str("fi\n");
        }

        if !self.completion.is_empty() {
            script.push_str(&format!("\nlog_step \"{}\"\n", self.completion.replace('"', "\\\"")));
        }
        script
    }

    /// Render the full procedure. It re-executes its body under sudo when
    /// not already root, keeping the invoking user in `ORIGINAL_USER`.
    pub fn render(&self) -> String {
        format!(
            "ORIGINAL_USER=${{ORIGINAL_USER:-${{SUDO_USER:-$USER}}}}\n\
             export ORIGINAL_USER\n\
             if [ \"$(id -u)\" = 0 ]; then\n\
             \tGUILD_SHELL=\"bash\"\n\
             elif command -v sudo >/dev/null 2>&1; then\n\
             \techo \"Re-running script with sudo...\"\n\
             \tGUILD_SHELL=\"sudo -E bash\"\n\
             else\n\
             \techo \"This script must be run as root or with sudo.\"\n\
             \texit 1\n\
             fi\n\
             $GUILD_SHELL <<'{delim}'\n\
             {body}\
             {delim}\n\
             exit $?\n",
            delim = ROOT_DELIMITER,
            body = self.render_body(),
        )
    }

    /// Run the stages in order against an interpreter. The first failing
    /// fatal stage stops the run; warnings are recorded and skipped past.
    pub fn execute<I: Interpreter + ?Sized>(&self, interpreter: &mut I) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for stage in &self.stages {
            info!("Running stage {}: {}", stage.id, stage.title);
            let code = interpreter.run(stage);

            let outcome = match (code, stage.severity) {
                (0, _) => StageOutcome::Succeeded,
                (code, Severity::Warning) => {
                    warn!("Stage {} reported exit code {}, continuing", stage.id, code);
                    StageOutcome::Warned(code)
                }
                (code, Severity::Fatal) => StageOutcome::Failed(code),
            };

            let failed = matches!(outcome, StageOutcome::Failed(_));
            report.stages.push((stage.id, outcome));
            if failed {
                warn!("Stage {} failed with exit code {}, aborting", stage.id, code);
                break;
            }
        }

        report
    }
}

/// Executes a single stage body
pub trait Interpreter {
    /// Run the stage and return its exit code
    fn run(&mut self, stage: &Stage) -> i32;
}

/// Result of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Warned(i32),
    Failed(i32),
}

/// Result of running a procedure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub stages: Vec<(&'static str, StageOutcome)>,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.failed_stage().is_none()
    }

    pub fn failed_stage(&self) -> Option<(&'static str, i32)> {
        self.stages.iter().find_map(|(id, outcome)| match outcome {
            StageOutcome::Failed(code) => Some((*id, *code)),
            _ => None,
        })
    }

    pub fn warnings(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StageOutcome::Warned(_)))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ran(&self, id: &str) -> bool {
        self.stages.iter().any(|(stage, _)| *stage == id)
    }

    pub fn into_result(self) -> Result<Self> {
        match self.failed_stage() {
            Some((stage, code)) => Err(FleetError::StageFailed {
                stage: stage.to_string(),
                code,
            }),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct ScriptedInterpreter {
        codes: HashMap<&'static str, i32>,
        seen: Vec<&'static str>,
    }

    impl Interpreter for ScriptedInterpreter {
        fn run(&mut self, stage: &Stage) -> i32 {
            self.seen.push(stage.id);
            self.codes.get(stage.id).copied().unwrap_or(0)
        }
    }

    fn sample() -> Procedure {
        ProcedureBuilder::new()
            .preamble("OS_TYPE=\"ubuntu\"\n")
            .fatal("packages", "Installing packages", "apt-get install -y curl")
            .warning("port-80", "Validating port 80", "exit 1")
            .fatal("docker", "Installing Docker", "echo docker")
            .fatal("network", "Setting up network", "echo network")
            .completion("Done")
            .build()
    }

    #[test]
    fn test_warning_does_not_abort() {
        let mut interpreter = ScriptedInterpreter {
            codes: HashMap::from([("port-80", 1)]),
            seen: Vec::new(),
        };
        let report = sample().execute(&mut interpreter);

        assert!(report.success());
        assert_eq!(report.warnings(), vec!["port-80"]);
        assert_eq!(interpreter.seen, vec!["packages", "port-80", "docker", "network"]);
    }

    #[test]
    fn test_fatal_stops_remaining_stages() {
        let mut interpreter = ScriptedInterpreter {
            codes: HashMap::from([("docker", 100)]),
            seen: Vec::new(),
        };
        let report = sample().execute(&mut interpreter);

        assert_eq!(report.failed_stage(), Some(("docker", 100)));
        assert!(!report.ran("network"));
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, FleetError::StageFailed { code: 100, .. }));
    }

    #[test]
    fn test_render_structure() {
        let text = sample().render();

        assert!(text.starts_with("ORIGINAL_USER=${ORIGINAL_USER:-${SUDO_USER:-$USER}}\n"));
        assert!(text.contains("$GUILD_SHELL <<'GUILDSETUP'\nset -e\n"));
        assert!(text.trim_end().ends_with("GUILDSETUP\nexit $?"));
        assert!(text.contains("log_step \"1. Installing packages\""));
        assert!(text.contains("log_step \"2. Validating port 80\""));
        assert!(text.contains("Warning: 2. Validating port 80 reported a problem"));
        assert!(text.contains("exit \"$stage_status\""));
        assert!(text.contains("log_step \"Done\""));
    }

    #[test]
    fn test_stage_bodies_run_in_subshell() {
        let body = sample().render_body();
        assert!(body.contains("set +e\n(\nset -e\necho docker\n)\nstage_status=$?\n"));
    }
}
