//! In-memory fakes for the process runner (testing only)
//!
//! [`ScriptedRunner`] answers commands from a script instead of the host,
//! so pipeline stages can be driven without git, a packaging client or a
//! container engine installed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, ExecResult, LineSink};

type Effect = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

/// Canned reply to a matched command.
#[derive(Clone)]
pub struct ScriptedResponse {
    output: CommandOutput,
    effect: Option<Effect>,
    interrupts: bool,
}

impl ScriptedResponse {
    /// Exit 0 with `stdout`.
    pub fn ok(stdout: &str) -> Self {
        Self::from_output(CommandOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    /// Exit with `exit_code` and `stderr`.
    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self::from_output(CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    pub fn from_output(output: CommandOutput) -> Self {
        Self {
            output,
            effect: None,
            interrupts: false,
        }
    }

    /// Behave as if the operator interrupted this command: it fails with
    /// [`ExecError::Interrupted`] and every later `capture`/`stream` call is
    /// refused the same way. `cleanup` calls are still answered.
    pub fn interrupted() -> Self {
        Self {
            interrupts: true,
            ..Self::ok("")
        }
    }

    /// Run `effect` (e.g. create the files the real tool would) before
    /// replying.
    pub fn with_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.effect = Some(Arc::new(effect));
        self
    }
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    response: ScriptedResponse,
}

/// A [`CommandRunner`] that replays scripted responses.
///
/// Rules are matched in registration order on program name and argument
/// prefix. Unmatched commands exit 127 with a `no scripted response`
/// message. Every invocation is recorded, refused ones included.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
    interrupted: AtomicBool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program prefix...` with `response`.
    pub fn on(mut self, program: &str, prefix: &[&str], response: ScriptedResponse) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            response,
        });
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any recorded command matches `program prefix...`.
    pub fn invoked(&self, program: &str, prefix: &[&str]) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.matches(program, prefix))
    }

    fn respond(&self, spec: &CommandSpec, honour_interrupt: bool) -> ExecResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        if honour_interrupt && self.interrupted.load(Ordering::SeqCst) {
            return Err(ExecError::Interrupted {
                command: spec.to_string(),
            });
        }

        let rule = self.rules.iter().find(|rule| {
            let prefix: Vec<&str> = rule.prefix.iter().map(String::as_str).collect();
            spec.matches(&rule.program, &prefix)
        });
        match rule {
            Some(rule) if rule.response.interrupts => {
                self.interrupted.store(true, Ordering::SeqCst);
                Err(ExecError::Interrupted {
                    command: spec.to_string(),
                })
            }
            Some(rule) => {
                if let Some(effect) = &rule.response.effect {
                    effect(spec);
                }
                Ok(rule.response.output.clone())
            }
            None => Ok(CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("no scripted response for `{spec}`\n"),
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn capture(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.respond(spec, true)
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: &mut LineSink<'_>,
    ) -> ExecResult<CommandOutput> {
        let output = self.respond(spec, true)?;
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            sink(line);
        }
        Ok(output)
    }

    async fn cleanup(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.respond(spec, false)
    }
}
