//! Test doubles shared by the unit tests of this crate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use infralab_runner::{CommandOutput, RunnerError, ToolRunner};

/// A `ToolRunner` that answers from a script keyed by the joined arguments.
///
/// Unscripted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeRunner {
    responses: HashMap<String, CommandOutput>,
    failures: HashMap<String, fn(String) -> RunnerError>,
    calls: RefCell<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            command: String::new(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            duration: Duration::from_millis(5),
        }
    }

    pub fn respond(mut self, args: &str, output: CommandOutput) -> Self {
        self.responses.insert(args.to_string(), output);
        self
    }

    pub fn fail(mut self, args: &str, error: fn(String) -> RunnerError) -> Self {
        self.failures.insert(args.to_string(), error);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, _work_dir: &Path, args: &[&str]) -> infralab_runner::Result<CommandOutput> {
        let key = args.join(" ");
        self.calls.borrow_mut().push(key.clone());

        let command = format!("terraform {key}");
        if let Some(error) = self.failures.get(&key) {
            return Err(error(command));
        }
        let mut output = self
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Self::output("", "", 0));
        output.command = command;
        Ok(output)
    }
}
