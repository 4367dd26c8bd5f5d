//! Terminal front end of a lab session.

use std::io::ErrorKind;

use console::style;
use dialoguer::{Confirm, Input, Select};
use infralab_orchestrator::{
    Action, Exercise, LabError, MenuChoice, MenuEntry, Notice, ProgressStatus, Prompter,
    ValidationOutcome,
};
use infralab_runner::CommandOutput;

/// Name used when nobody can be asked.
const FALLBACK_USER_NAME: &str = "learner";

/// [`Prompter`] backed by `dialoguer` prompts on the terminal.
#[derive(Debug)]
pub struct TerminalPrompter {
    interactive: bool,
}

impl TerminalPrompter {
    pub const fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

/// Short status marker shared by the menu and `infralab list`.
pub fn status_marker(status: ProgressStatus, locked: bool) -> String {
    match status {
        ProgressStatus::Completed => style("[done]").green().to_string(),
        ProgressStatus::InProgress => style("[open]").cyan().to_string(),
        ProgressStatus::NotStarted if locked => style("[lock]").dim().to_string(),
        ProgressStatus::NotStarted => "[    ]".to_string(),
    }
}

pub fn default_user_name() -> String {
    std::env::var("USER")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_USER_NAME.to_string())
}

fn interrupted(e: &dialoguer::Error) -> bool {
    matches!(e, dialoguer::Error::IO(io) if io.kind() == ErrorKind::Interrupted)
}

impl Prompter for TerminalPrompter {
    fn user_name(&mut self) -> infralab_orchestrator::Result<String> {
        if !self.interactive {
            return Ok(default_user_name());
        }
        Input::<String>::new()
            .with_prompt("What should we call you?")
            .default(default_user_name())
            .interact_text()
            .map_err(LabError::interaction)
    }

    fn choose_exercise(&mut self, entries: &[MenuEntry]) -> infralab_orchestrator::Result<MenuChoice> {
        let mut items: Vec<String> = entries
            .iter()
            .map(|entry| {
                format!(
                    "{} {} ({}, {})",
                    status_marker(entry.status, entry.locked),
                    entry.name,
                    entry.category,
                    entry.difficulty
                )
            })
            .collect();
        items.push("Quit".to_string());

        println!();
        let selection = Select::new()
            .with_prompt("Choose an exercise")
            .items(&items)
            .default(0)
            .interact_opt();

        match selection {
            Ok(Some(index)) if index < entries.len() => {
                Ok(MenuChoice::Exercise(entries[index].id.clone()))
            }
            Ok(_) => Ok(MenuChoice::Quit),
            Err(e) if interrupted(&e) => Ok(MenuChoice::Quit),
            Err(e) => Err(LabError::interaction(e)),
        }
    }

    fn choose_action(&mut self, exercise: &Exercise) -> infralab_orchestrator::Result<Action> {
        let items: Vec<String> = Action::MENU.iter().map(ToString::to_string).collect();

        let selection = Select::new()
            .with_prompt(format!("{}: what next?", exercise.name))
            .items(&items)
            .default(0)
            .interact_opt();

        match selection {
            Ok(Some(index)) => Ok(Action::MENU.get(index).copied().unwrap_or(Action::Back)),
            Ok(None) => Ok(Action::Back),
            Err(e) if interrupted(&e) => Ok(Action::Back),
            Err(e) => Err(LabError::interaction(e)),
        }
    }

    fn confirm(&mut self, question: &str) -> infralab_orchestrator::Result<bool> {
        match Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact_opt()
        {
            Ok(answer) => Ok(answer.unwrap_or(false)),
            Err(e) if interrupted(&e) => Ok(false),
            Err(e) => Err(LabError::interaction(e)),
        }
    }

    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::Entered { name, status } => {
                println!("\n{} {}", style("==>").cyan().bold(), style(name).bold());
                if status == ProgressStatus::Completed {
                    println!("    Already completed; feel free to keep practising.");
                }
            }
            Notice::Blocked { id, unmet } => {
                println!(
                    "{} '{id}' is locked. Complete these first: {}",
                    style("✗").red(),
                    unmet.join(", ")
                );
            }
            Notice::Instructions { name, text } => {
                println!("\n{}\n\n{text}\n", style(name).bold().underlined());
            }
            Notice::Hint {
                text,
                number,
                total,
            } => println!("{} ({number}/{total}) {text}", style("Hint").yellow().bold()),
            Notice::NoHints => println!("No hints available for this exercise."),
            Notice::CommandFinished(output) => print_command_output(&output),
            Notice::Validation(report) => {
                for step in &report.results {
                    let mark = if step.result.passed {
                        style("✓").green()
                    } else {
                        style("✗").red()
                    };
                    println!("  {mark} {}", step.result.message);
                }
                match report.outcome() {
                    ValidationOutcome::Passed => println!("All checks passed."),
                    ValidationOutcome::Failed => println!(
                        "{} of {} checks failed. Fix them and validate again.",
                        report.failures().count(),
                        report.results.len()
                    ),
                    ValidationOutcome::ManualConfirmationRequired => {
                        println!("This exercise has no automatic checks.");
                    }
                }
            }
            Notice::Completed { name, score } => println!(
                "{} Completed {}! Score: {score}",
                style("✓").green().bold(),
                style(name).bold()
            ),
            Notice::NothingToResume => {
                println!("No exercise in progress; opening the menu.");
            }
            Notice::Warning(message) => {
                eprintln!("{} {message}", style("warning:").yellow().bold());
            }
            Notice::Error(e) => eprintln!("{} {e}", style("error:").red().bold()),
        }
    }
}

fn print_command_output(output: &CommandOutput) {
    if !output.stdout.trim().is_empty() {
        println!("{}", output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        eprintln!("{}", style(output.stderr.trim_end()).red());
    }

    let secs = output.duration.as_secs_f64();
    if output.success() {
        println!(
            "{} {} ({secs:.1}s)",
            style("✓").green(),
            style(&output.command).bold()
        );
    } else {
        let code = output
            .exit_code
            .map_or_else(|| "a signal".to_string(), |code| format!("code {code}"));
        println!(
            "{} {} exited with {code} ({secs:.1}s)",
            style("✗").red(),
            style(&output.command).bold()
        );
    }
    if let Some(signal) = output.signal() {
        println!("    {}", style(signal).dim());
    }
}
