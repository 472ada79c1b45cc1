//! Interactive questions
//!
//! Everything here is skipped with `--yes`; callers then use the resolved
//! settings as they are.

use anyhow::{Result, bail};
use console::style;
use dialoguer::{Confirm, Input};
use dockhand_provision::validate_user_name;

/// Attempts before a bad user name aborts the command
const MAX_ATTEMPTS: usize = 3;

/// Asks a human something and returns the answer
pub trait Prompter {
    /// Yes/no question; `default` is used when the user just presses enter
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;

    /// Free-text question
    fn input(&self, question: &str, default: Option<&str>) -> Result<String>;
}

/// Terminal prompts
#[derive(Debug, Default)]
pub struct Terminal;

impl Prompter for Terminal {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new()
            .with_prompt(question)
            .default(default)
            .interact()?)
    }

    fn input(&self, question: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::new().with_prompt(question).allow_empty(true);
        if let Some(value) = default {
            input = input.default(value.to_string());
        }
        Ok(input.interact_text()?)
    }
}

/// Same rule the library applies when it validates the configuration
pub fn validate_username(name: &str) -> Result<()> {
    Ok(validate_user_name(name)?)
}

/// Ask which user to add to the `docker` group. Empty input means nobody.
pub fn ask_username(prompter: &dyn Prompter, suggested: Option<&str>) -> Result<Option<String>> {
    for _ in 0..MAX_ATTEMPTS {
        let name = prompter.input("User to add to the docker group (empty for none)", suggested)?;
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        match validate_username(name) {
            Ok(()) => return Ok(Some(name.to_string())),
            Err(e) => eprintln!("{} {e}", style("!").yellow()),
        }
    }
    bail!("No valid user name after {MAX_ATTEMPTS} attempts")
}
