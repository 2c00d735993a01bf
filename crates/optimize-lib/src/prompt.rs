//! Interactive prompts
//!
//! Adapters and workflows ask questions through [`Prompter`] so that the
//! terminal implementation can be swapped for a scripted one.

use crate::error::Result;
use inquire::{Confirm, Password, PasswordDisplayMode, Text};

pub trait Prompter: Send + Sync {
    /// Free-form line input; an empty answer yields `default` when one is given
    fn input(&self, message: &str, default: Option<&str>) -> Result<String>;

    /// Masked input for passwords
    fn secret(&self, message: &str) -> Result<String>;

    /// Yes/no question; an empty answer yields `default`
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&self, message: &str, default: Option<&str>) -> Result<String> {
        let mut prompt = Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_default(default);
        }
        Ok(prompt.prompt()?.trim().to_string())
    }

    fn secret(&self, message: &str) -> Result<String> {
        Ok(Password::new(message)
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Hidden)
            .prompt()?)
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }
}
