use super::{Config, DEFAULT_ALBUM_ID, DEFAULT_PHOTO_COUNT};
use crate::storage::BackendKind;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Asks the user for configuration values that were not supplied any other way.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    interactive: bool,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W, interactive: bool) -> Self {
        Self {
            input,
            output,
            interactive,
        }
    }

    /// Returns the trimmed answer, or `None` for an empty line or end of input.
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        if !self.interactive {
            return Ok(None);
        }

        write!(self.output, "{question}: ")?;
        self.output.flush()?;

        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .context("Failed to read from standard input")?;

        let answer = line.trim();
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }

    /// Prompts for every missing value, in the order a user expects them.
    pub fn fill_missing(&mut self, config: &mut Config) -> Result<()> {
        if config.vk.user_id.is_none() {
            config.vk.user_id = self.ask("Enter VK user ID")?;
        }
        if config.vk.access_token.is_none() {
            config.vk.access_token = self.ask("Enter VK access token")?;
        }
        if config.yandex.token.is_none() && config.uses_backend(BackendKind::YandexDisk) {
            config.yandex.token = self.ask("Enter Yandex Disk token")?;
        }
        if config.vk.album_id.is_none() {
            config.vk.album_id =
                self.ask(&format!("Enter album ID (default '{DEFAULT_ALBUM_ID}')"))?;
        }
        if config.vk.count.is_none() {
            let answer = self.ask(&format!(
                "Enter number of photos to save (default {DEFAULT_PHOTO_COUNT})"
            ))?;
            config.vk.count = answer
                .map(|count| {
                    count
                        .parse::<u32>()
                        .with_context(|| format!("Invalid photo count: {count}"))
                })
                .transpose()?;
        }
        Ok(())
    }
}
