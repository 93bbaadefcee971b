use std::io;

use crossterm::{
    execute,
    style::{
        Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor,
    },
};
use termimad::MadSkin;

use crate::Citation;

pub struct Printer {
    no_color: bool,
    skin: MadSkin,
}

impl Printer {
    #[inline]
    #[must_use]
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            skin: MadSkin::default(),
        }
    }

    // Cannot be a `const fn` because we apply ANSI escape codes for colors
    // based on terminal capabilities, which are determined at runtime.
    #[inline]
    #[must_use]
    pub fn input_prompt(&self) -> String {
        if self.no_color {
            return "You: ".to_owned();
        }
        format!(
            "{}{}You: {}{}",
            SetForegroundColor(Color::Magenta),
            SetAttribute(Attribute::Bold),
            ResetColor,
            SetAttribute(Attribute::Reset)
        )
    }

    #[inline]
    pub fn print_app_message(&self, message: &str) -> io::Result<()> {
        if self.no_color {
            println!("endroid: {message}");
            return Ok(());
        }
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Blue),
            SetAttribute(Attribute::Bold),
            Print("endroid: "),
            ResetColor,
            SetAttribute(Attribute::Reset),
            Print(message),
            Print("\n"),
        )
    }

    #[inline]
    pub fn print_error_message(&self, message: &str) -> io::Result<()> {
        if self.no_color {
            eprintln!("Error: {message}");
            return Ok(());
        }
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Red),
            SetAttribute(Attribute::Bold),
            Print("Error: "),
            ResetColor,
            SetAttribute(Attribute::Reset),
            Print(message),
            Print("\n"),
        )
    }

    #[inline]
    pub fn print_chatbot_prompt(&self, name: &str) -> io::Result<()> {
        if self.no_color {
            println!("{name}:");
            return Ok(());
        }
        execute!(
            io::stdout(),
            SetForegroundColor(Color::Cyan),
            SetAttribute(Attribute::Bold),
            Print(name),
            Print(":\n"),
            ResetColor,
            SetAttribute(Attribute::Reset),
        )
    }

    /// Render a model reply. Replies are markdown per the system prompt,
    /// so run them through the skin unless colors are off.
    #[inline]
    pub fn print_reply(&self, text: &str) {
        if self.no_color {
            println!("{text}");
        } else {
            self.skin.print_text(text);
        }
    }

    #[inline]
    pub fn print_citations(&self, citations: &[Citation]) -> io::Result<()> {
        if citations.is_empty() {
            return Ok(());
        }

        self.print_app_message("Sources:")?;
        for citation in citations {
            let line = match citation.title {
                Some(ref title) => format!("\t{title} ({})", citation.uri),
                None => format!("\t{}", citation.uri),
            };
            self.print_app_message(&line)?;
        }

        Ok(())
    }
}
