use std::io;

use thiserror::Error;

use crate::{
    keypool::KeyPool,
    session::{Session, SessionError},
    ui::Printer,
    Chatbot, Message, Role,
};

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CommandCreationError {
    #[error("No command specified.")]
    MissingCommand,
    #[error("Invalid command.")]
    Invalid,
    #[error("System prompt is required.")]
    MissingPrompt,
    #[error("Filename is required.")]
    MissingFilename,
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CommandExecuteError {
    #[error("Failed to print message: {0}")]
    Print(#[from] io::Error),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("User quit.")]
    Quit,
}

pub struct CommandContext<'session, 'chatbot, 'pool, 'printer> {
    session: &'session mut Session,
    chatbot: &'chatbot dyn Chatbot,
    pool: &'pool KeyPool,
    printer: &'printer Printer,
}

impl<'session, 'chatbot, 'pool, 'printer>
    CommandContext<'session, 'chatbot, 'pool, 'printer>
{
    #[inline]
    #[must_use]
    pub fn new(
        session: &'session mut Session,
        chatbot: &'chatbot dyn Chatbot,
        pool: &'pool KeyPool,
        printer: &'printer Printer,
    ) -> Self {
        Self {
            session,
            chatbot,
            pool,
            printer,
        }
    }
}

#[non_exhaustive]
pub enum Command<'parts> {
    Clear,
    System { prompt: Message },
    Keys,
    Info,
    Save { filename: &'parts str },
    Load { filename: &'parts str },
    Delete { filename: &'parts str },
    Sessions,
    Help,
    Quit,
}

impl<'parts> Command<'parts> {
    #[inline]
    pub fn from_parts(
        parts: &'parts [&str],
    ) -> Result<Self, CommandCreationError> {
        let Some(command_name) = parts.first() else {
            return Err(CommandCreationError::MissingCommand);
        };

        match *command_name {
            "/clear" | "/c" => Ok(Self::Clear),
            "/system" | "/sys" => {
                if parts.len() > 1 {
                    #[expect(
                        clippy::indexing_slicing,
                        reason = r#"
                            Safe to index: `/system` command requires at
                            least one argument, ensuring `parts` has
                            length >= 2
                        "#
                    )]
                    let new_msg =
                        Message::new(Role::System, parts[1..].join(" "));
                    Ok(Self::System { prompt: new_msg })
                } else {
                    Err(CommandCreationError::MissingPrompt)
                }
            }
            "/keys" | "/k" => Ok(Self::Keys),
            "/info" | "/i" => Ok(Self::Info),
            "/save" | "/s" => parts.get(1).map_or(
                Err(CommandCreationError::MissingFilename),
                |filename| Ok(Self::Save { filename }),
            ),
            "/load" | "/l" => parts.get(1).map_or(
                Err(CommandCreationError::MissingFilename),
                |filename| Ok(Self::Load { filename }),
            ),
            "/delete" | "/d" => parts.get(1).map_or(
                Err(CommandCreationError::MissingFilename),
                |filename| Ok(Self::Delete { filename }),
            ),
            "/sessions" | "/se" => Ok(Self::Sessions),
            "/help" | "/h" => Ok(Self::Help),
            "/quit" | "/q" => Ok(Self::Quit),
            _ => Err(CommandCreationError::Invalid),
        }
    }

    #[inline]
    pub fn execute(
        self,
        context: &mut CommandContext<'_, '_, '_, '_>,
    ) -> Result<(), CommandExecuteError> {
        match self {
            Self::Clear => {
                context.session.messages.clear();
                context.printer.print_app_message("Context cleared.")?;
            }
            Self::System { prompt } => {
                context
                    .session
                    .messages
                    .retain(|msg| msg.role != Role::System);
                context.session.messages.insert(0, prompt);
                context.printer.print_app_message("System prompt set.")?;
            }
            Self::Keys => {
                let summary = format!(
                    "{} key(s) loaded, {} disabled{}",
                    context.pool.len(),
                    context.pool.disabled_count(),
                    if context.pool.is_fallback() {
                        " (fallback mode: no usable key source found)"
                    } else {
                        ""
                    }
                );
                context.printer.print_app_message(&summary)?;
            }
            Self::Info => {
                context.printer.print_app_message(&format!(
                    "Current chatbot: {}",
                    context.chatbot.name()
                ))?;
                context.printer.print_app_message(&format!(
                    "Current model: {}",
                    context.chatbot.model()
                ))?;
                if let &Some(system_msg) = &context
                    .session
                    .messages
                    .iter()
                    .find(|msg| msg.role == Role::System)
                {
                    context.printer.print_app_message(&format!(
                        "System prompt: {}",
                        system_msg.content
                    ))?;
                }
            }
            Self::Save { filename } => {
                context.session.save(filename)?;
                context.printer.print_app_message(&format!(
                    "Session saved to {filename}.json"
                ))?;
            }
            Self::Load { filename } => {
                let loaded_session = Session::load(filename)?;
                *context.session = loaded_session;
                context.printer.print_app_message(&format!(
                    "Session loaded from {filename}.json"
                ))?;
            }
            Self::Delete { filename } => {
                Session::delete(filename)?;
                context.printer.print_app_message(&format!(
                    "Session {filename}.json deleted."
                ))?;
            }
            Self::Sessions => {
                let sessions = Session::list_all()?;
                if sessions.is_empty() {
                    context
                        .printer
                        .print_error_message("No saved sessions found.")?;
                } else {
                    context.printer.print_app_message("Saved sessions:")?;
                    for elem in sessions {
                        context
                            .printer
                            .print_app_message(&format!("\t{elem}"))?;
                    }
                }
            }
            Self::Help => {
                context.printer.print_app_message("Available commands:")?;
                context.printer.print_app_message(
                    "\t/clear or /c - Clear the conversation history (including system prompt)",
                )?;
                context.printer.print_app_message(
                    "\t/system <prompt> or /sys <prompt> - Set the system prompt",
                )?;
                context.printer.print_app_message(
                    "\t/keys or /k - Show API key pool status",
                )?;
                context.printer.print_app_message(
                    "\t/info or /i - Display current chatbot and model information",
                )?;
                context.printer.print_app_message(
                    "\t/save <filename> or /s <filename> - Save the session",
                )?;
                context.printer.print_app_message(
                    "\t/load <filename> or /l <filename> - Load a saved session",
                )?;
                context.printer.print_app_message(
                    "\t/delete <filename> or /d <filename> - Delete a session",
                )?;
                context.printer.print_app_message(
                    "\t/sessions or /se - List all saved sessions",
                )?;
                context.printer.print_app_message(
                    "\t/help or /h - List all available commands",
                )?;
                context.printer.print_app_message(
                    "\t/quit or /q - Exit the application",
                )?;
            }
            Self::Quit => {
                context.printer.print_app_message("Quitting...")?;
                return Err(CommandExecuteError::Quit);
            }
        }

        Ok(())
    }
}
