use std::{
    io::{self, IsTerminal, Read as _},
    process,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use clap::Parser as _;
use rustyline::{error::ReadlineError, DefaultEditor};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use endroid::{
    chatbots::{dummy::DummyChatbot, gemini::GeminiChatbot},
    cli::{Args, Command},
    commands::{
        Command as SlashCommand, CommandContext, CommandExecuteError,
    },
    config::{
        load_keys, Config, ConfigError, ConfigManager, DEFAULT_SYSTEM_PROMPT,
    },
    dispatch::{DispatchOptions, Dispatcher, RetryDelay},
    enrich::Enrichment,
    history::{self, HistoryError},
    keypool::KeyPool,
    session::{Session, AUTOSAVE_NAME},
    ui::Printer,
    Chatbot, ChatbotCreationError, Message, Role,
};

const WELCOME_MESSAGES: [&str; 5] = [
    "What can I help with?",
    "Ask me anything.",
    "How can I assist you today?",
    "Ready to chat?",
    "What's on your mind?",
];

#[derive(Debug, Error)]
enum ChatError {
    #[error("Input/output error.")]
    Io(#[from] io::Error),
    #[error("{0}.")]
    Readline(#[from] ReadlineError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    ChatbotCreation(#[from] ChatbotCreationError),
    #[error("{0}")]
    History(#[from] HistoryError),
    #[error("Unknown command.")]
    UnknownCommand,
    #[error("User quit.")]
    Quit,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ENDROID_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(err) = run(args).await {
        if matches!(err, ChatError::Quit) {
            return;
        }
        let printer = Printer::new(false);
        if let Err(print_err) = printer.print_error_message(&err.to_string())
        {
            eprintln!("Error printing message: {print_err}");
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ChatError> {
    let manager = match args.config {
        Some(path) => ConfigManager::at(path),
        None => ConfigManager::new()?,
    };

    let printer = Printer::new(args.no_color);

    match args.command {
        Some(Command::Init) => {
            manager.init_default_config()?;
            println!(
                "Configuration initialized at: {:?}",
                manager.config_path
            );
            Ok(())
        }
        Some(Command::Keys) => {
            let config = manager.load()?;
            let (raw, source) = load_keys(&config);
            let pool = KeyPool::load(&raw);
            printer.print_app_message(&format!(
                "{} key(s) loaded from {source}, {} disabled{}",
                pool.len(),
                pool.disabled_count(),
                if pool.is_fallback() {
                    " (fallback mode: no usable key source found)"
                } else {
                    ""
                }
            ))?;
            Ok(())
        }
        Some(Command::Dummy { prompt }) => {
            let config = manager.load()?;
            let chatbot = Box::new(DummyChatbot::new());
            run_chat(
                chatbot,
                &config,
                &printer,
                args.system_prompt,
                false,
                prompt,
            )
            .await
        }
        Some(Command::Chat {
            model,
            resume,
            prompt,
        }) => {
            let config = manager.load()?;
            let model_name = model
                .map_or_else(|| config.default_model.clone(), |m| m.to_string());
            let chatbot = Box::new(GeminiChatbot::new(
                &model_name,
                Duration::from_secs(config.request_timeout_secs),
                config.grounding,
            )?);
            run_chat(
                chatbot,
                &config,
                &printer,
                args.system_prompt,
                resume,
                prompt,
            )
            .await
        }
        None => {
            let config = manager.load()?;
            let chatbot = Box::new(GeminiChatbot::new(
                &config.default_model,
                Duration::from_secs(config.request_timeout_secs),
                config.grounding,
            )?);
            run_chat(
                chatbot,
                &config,
                &printer,
                args.system_prompt,
                false,
                args.prompt,
            )
            .await
        }
        _ => Err(ChatError::UnknownCommand),
    }
}

async fn run_chat(
    chatbot: Box<dyn Chatbot>,
    config: &Config,
    printer: &Printer,
    system_prompt: Option<String>,
    resume: bool,
    prompt: Option<String>,
) -> Result<(), ChatError> {
    let (raw_keys, _source) = load_keys(config);
    let pool = Arc::new(KeyPool::load(&raw_keys));

    if pool.is_fallback() {
        printer.print_app_message(
            "No usable API keys found; running on the embedded fallback key.",
        )?;
    }

    let dispatcher = Dispatcher::new(
        Arc::clone(&pool),
        chatbot,
        DispatchOptions {
            max_attempts: config.max_attempts,
            retry_delay: RetryDelay::Fixed(Duration::from_millis(
                config.retry_delay_ms,
            )),
            treat_as_transient: None,
        },
    );

    let enrichment = config
        .enrichment
        .then(|| Enrichment::new(Duration::from_secs(10)));

    let mut session = if resume {
        match Session::load(AUTOSAVE_NAME) {
            Ok(saved) => saved,
            Err(err) => {
                printer.print_error_message(&format!(
                    "Could not restore the autosaved session: {err}"
                ))?;
                Session::new()
            }
        }
    } else {
        Session::new()
    };

    if !session.messages.iter().any(|msg| msg.role == Role::System) {
        let prompt_text = system_prompt
            .or_else(|| config.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned());
        session
            .messages
            .insert(0, Message::new(Role::System, prompt_text));
    }

    // One-shot mode: an explicit prompt argument, or piped stdin.
    if let Some(prompt) = prompt {
        let line = if prompt == "-" {
            read_stdin()?
        } else {
            prompt
        };
        return handle_chat_message(
            line,
            &mut session,
            &dispatcher,
            enrichment.as_ref(),
            printer,
        )
        .await;
    }

    if !io::stdin().is_terminal() {
        let line = read_stdin()?;
        return handle_chat_message(
            line,
            &mut session,
            &dispatcher,
            enrichment.as_ref(),
            printer,
        )
        .await;
    }

    printer.print_app_message(pick_welcome())?;

    let mut rl = DefaultEditor::new()?;
    let history_file = history::locate_file(config)?.into_owned();
    // A fresh install has an empty history file; nothing to report.
    let _loaded = rl.load_history(&history_file);

    let input_prompt = printer.input_prompt();

    let result = loop {
        let line = match rl.readline(&input_prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                break Ok(());
            }
            Err(err) => break Err(ChatError::Readline(err)),
        };

        if line.trim().is_empty() {
            continue;
        }

        let _added = rl.add_history_entry(&line);

        if line.starts_with('/') {
            match handle_command(&line, &mut session, &dispatcher, printer) {
                Ok(()) => {}
                Err(ChatError::Quit) => break Ok(()),
                Err(err) => break Err(err),
            }
        } else if let Err(err) = handle_chat_message(
            line,
            &mut session,
            &dispatcher,
            enrichment.as_ref(),
            printer,
        )
        .await
        {
            break Err(err);
        }
    };

    if let Err(err) = rl.save_history(&history_file) {
        warn!(error = %err, "failed to save readline history");
    }

    result
}

fn read_stdin() -> Result<String, ChatError> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer.trim().to_owned())
}

fn pick_welcome() -> &'static str {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.subsec_nanos() as usize);
    WELCOME_MESSAGES[nanos % WELCOME_MESSAGES.len()]
}

fn handle_command(
    line: &str,
    session: &mut Session,
    dispatcher: &Dispatcher,
    printer: &Printer,
) -> Result<(), ChatError> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    let command = match SlashCommand::from_parts(&parts) {
        Ok(command) => command,
        Err(err) => {
            printer.print_error_message(&format!(
                "{err} Use /help for a list of commands."
            ))?;
            return Ok(());
        }
    };

    let mut context = CommandContext::new(
        session,
        dispatcher.chatbot(),
        dispatcher.pool(),
        printer,
    );

    match command.execute(&mut context) {
        Ok(()) => Ok(()),
        Err(CommandExecuteError::Quit) => Err(ChatError::Quit),
        Err(CommandExecuteError::Print(err)) => Err(ChatError::Io(err)),
        Err(err) => {
            printer.print_error_message(&err.to_string())?;
            Ok(())
        }
    }
}

async fn handle_chat_message(
    line: String,
    session: &mut Session,
    dispatcher: &Dispatcher,
    enrichment: Option<&Enrichment>,
    printer: &Printer,
) -> Result<(), ChatError> {
    // Enrichment context is ephemeral: it shapes this dispatch but never
    // lands in the saved conversation.
    let context = match enrichment {
        Some(providers) => providers.gather(&line).await,
        None => None,
    };

    let mut payload = session.messages.clone();
    if let Some(context_text) = context {
        payload.push(Message::new(
            Role::User,
            format!("Background for the next message:\n{context_text}"),
        ));
    }
    payload.push(Message::new(Role::User, line.clone()));

    match dispatcher.send(&payload).await {
        Ok(reply) => {
            printer.print_chatbot_prompt(dispatcher.chatbot().name())?;
            printer.print_reply(&reply.text);
            printer.print_citations(&reply.citations)?;

            // History records the turn only after a successful exchange.
            session.add_message(Role::User, line);
            session.add_message(Role::Model, reply.text);
            if let Err(err) = session.autosave() {
                warn!(error = %err, "autosave failed");
            }
        }
        Err(err) => {
            printer.print_error_message(&err.to_string())?;
        }
    }

    Ok(())
}
