//! `mdm-login`: runs one login conversation on the text console.
//!
//! Drives a [`DirectSession`] through every phase in order, answering the
//! worker's prompts from stdin, and exits with the session's exit code.

use std::process::ExitCode;

use mdm::cli::{self, LoginArgs};
use mdm::logging;
use mdm::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_help();
            return ExitCode::from(2);
        }
    };
    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    logging::init(Some(&config.logging.level));

    match run(&args, &config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "login aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &LoginArgs, config: &Config) -> Result<ExitCode, MdmError> {
    let display = DisplayInfo::local(
        format!("mdm-login-{}", std::process::id()),
        args.display.clone(),
    );
    let (session, mut events) = DirectSession::builder(display)
        .config(config.session.clone())
        .accounting(config.accounting.sink())
        .spawn();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut outcome = ExitCode::FAILURE;

    tracing::info!(service = %args.service, display = %args.display, "starting login");
    session.start_conversation().await?;

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                session.close().await?;
                continue;
            }
        };

        match event {
            SessionEvent::ConversationStarted => match &args.user {
                Some(user) => session.setup_for_user(&args.service, user).await?,
                None => session.setup(&args.service).await?,
            },
            SessionEvent::SetupComplete => session.authenticate().await?,
            SessionEvent::Authenticated => session.authorize().await?,
            SessionEvent::Authorized => session.accredit(CredentialMode::Establish).await?,
            SessionEvent::Accredited => session.open_session().await?,
            SessionEvent::SessionOpened => session.start_session().await?,
            SessionEvent::SessionStarted { pid } => println!("session started (pid {pid})"),

            SessionEvent::InfoQuery(prompt) | SessionEvent::SecretInfoQuery(prompt) => {
                match ask(&prompt, &mut input).await {
                    Some(answer) => session.answer_query(&answer).await?,
                    None => {
                        session.cancel().await?;
                        session.close().await?;
                    }
                }
            }
            SessionEvent::Info(text) => println!("{text}"),
            SessionEvent::Problem(text) => eprintln!("{text}"),

            SessionEvent::SetupFailed(reason)
            | SessionEvent::AuthenticationFailed(reason)
            | SessionEvent::AuthorizationFailed(reason)
            | SessionEvent::AccreditationFailed(reason)
            | SessionEvent::SessionOpenFailed(reason)
            | SessionEvent::SessionStartFailed(reason) => {
                eprintln!("login failed: {reason}");
                session.close().await?;
            }
            SessionEvent::SessionExited { code } => {
                println!("session exited with code {code}");
                outcome = ExitCode::from(u8::try_from(code).unwrap_or(1));
                session.close().await?;
            }
            SessionEvent::SessionDied { signal } => {
                eprintln!("session killed by signal {signal}");
                session.close().await?;
            }
            SessionEvent::WorkerExited { code } => {
                eprintln!("session worker exited with code {code}");
                session.close().await?;
            }
            SessionEvent::WorkerDied { signal } => {
                eprintln!("session worker killed by signal {signal}");
                session.close().await?;
            }
            SessionEvent::Closed => break,
            other => tracing::debug!(event = ?other, "ignored"),
        }
    }

    Ok(outcome)
}

/// Prints `prompt` and reads one line. `None` on end of input.
async fn ask(prompt: &str, input: &mut Input) -> Option<String> {
    let mut stdout = tokio::io::stdout();
    let shown = format!("{} ", prompt.trim_end());
    if let Err(e) = stdout.write_all(shown.as_bytes()).await {
        tracing::warn!(error = %e, "failed to show prompt");
    }
    let _ = stdout.flush().await;

    match input.next_line().await {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read answer");
            None
        }
    }
}
