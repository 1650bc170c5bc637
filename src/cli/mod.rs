//! Command-line front end.
//!
//! Two subcommands share one shape: pair with the peer through the
//! signaling helper, then hand the channel to the bridged command.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;

use crate::session::{Session, SessionConfig, SessionError};
use crate::signal::{CommandTransport, Transport};

/// Helper used when `--sign` is not given.
const DEFAULT_SIGN_HELPER: &str = "./signal-helper";

#[derive(Parser)]
#[command(name = "rtc", version, about = "Communicate with peers - directly, in real time")]
pub struct Cli {
    /// Be quiet, do not output status and progress messages.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Set up a new peer connection.
    Init(PairArgs),
    /// Join a connection initiated by a peer.
    Join(PairArgs),
}

#[derive(Args)]
pub struct PairArgs {
    /// Signaling helper used to exchange session descriptions.
    #[arg(short, long, default_value = DEFAULT_SIGN_HELPER)]
    pub sign: PathBuf,

    /// Command to wire to the data channel, with its arguments.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init(args) => init(args).await,
        Command::Join(args) => join(args).await,
    }
}

/// Offerer: produce the offer, trade it for the answer, run the command.
async fn init(args: PairArgs) -> Result<()> {
    let signal = CommandTransport::new(args.sign);
    let session = Session::new(SessionConfig::default());

    let looper = tokio::spawn({
        let session = session.clone();
        async move { session.run_loop().await }
    });

    let result = async {
        info!("gathering local description");
        let offer = session.initiate().await?;

        info!("sending offer through the signaling helper");
        exchange(&session, signal.send(&offer)).await?;

        info!("waiting for the peer's answer");
        let answer = exchange(&session, signal.receive()).await?;
        session.accept(answer).await?;

        info!("running {}", args.command[0]);
        session.run(&args.command[0], &args.command[1..]).await
    }
    .await;

    let _ = session.close().await;
    let _ = looper.await;

    result.map_err(Into::into)
}

/// Answerer: wait for the offer, answer it, run the command.
async fn join(args: PairArgs) -> Result<()> {
    let signal = CommandTransport::new(args.sign);
    let session = Session::new(SessionConfig::default());

    let looper = tokio::spawn({
        let session = session.clone();
        async move { session.run_loop().await }
    });

    let result = async {
        info!("waiting for the peer's offer");
        let offer = exchange(&session, signal.receive()).await?;

        info!("gathering local description");
        let answer = session.join(offer).await?;

        info!("sending answer through the signaling helper");
        exchange(&session, signal.send(&answer)).await?;

        info!("running {}", args.command[0]);
        session.run(&args.command[0], &args.command[1..]).await
    }
    .await;

    let _ = session.close().await;
    let _ = looper.await;

    result.map_err(Into::into)
}

/// Run one signaling step, funneling its failure into the session cause.
async fn exchange<T>(
    session: &Session,
    step: impl std::future::Future<Output = Result<T, crate::signal::TransportError>>,
) -> Result<T, SessionError> {
    match step.await {
        Ok(value) => Ok(value),
        Err(err) => {
            let cause = SessionError::SignalTransport(err.to_string());
            session.cancel(cause.clone());
            Err(cause)
        }
    }
}
