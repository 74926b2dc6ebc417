//! Runtime placer CLI
//!
//! Places a blueprint into a running engine over its command socket, then
//! hands the spawned object to the operator for interactive control:
//! - `place`: spawn an existing blueprint
//! - `full`: print the console import snippet for a mesh, then spawn the
//!   blueprint it creates

use anyhow::Result;
use clap::{Parser, ValueEnum};
use placer_bridge::{BridgeConfig, WireProfile, config::DEFAULT_PORT};
use placer_core::{PlacerError, Transform, exit_codes};
use placer_session::importer::{DEFAULT_ASSET_PATH, DEFAULT_BLUEPRINT_NAME};
use placer_session::{
    AssetImporter, ConsoleImporter, ControlReply, ControlRequest, ImportRequest, Placement,
    Session, SessionConfig, SessionHandle, request_queue,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Import instructions for a mesh, then placement
    Full,
    /// Place an existing blueprint
    Place,
}

/// Place blueprints into a running engine and control them interactively.
#[derive(Debug, Parser)]
#[command(name = "place-mesh", version, about, long_about = None)]
struct Cli {
    /// Workflow to run.
    #[arg(long, value_enum)]
    action: Action,

    /// Mesh file to import (required for `full`).
    #[arg(long = "obj_path")]
    obj_path: Option<PathBuf>,

    /// Blueprint to spawn (required for `place`).
    #[arg(long = "blueprint_path")]
    blueprint_path: Option<String>,

    /// Content directory for imported assets.
    #[arg(long = "asset_path", default_value = DEFAULT_ASSET_PATH)]
    asset_path: String,

    /// Name of the blueprint created on import.
    #[arg(long = "blueprint_name", default_value = DEFAULT_BLUEPRINT_NAME)]
    blueprint_name: String,

    /// Spawn location as X,Y,Z.
    #[arg(long, default_value = "0,0,100", allow_hyphen_values = true)]
    location: String,

    /// Spawn rotation as Pitch,Yaw,Roll.
    #[arg(long, default_value = "0,0,0", allow_hyphen_values = true)]
    rotation: String,

    /// Spawn scale as X,Y,Z.
    #[arg(long, default_value = "1,1,1", allow_hyphen_values = true)]
    scale: String,

    /// Engine host.
    #[arg(long, env = "PLACER_HOST", default_value = "localhost")]
    host: String,

    /// Engine command port.
    #[arg(long, env = "PLACER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Wire profile: `unrealcv` (framed, tagged) or `line`.
    #[arg(long, default_value = "unrealcv")]
    wire: WireProfile,

    /// Skip the confirmation prompt of the `full` workflow.
    #[arg(short = 'y', long)]
    yes: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(exit_codes::SETUP)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(exit_codes::SETUP);
        }
    };

    let outcome = runtime.block_on(async {
        let input = BufReader::new(tokio::io::stdin()).lines();
        run(cli, input, interrupt_signal()).await
    });
    let code = match outcome {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            exit_code(&e)
        }
    };
    // A pending stdin read holds a blocking thread that never finishes
    runtime.shutdown_background();
    ExitCode::from(code)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PlacerError>() {
        Some(e) => e.exit_code(),
        None => exit_codes::SETUP,
    }
}

/// Flips to `true` on the first Ctrl+C
fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                let _ = tx.send(true);
            }
            Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });
    rx
}

/// Resolves once an interrupt has been seen; never if the listener is gone
async fn interrupted(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|&hit| hit).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run<R>(cli: Cli, mut input: Lines<R>, stop: watch::Receiver<bool>) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let transform = Transform::parse(&cli.location, &cli.rotation, &cli.scale)?;

    let blueprint = match cli.action {
        Action::Place => cli.blueprint_path.clone().ok_or_else(|| {
            PlacerError::Setup("--blueprint_path is required for --action place".into())
        })?,
        Action::Full => {
            let mesh_path = cli.obj_path.clone().ok_or_else(|| {
                PlacerError::Setup("--obj_path is required for --action full".into())
            })?;
            let request = ImportRequest {
                mesh_path,
                asset_path: cli.asset_path.clone(),
                blueprint_name: cli.blueprint_name.clone(),
            };
            let blueprint = ConsoleImporter::new(std::io::stdout()).import(&request)?;

            let question = format!(
                "Attempt runtime placement now with path {}? (y/n): ",
                blueprint
            );
            if !cli.yes {
                let answer = tokio::select! {
                    answer = confirm(&mut input, &question) => Some(answer),
                    () = interrupted(stop.clone()) => None,
                };
                if !answer.transpose()?.unwrap_or(false) {
                    info!("Placement skipped");
                    return Ok(());
                }
            }
            blueprint
        }
    };

    place(&cli, &blueprint, transform, input, stop).await
}

async fn confirm<R>(input: &mut Lines<R>, question: &str) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    print!("{}", question);
    std::io::stdout().flush()?;
    let answer = input.next_line().await?.unwrap_or_default();
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

async fn place<R>(
    cli: &Cli,
    blueprint: &str,
    transform: Transform,
    input: Lines<R>,
    stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let bridge = BridgeConfig {
        wire: cli.wire,
        ..BridgeConfig::with_address(cli.host.clone(), cli.port)
    };
    let config = SessionConfig::default();
    let mut session = Session::new(bridge, config.clone());

    let placed = tokio::select! {
        placed = connect_and_place(&mut session, blueprint, transform) => Some(placed),
        () = interrupted(stop.clone()) => None,
    };
    let Some(placed) = placed else {
        session.terminate().await;
        let interrupted = PlacerError::Connection("interrupted before the object was placed".into());
        return Err(interrupted.into());
    };
    let placement = placed?;
    print_placement(&placement);
    print_hints(&placement.object.id);
    session.enter_interactive()?;

    let (handle, requests) = request_queue(config.queue_capacity);
    let operator = tokio::spawn(forward_input(input, handle));
    let outcome = session.run_until(requests, interrupted(stop)).await;
    operator.abort();

    let report = session.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    outcome?;

    let unconfirmed: Vec<_> = report
        .objects
        .iter()
        .filter(|o| !o.is_fully_confirmed())
        .map(|o| o.id.as_str())
        .collect();
    if !unconfirmed.is_empty() {
        return Err(PlacerError::Update(format!(
            "objects left with unconfirmed components: {}",
            unconfirmed.join(", ")
        ))
        .into());
    }
    Ok(())
}

async fn connect_and_place(
    session: &mut Session,
    blueprint: &str,
    transform: Transform,
) -> placer_core::Result<Placement> {
    session.connect().await?;
    session.place(blueprint, transform).await
}

/// Feed operator lines into the session queue until quit or end of input
async fn forward_input<R>(mut input: Lines<R>, handle: SessionHandle)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    loop {
        let line = match input.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input");
                return;
            }
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: ControlRequest = match line.parse() {
            Ok(request) => request,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match handle.submit(request).await {
            Ok(ControlReply::Terminated) => return,
            Ok(reply) => print_reply(&reply),
            Err(PlacerError::InvalidState(msg)) => {
                eprintln!("{}", msg);
                return;
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

fn print_hints(id: &str) {
    println!("Object spawned with ID: {}", id);
    println!("Control it with:");
    println!("  move {} X,Y,Z | rotate {} P,Y,R | scale {} X,Y,Z", id, id, id);
    println!("  retry {} | list | verify | quit", id);
    println!("  or send raw commands, e.g. vset /object/{}/location X Y Z", id);
}

fn print_placement(placement: &Placement) {
    let object = &placement.object;
    if placement.is_complete() {
        println!(
            "{}: location {} rotation {} scale {}",
            object.id, object.transform.location, object.transform.rotation, object.transform.scale
        );
        return;
    }
    warn!("Placement of {} is partial", object.id);
    for failure in placement.failures() {
        println!("  {} not applied: {}", failure.component, failure.reason);
    }
    println!("Use 'retry {}' to re-send the unconfirmed components", object.id);
}

fn print_reply(reply: &ControlReply) {
    match reply {
        ControlReply::Placement(placement) => print_placement(placement),
        ControlReply::Raw(response) => println!("{:?} {}", response.status, response.message()),
        ControlReply::Objects { objects } => match serde_json::to_string_pretty(objects) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render objects: {}", e),
        },
        ControlReply::Verified { stale } if stale.is_empty() => println!("All objects verified"),
        ControlReply::Verified { stale } => println!("Not verified: {}", stale.join(", ")),
        ControlReply::Terminated => println!("Session ended"),
    }
}
