//! `cpubind`: print every worker's processor binding, one line per worker,
//! in worker order.
//!
//! ```text
//! cpubind query                      one report for this thread
//! cpubind threads -n 4               four threads, spin-token order
//! cpubind ranks -n 3                 three processes, token-ring order
//! cpubind rank                       one rank under an MPI launcher
//! ```
//!
//! Reports go to stdout; diagnostics go to stderr through `tracing`.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cpubind::config::{self, RankConfig};
use cpubind::rank::launch::RankLauncher;
use cpubind::rank::SocketTransport;
use cpubind::team::default_thread_count;
use cpubind::util::WaitBudget;
use cpubind::{
    ConfigError, CpuList, Launch, ReportFormat, ThreadBinding, ThreadTeam, WriterSink, run_rank,
};

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Raise diagnostic verbosity (-v debug, -vv trace); RUST_LOG wins if set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Clone)]
struct ReportArgs {
    /// Report line format
    #[arg(long, value_enum, default_value_t = ReportFormat::Mask)]
    format: ReportFormat,

    /// Pin worker k to the k-th CPU of this list (round-robin), e.g. 0,2-3
    #[arg(long, value_name = "CPULIST")]
    pin: Option<CpuList>,
}

impl ReportArgs {
    fn forward(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--format".into(), self.format_name().into()];
        if let Some(pin) = &self.pin {
            let list = pin
                .as_slice()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            args.push("--pin".into());
            args.push(list.into());
        }
        args
    }

    fn format_name(&self) -> &'static str {
        match self.format {
            ReportFormat::Mask => "mask",
            ReportFormat::List => "list",
            ReportFormat::Json => "json",
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Report the binding of the calling thread
    Query(ReportArgs),

    /// Report every thread of a team, in thread order
    Threads {
        /// Team size [default: OMP_NUM_THREADS, else available parallelism]
        #[arg(short = 'n', long)]
        threads: Option<usize>,

        /// How the first turn is published to the team
        #[arg(long, value_enum, default_value_t = Launch::Pool)]
        launch: Launch,

        /// Yield while waiting for a turn instead of spinning (may perturb bindings)
        #[arg(long)]
        yield_while_waiting: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Spawn N rank processes of this program and report each, in rank order
    Ranks {
        /// Number of ranks
        #[arg(short = 'n', long)]
        ranks: usize,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Run a single rank of a token ring
    Rank {
        /// This rank [default: CPUBIND_RANK or the MPI local rank]
        #[arg(long)]
        rank: Option<usize>,

        /// Number of ranks [default: CPUBIND_WORLD_SIZE or the MPI local size]
        #[arg(long)]
        world_size: Option<usize>,

        /// Directory for rank sockets [default: CPUBIND_RENDEZVOUS_DIR]
        #[arg(long)]
        rendezvous: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let verbose = cli.verbose;

    match run(cli.command, verbose) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cpubind: {err:#}");
            if is_config_error(&err) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
    }
}

fn run(command: Command, verbose: u8) -> Result<ExitCode> {
    match command {
        Command::Query(report) => {
            let results = ThreadTeam::new(1)?
                .pin(report.pin)
                .run(ThreadBinding, WriterSink::stdout(report.format))?;
            Ok(exit_for(results.iter().all(|r| r.is_ok())))
        }
        Command::Threads {
            threads,
            launch,
            yield_while_waiting,
            report,
        } => {
            let n = config::resolve_thread_count(threads, config::process_env, default_thread_count)?;
            let budget = if yield_while_waiting {
                WaitBudget::hot()
            } else {
                WaitBudget::spin()
            };
            let results = ThreadTeam::new(n)?
                .launch(launch)
                .pin(report.pin)
                .wait(budget)
                .run(ThreadBinding, WriterSink::stdout(report.format))?;
            Ok(exit_for(results.iter().all(|r| r.is_ok())))
        }
        Command::Ranks { ranks, report } => {
            if ranks == 0 {
                return Err(ConfigError::ZeroWorld.into());
            }
            let program = std::env::current_exe().context("locating own executable")?;
            let mut args: Vec<OsString> = vec!["rank".into()];
            args.extend(report.forward());
            if verbose > 0 {
                args.push(format!("-{}", "v".repeat(verbose as usize)).into());
            }
            let exits = RankLauncher::new(program, args, ranks)
                .run()
                .context("launching ranks")?;
            Ok(exit_for(exits.iter().all(|e| e.status.success())))
        }
        Command::Rank {
            rank,
            world_size,
            rendezvous,
            report,
        } => {
            let cfg = RankConfig::resolve(rank, world_size, rendezvous, config::process_env)?;
            let transport = SocketTransport::bind(&cfg.rendezvous, cfg.rank, cfg.world_size)
                .with_context(|| format!("binding rank {} socket", cfg.rank))?
                .remove_dir_on_drop(cfg.temporary);
            let outcome = run_rank(
                transport,
                ThreadBinding,
                WriterSink::stdout(report.format),
                report.pin,
            );
            match outcome {
                Ok(_) => Ok(ExitCode::SUCCESS),
                // Query failures were already logged with their operation.
                Err(cpubind::Error::Query(_)) => Ok(ExitCode::from(EXIT_FAILED)),
                Err(err) => Err(err.into()),
            }
        }
    }
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<cpubind::Error>(), Some(cpubind::Error::Config(_)))
}

fn exit_for(all_ok: bool) -> ExitCode {
    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}
