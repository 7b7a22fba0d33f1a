mod cli;
mod live;
mod replay;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let args = cli::Cli::parse();
    bluebubbles_core::init_logging();

    let res: Result<(), cli::CliError> = match args.cmd {
        cli::Cmd::Replay(r) => replay::replay(args.json, r),
        cli::Cmd::List(l) => live::list(args.json, l),
        cli::Cmd::Search(s) => live::search(args.json, s),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => cli::render_err(args.json, e),
    }
}
