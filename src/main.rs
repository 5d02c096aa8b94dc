use clap::{Parser, Subcommand};

use commands::GlobalArgs;
use dockhand::pipeline::CancelToken;

mod commands;
mod output;

use commands::{clean, notify, plan, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(version = VERSION)]
#[command(about = "Build, scan, package and deploy a containerized application")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full release pipeline
    Run(run::RunArgs),
    /// Prune docker resources on the remote host
    Clean(clean::CleanArgs),
    /// Show the stages and commands a run would execute
    Plan(plan::PlanArgs),
    /// Preview or send the run status notification
    Notify(notify::NotifyArgs),
}

fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        dockhand::log_status!("dockhand", "Interrupt received; stopping after the current stage");
        token.cancel();
    }) {
        dockhand::log_status!("dockhand", "Could not install Ctrl-C handler: {}", e);
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        cancel: CancelToken::new(),
    };
    install_interrupt_handler(&global.cancel);

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
