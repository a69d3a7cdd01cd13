mod cli;
mod crc;
mod job;
mod log;
mod patch;

use clap::Parser;
use job::PatchCommand;
use patch::TerminalError;
use std::process::ExitCode;

fn main() -> Report {
  log::init();
  let args = cli::Args::parse();

  let cmd = PatchCommand {
    input_file: args.input,
    patch_file: args.patch,
    output_file: args.output,
    strict: args.strict,
  };

  let mut handle = job::spawn(cmd);
  let result = handle.join();

  match handle.status().message {
    Some(message) => match &result {
      Ok(()) => ::log::info!("{message}"),
      Err(_) => ::log::error!("{message}"),
    },
    None => {}
  }

  Report(result)
}

/// Wraps the job's terminal result so each error variant maps to its own
/// process exit code, instead of collapsing every failure to `1`.
struct Report(Result<(), TerminalError>);

impl std::process::Termination for Report {
  fn report(self) -> ExitCode {
    match self.0 {
      Ok(()) => ExitCode::SUCCESS,
      Err(TerminalError::InvalidHeader) => ExitCode::from(1),
      Err(TerminalError::Io(_)) => ExitCode::from(2),
      Err(TerminalError::Format(_)) => ExitCode::from(3),
      Err(TerminalError::InvalidInputSize) => ExitCode::from(4),
      Err(TerminalError::InvalidOutputSize) => ExitCode::from(5),
      Err(TerminalError::InvalidInputChecksum) => ExitCode::from(6),
      Err(TerminalError::InvalidOutputChecksum) => ExitCode::from(7),
    }
  }
}
