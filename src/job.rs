//! Opens the three streams for a patch job, drives the hunk-iteration
//! protocol to completion, and publishes progress through a mutex-guarded
//! status record for a polling reader (headless binary or, eventually, an
//! interactive UI).

use crate::patch;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

/// What to patch and where to put the result.
#[derive(Clone, Debug)]
pub struct PatchCommand {
  pub input_file: PathBuf,
  pub patch_file: PathBuf,
  pub output_file: PathBuf,
  pub strict: bool,
}

/// Mirrors `patch::IterStatus` plus the pre-job idle state, so a reader can
/// tell "hasn't started" apart from "just finished a hunk".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum IterState {
  #[default]
  None,
  Next,
  Done,
}

/// The record shared between the worker and a polling reader. `message` is
/// set once the job reaches a terminal error and carries the same class of
/// string listed in the error-handling design's message-class table.
#[derive(Clone, Debug, Default)]
pub struct JobStatus {
  pub hunk_count: u64,
  pub iter_status: IterState,
  pub message: Option<String>,
}

/// The open streams and per-format context for one patch job. Exposed
/// directly (rather than only through [`spawn`]) so an interactive caller
/// can step it a few hunks per UI frame instead of handing it to a worker
/// thread.
pub struct Job {
  rom: fs_err::File,
  output: fs_err::File,
  patch: fs_err::File,
  ctx: patch::Context,
}

impl Job {
  pub fn open(cmd: &PatchCommand) -> Result<Self, patch::TerminalError> {
    let mut rom = fs_err::File::open(&cmd.input_file)?;
    let mut patch = fs_err::File::open(&cmd.patch_file)?;
    let mut output = fs_err::File::create(&cmd.output_file)?;

    let kind = patch::detect(&mut patch)?;
    ::log::debug!("detected patch kind: {kind}");
    let ctx = patch::start(kind, &mut rom, &mut patch, &mut output)?;

    if cmd.strict {
      if let patch::Context::Bps(state) = &ctx {
        let input_len = rom.metadata()?.len();
        if input_len != state.source_size {
          return Err(patch::TerminalError::InvalidInputSize);
        }
      }
    }

    Ok(Job { rom, output, patch, ctx })
  }

  /// Advances by exactly one hunk/command.
  pub fn step(&mut self) -> io::Result<Result<patch::IterStatus, patch::FormatError>> {
    let result = patch::next(&mut self.ctx, &mut self.rom, &mut self.output, &mut self.patch);
    if let patch::Context::Bps(state) = &self.ctx {
      ::log::trace!("BPS job progress: output_offset={}", state.output_offset());
    }
    result
  }

  /// Advances by up to `max` hunks, stopping early on `Done` or an error.
  /// Intended for an interactive caller budgeting a fixed amount of work
  /// per UI frame (a recommended `max` of 10).
  pub fn step_batch(
    &mut self,
    max: usize,
  ) -> io::Result<Result<patch::IterStatus, patch::FormatError>> {
    let mut last = patch::IterStatus::Next;
    for _ in 0..max {
      match self.step()? {
        Ok(patch::IterStatus::Done) => return Ok(Ok(patch::IterStatus::Done)),
        Ok(patch::IterStatus::Next) => last = patch::IterStatus::Next,
        Err(e) => return Ok(Err(e)),
      }
    }
    Ok(Ok(last))
  }

  /// Finalizes the job, validating the BPS trailer if applicable.
  pub fn finish(&mut self) -> Result<(), patch::TerminalError> {
    patch::end(&self.ctx, &mut self.patch)
  }
}

/// A handle to a job running on a background thread.
pub struct JobHandle {
  status: Arc<Mutex<JobStatus>>,
  worker: Option<thread::JoinHandle<Result<(), patch::TerminalError>>>,
}

impl JobHandle {
  /// Snapshots the current progress. Safe to call from any thread at any
  /// time; never blocks on the worker's I/O, only on the small status lock.
  pub fn status(&self) -> JobStatus {
    self.status.lock().expect("job status mutex poisoned").clone()
  }

  /// Blocks until the worker finishes and returns its terminal result. The
  /// handle remains valid afterward so callers can still read [`status`]
  /// (e.g. to report the final hunk count alongside the result).
  ///
  /// [`status`]: JobHandle::status
  pub fn join(&mut self) -> Result<(), patch::TerminalError> {
    let worker = self.worker.take().expect("JobHandle joined twice");
    let result = worker
      .join()
      .unwrap_or_else(|_| {
        Err(patch::TerminalError::Io(io::Error::new(
          io::ErrorKind::Other,
          "patch worker thread panicked",
        )))
      });
    let mut status = self.status.lock().expect("job status mutex poisoned");
    let message = match &result {
      Ok(()) => format!("Success! Wrote {} hunks", status.hunk_count),
      Err(e) => e.to_string(),
    };
    status.message = Some(message);
    drop(status);
    result
  }
}

/// Opens the streams and runs the job to completion on a background thread,
/// matching the headless execution mode described for the CLI.
pub fn spawn(cmd: PatchCommand) -> JobHandle {
  let status = Arc::new(Mutex::new(JobStatus::default()));
  let worker_status = Arc::clone(&status);

  let worker = thread::spawn(move || -> Result<(), patch::TerminalError> {
    let mut job = Job::open(&cmd)?;
    loop {
      match job.step()? {
        Ok(patch::IterStatus::Next) => {
          let mut status = worker_status.lock().expect("job status mutex poisoned");
          status.hunk_count += 1;
          status.iter_status = IterState::Next;
        }
        Ok(patch::IterStatus::Done) => {
          worker_status.lock().expect("job status mutex poisoned").iter_status = IterState::Done;
          break;
        }
        Err(format_err) => return Err(patch::TerminalError::Format(format_err)),
      }
    }
    job.finish()
  });

  JobHandle { status, worker: Some(worker) }
}
