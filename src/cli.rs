use clap::Parser;
use std::path::PathBuf;

/// Applies an IPS or BPS patch to a ROM.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
  /// Input ROM to patch.
  #[arg(short, long)]
  pub input: PathBuf,

  /// IPS or BPS patch file.
  #[arg(short, long)]
  pub patch: PathBuf,

  /// Where to write the patched ROM.
  #[arg(short, long)]
  pub output: PathBuf,

  /// For BPS patches, also check the input file's size against the
  /// patch's declared source size. The source checksum is never checked.
  #[arg(long)]
  pub strict: bool,
}
