mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dbbundle_lib::{Arch, Database, Os};

use cmd::{MatrixCommand, PostgresCommand, cmd_info, cmd_key, cmd_matrix, cmd_postgres};
use output::{OutputFormat, print_error};

/// dbbundle - Portable database binary packager
#[derive(Parser)]
#[command(name = "dbbundle")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build PostgreSQL from source for the host OS, make it relocatable and upload it
  Postgres {
    /// Target architecture (arm64 or x86_64)
    arch: Arch,

    /// PostgreSQL release to build
    #[arg(long, default_value = dbbundle_lib::consts::DEFAULT_POSTGRES_VERSION)]
    pg_version: String,

    /// Base URL of the source tarball mirror
    #[arg(long, default_value = dbbundle_lib::consts::POSTGRES_SOURCE_BASE_URL)]
    source_url: String,

    /// Credentials JSON file (defaults to DBBUNDLE_S3_* environment variables)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Write the archive under this directory instead of uploading it
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Keep intermediate files in this directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Parallel make jobs
    #[arg(short, long, default_value_t = 4)]
    jobs: usize,
  },

  /// Repackage vendor-published MongoDB and Redis releases
  Matrix {
    /// Matrix JSON file (defaults to the built-in matrix)
    #[arg(long)]
    matrix: Option<PathBuf>,

    /// Only process rows for this database
    #[arg(long)]
    database: Option<Database>,

    /// Credentials JSON file (defaults to DBBUNDLE_S3_* environment variables)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Write archives under this directory instead of uploading them
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Keep intermediate files in this directory
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Rows processed concurrently
    #[arg(short, long, default_value_t = 4)]
    jobs: usize,

    /// Validate the matrix and print the plan without downloading anything
    #[arg(long)]
    check: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Print the storage key for a target
  Key {
    database: Database,
    version: String,
    platform: Os,
    arch: Arch,
  },

  /// Show the host platform and tool version
  Info,
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Postgres {
      arch,
      pg_version,
      source_url,
      credentials,
      output_dir,
      work_dir,
      jobs,
    } => cmd_postgres(PostgresCommand {
      arch,
      version: pg_version,
      source_url,
      credentials,
      output_dir,
      work_dir,
      jobs,
    }),
    Commands::Matrix {
      matrix,
      database,
      credentials,
      output_dir,
      work_dir,
      jobs,
      check,
      format,
    } => cmd_matrix(MatrixCommand {
      matrix,
      database,
      credentials,
      output_dir,
      work_dir,
      jobs,
      check,
      format,
    }),
    Commands::Key {
      database,
      version,
      platform,
      arch,
    } => cmd_key(database, &version, platform, arch),
    Commands::Info => {
      cmd_info();
      Ok(())
    }
  };

  if let Err(err) = result {
    print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}

fn init_tracing(verbose: bool) {
  let default_level = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
