use dbbundle_lib::Platform;
use dbbundle_lib::config::Matrix;
use dbbundle_lib::consts::DEFAULT_POSTGRES_VERSION;

pub fn cmd_info() {
  println!("dbbundle {}", env!("CARGO_PKG_VERSION"));
  match Platform::current() {
    Some(platform) => println!("Host platform: {}", platform),
    _ => println!("Could not detect a supported host platform."),
  }
  println!("Default PostgreSQL version: {}", DEFAULT_POSTGRES_VERSION);
  match Matrix::builtin() {
    Ok(matrix) => println!("Built-in matrix rows: {}", matrix.len()),
    Err(e) => println!("Built-in matrix is invalid: {}", e),
  }
}
