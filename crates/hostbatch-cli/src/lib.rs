/// hostbatch command line: run batch files and a scripted session against
/// the reference host

pub mod driver;
pub mod error;

pub use driver::{demo, exec, DemoOutput, ExecOutput, RunOptions};
pub use error::{CliError, Result};
