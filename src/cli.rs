mod args;

pub use args::{Cli, Command, ImportArgs};
