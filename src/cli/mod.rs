pub mod args;

pub use args::{parse_from, usage, Arguments, Command};
