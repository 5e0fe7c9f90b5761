//! Subcommand implementations.

mod inspect;
mod lifecycle;

pub use inspect::{print_config, print_status};
pub use lifecycle::run;
