//! Subcommands of the `hotchain` binary.

mod node;
pub use node::NodeCommand;

mod backfill;
pub use backfill::BackfillCommand;

mod status;
pub use status::StatusCommand;
