mod acquire;
mod download;
mod metadata;
mod run;

pub use run::{run, run_parts};
