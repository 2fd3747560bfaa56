mod assemble;
mod gaps;
mod ocr;
mod run;

pub use run::{run, run_parts};
