pub mod build;
pub mod scrape;

use anyhow::Result;

use crate::cli::RunArgs;

/// One-shot mode: acquire, then rebuild, in a single invocation.
pub fn run_all(args: &RunArgs) -> Result<()> {
    scrape::run_parts(&args.common, &args.scrape)?;
    build::run_parts(&args.common, &args.build)
}
