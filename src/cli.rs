use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::{self, PlatformProfile};

#[derive(Parser, Debug)]
#[command(
    name = "shelf2pdf",
    version,
    about = "Scrape a Bookshelf/Yuzu ebook page by page and rebuild it as a PDF"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire page images and metadata from a live reader session.
    Scrape(ScrapeArgs),
    /// Rebuild the PDF from already-acquired page images.
    Build(BuildArgs),
    /// Scrape, then build, in one invocation.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = "./output")]
    pub output: PathBuf,

    /// Book identifier (ISBN) as used by the reader URLs.
    #[arg(long)]
    pub book_id: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Platform {
    Vitalsource,
    Yuzu,
}

impl Platform {
    pub fn profile(self) -> PlatformProfile {
        match self {
            Self::Vitalsource => model::VITALSOURCE,
            Self::Yuzu => model::YUZU,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeOpts {
    #[arg(long, value_enum, default_value_t = Platform::Vitalsource)]
    pub platform: Platform,

    /// Base delay unit in seconds for fixed waits.
    #[arg(long, default_value_t = 3)]
    pub delay: u64,

    /// Variance applied to jittered delays (0.5 = ±50%).
    #[arg(long, default_value_t = 0.5)]
    pub delay_variance: f64,

    /// Minimum pause between pages, seconds.
    #[arg(long, default_value_t = 2)]
    pub min_delay: u64,

    /// Maximum pause between pages, seconds.
    #[arg(long, default_value_t = 6)]
    pub max_delay: u64,

    /// Start on this pageid.
    #[arg(long, default_value_t = 0)]
    pub start_page: u64,

    /// Stop after this pageid.
    #[arg(long)]
    pub end_page: Option<u64>,

    /// Path to the Chrome/Chromium executable.
    #[arg(long)]
    pub chrome_exe: Option<PathBuf>,

    /// Disable CORS protections in the scraping browser.
    #[arg(long, default_value_t = false)]
    pub disable_web_security: bool,

    /// Custom user agent string.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Disable the anti-automation launch configuration.
    #[arg(long, default_value_t = false)]
    pub no_stealth: bool,

    /// Only scrape book metadata, skip page acquisition.
    #[arg(long, default_value_t = false)]
    pub metadata_only: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BuildOpts {
    /// OCR language code passed to ocrmypdf.
    #[arg(long, default_value = "eng")]
    pub language: String,

    #[arg(long, default_value_t = false)]
    pub skip_ocr: bool,

    /// Also write a compressed copy of the final PDF.
    #[arg(long, default_value_t = false)]
    pub compress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub scrape: ScrapeOpts,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub build: BuildOpts,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub scrape: ScrapeOpts,

    #[command(flatten)]
    pub build: BuildOpts,
}
