//! Re-Museum CLI Tool
//!
//! Command-line interface for analyzing discarded objects, generating
//! stickers and removing sticker backgrounds with the remuse library.

#[cfg(feature = "cli")]
use remuse::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
