//! storyforge CLI binary. All logic lives in the library; this only maps
//! the outcome to a process exit code.

#[tokio::main]
async fn main() {
    if let Err(e) = storyforge::cli::run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
