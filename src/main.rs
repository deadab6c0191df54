#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // No speech-to-text backend is wired in yet; the app runs unconfigured
    // and shortcut presses point the user at model settings.
    if let Err(e) = dictus::run(None).await {
        log::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
