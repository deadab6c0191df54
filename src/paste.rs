//! Paste collaborator: delivers a finished transcript to the focused app.
//!
//! Fire-and-forget from the session's perspective. The clipboard
//! implementation runs on a plain thread because `arboard::Clipboard` is not
//! `Send`, and on Linux/X11 the clipboard must stay alive until another app
//! takes ownership of the selection.

/// Destination for non-empty transcripts.
pub trait PasteTarget: Send + Sync {
    fn paste(&self, text: &str);
}

/// Discards transcripts. Stands in for the clipboard in tests and headless
/// runs where no display server is available.
pub struct NullPaste;

impl PasteTarget for NullPaste {
    fn paste(&self, text: &str) {
        log::info!("Paste target disabled; dropping {} chars", text.len());
    }
}

/// Places the transcript on the system clipboard.
pub struct ClipboardPaste;

impl PasteTarget for ClipboardPaste {
    fn paste(&self, text: &str) {
        let text = text.to_string();

        std::thread::spawn(move || {
            let mut clipboard = match arboard::Clipboard::new() {
                Ok(c) => c,
                Err(e) => {
                    log::error!("Clipboard access failed: {}", e);
                    return;
                }
            };

            if let Err(e) = clipboard.set_text(&text) {
                log::error!("Clipboard set failed: {}", e);
                return;
            }

            log::info!("Copied {} chars to clipboard", text.len());

            // On Linux/X11 the clipboard contents vanish when the owner
            // exits, so linger until another app reads the selection.
            #[cfg(target_os = "linux")]
            {
                use std::time::{Duration, Instant};

                let start = Instant::now();
                let timeout = Duration::from_secs(30);

                while start.elapsed() < timeout {
                    std::thread::sleep(Duration::from_millis(100));
                    match clipboard.get_text() {
                        Ok(current) if current == text => {}
                        _ => {
                            log::debug!("Clipboard ownership transferred");
                            break;
                        }
                    }
                }
            }
        });
    }
}
