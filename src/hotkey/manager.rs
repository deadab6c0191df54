//! Hotkey manager - device monitoring, edge aggregation, and the gesture
//! driver that turns key edges into session events.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use evdev::{Device, InputEventKind, Key};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{detector::ChordDetector, Chord, KeyEdge};
use crate::gesture::{GestureDisambiguator, GestureIntent, GestureStrategy, ShortcutId};
use crate::session::Event;

/// Debounce duration for chord-down edges. The same physical press can show
/// up on more than one evdev device.
const DEBOUNCE_MS: u64 = 300;

/// Shared state for debouncing down edges across all device monitors.
/// Tracked per shortcut: a toggle press must never swallow a push-to-talk
/// press that follows it closely.
struct DebounceState {
    /// Timestamp of last trigger per shortcut, in milliseconds since start
    last_trigger_ms: [AtomicU64; 2],
    start: Instant,
}

impl DebounceState {
    fn new() -> Self {
        Self::with_start(Instant::now())
    }

    fn with_start(start: Instant) -> Self {
        Self {
            last_trigger_ms: [AtomicU64::new(0), AtomicU64::new(0)],
            start,
        }
    }

    fn cell(&self, shortcut: ShortcutId) -> &AtomicU64 {
        match shortcut {
            ShortcutId::Toggle => &self.last_trigger_ms[0],
            ShortcutId::PushToTalk => &self.last_trigger_ms[1],
        }
    }

    /// Check if this shortcut's down edge should trigger and update its last
    /// trigger time. Returns true if trigger should proceed (not debounced).
    fn should_trigger(&self, shortcut: ShortcutId) -> bool {
        let cell = self.cell(shortcut);
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = cell.load(Ordering::SeqCst);

        if now_ms.saturating_sub(last) >= DEBOUNCE_MS {
            // Try to claim this trigger - only proceed if we win the CAS
            match cell.compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => true,
                Err(_) => {
                    log::trace!("Chord debounce: another device won the race");
                    false
                }
            }
        } else {
            log::trace!(
                "Chord debounced ({}ms since last trigger)",
                now_ms.saturating_sub(last)
            );
            false
        }
    }
}

/// Find all keyboard devices on the system
pub fn find_keyboards() -> Vec<(PathBuf, Device)> {
    evdev::enumerate()
        .filter_map(|(path, device)| {
            // A keyboard should support common keys
            let is_keyboard = device.supported_keys().map_or(false, |keys| {
                keys.contains(Key::KEY_ENTER)
                    && keys.contains(Key::KEY_SPACE)
                    && keys.contains(Key::KEY_A)
                    && keys.contains(Key::KEY_Z)
            });

            if is_keyboard {
                let name = device.name().unwrap_or("Unknown");
                log::info!("Found keyboard device: {:?} ({})", path, name);
                Some((path, device))
            } else {
                None
            }
        })
        .collect()
}

/// Check if we have permission to access input devices
pub fn check_permissions(keyboards: &[(PathBuf, Device)]) -> Result<(), String> {
    if keyboards.is_empty() {
        let all_devices: Vec<_> = evdev::enumerate().collect();

        if all_devices.is_empty() {
            return Err(
                "No input devices found. Ensure you are in the 'input' group:\n\
                 sudo usermod -aG input $USER\n\
                 Then log out and back in."
                    .to_string(),
            );
        } else {
            return Err(format!(
                "Found {} input devices but none appear to be keyboards. \
                 This might be a permissions issue or no keyboard is connected.",
                all_devices.len()
            ));
        }
    }

    Ok(())
}

/// Status information about the hotkey manager
#[derive(Debug, Clone)]
pub struct HotkeyStatus {
    pub active: bool,
    pub device_count: usize,
    pub bindings: String,
    pub error: Option<String>,
}

/// Monitors all keyboard devices and drives gesture disambiguation.
pub struct HotkeyManager {
    cancel_token: CancellationToken,
    status: HotkeyStatus,
}

impl HotkeyManager {
    /// Start monitoring.
    ///
    /// Spawns a task per keyboard device plus one gesture driver task that
    /// owns the [`GestureDisambiguator`] and sends [`Event`]s to the session.
    pub fn start(
        event_tx: mpsc::Sender<Event>,
        bindings: Vec<(ShortcutId, Chord)>,
        strategy: GestureStrategy,
    ) -> Result<Self, String> {
        let keyboards = find_keyboards();
        check_permissions(&keyboards)?;

        let cancel_token = CancellationToken::new();
        let device_count = keyboards.len();
        let bindings_display = bindings
            .iter()
            .map(|(_, chord)| chord.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        log::info!(
            "Starting shortcut monitoring on {} device(s), bindings: [{}], strategy: {:?}",
            device_count,
            bindings_display,
            strategy
        );

        let (edge_tx, edge_rx) = mpsc::channel::<KeyEdge>(32);
        let debounce = Arc::new(DebounceState::new());

        for (path, device) in keyboards {
            let tx = edge_tx.clone();
            let bindings = bindings.clone();
            let cancel = cancel_token.clone();
            let debounce = debounce.clone();
            let path_str = path.to_string_lossy().to_string();

            tokio::spawn(async move {
                monitor_device(path_str, device, bindings, tx, cancel, debounce).await;
            });
        }

        let cancel = cancel_token.clone();
        tokio::spawn(async move {
            run_gesture_driver(edge_rx, event_tx, strategy, cancel).await;
        });

        Ok(Self {
            cancel_token,
            status: HotkeyStatus {
                active: true,
                device_count,
                bindings: bindings_display,
                error: None,
            },
        })
    }

    pub fn status(&self) -> &HotkeyStatus {
        &self.status
    }

    /// Stop all monitoring
    pub fn stop(&self) {
        log::info!("Stopping hotkey manager");
        self.cancel_token.cancel();
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Monitor a single keyboard device for shortcut edges
async fn monitor_device(
    path: String,
    device: Device,
    bindings: Vec<(ShortcutId, Chord)>,
    tx: mpsc::Sender<KeyEdge>,
    cancel: CancellationToken,
    debounce: Arc<DebounceState>,
) {
    let name = device.name().unwrap_or("Unknown").to_string();
    log::info!("Monitoring keyboard device: {} ({})", path, name);

    let mut detector = ChordDetector::new(bindings);

    let mut stream = match device.into_event_stream() {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to create event stream for {}: {}", path, e);
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::info!("Shortcut monitoring cancelled for {}", path);
                break;
            }

            result = stream.next_event() => {
                match result {
                    Ok(ev) => {
                        if let InputEventKind::Key(key) = ev.kind() {
                            if let Some(edge) = detector.process_key(key, ev.value()) {
                                // Down edges are debounced per shortcut
                                // across devices; duplicate up edges are
                                // harmless no-ops in the disambiguator.
                                if let KeyEdge::Down(shortcut) = edge {
                                    if !debounce.should_trigger(shortcut) {
                                        continue;
                                    }
                                }

                                log::debug!("Shortcut edge: {:?}", edge);
                                if let Err(e) = tx.send(edge).await {
                                    log::error!("Failed to send shortcut edge: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Device read error for {} (disconnected?): {}", path, e);
                        break;
                    }
                }
            }
        }
    }

    log::info!("Stopped monitoring device: {}", path);
}

/// Own the disambiguator, arm its hold timer, and forward gesture intents to
/// the session as events.
async fn run_gesture_driver(
    mut edge_rx: mpsc::Receiver<KeyEdge>,
    event_tx: mpsc::Sender<Event>,
    strategy: GestureStrategy,
    cancel: CancellationToken,
) {
    let mut gesture = GestureDisambiguator::new(strategy);
    let mut deadline: Option<(u64, tokio::time::Instant)> = None;

    loop {
        let timer_at = deadline.map(|(_, at)| at);

        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = tokio::time::sleep_until(timer_at.unwrap_or_else(tokio::time::Instant::now)),
                if timer_at.is_some() =>
            {
                let (token, _) = deadline.take().expect("armed timer has a deadline");
                if let Some(intent) = gesture.on_timer_fired(token) {
                    send_intent(&event_tx, intent).await;
                }
            }

            maybe_edge = edge_rx.recv() => {
                let Some(edge) = maybe_edge else { break };
                let outcome = match edge {
                    KeyEdge::Down(shortcut) => gesture.on_key_down(shortcut),
                    KeyEdge::Up(shortcut) => gesture.on_key_up(shortcut),
                };

                if let Some(request) = outcome.arm_timer {
                    deadline = Some((
                        request.token,
                        tokio::time::Instant::now() + request.after,
                    ));
                }
                if let Some(intent) = outcome.intent {
                    // A resolved press cancels any armed timer.
                    deadline = None;
                    send_intent(&event_tx, intent).await;
                }
            }
        }
    }

    log::debug!("Gesture driver stopped");
}

async fn send_intent(event_tx: &mpsc::Sender<Event>, intent: GestureIntent) {
    let event = match intent {
        GestureIntent::ToggleFired => Event::ToggleFired,
        GestureIntent::HoldStarted => Event::HoldStarted,
        GestureIntent::HoldEnded => Event::HoldEnded,
    };
    if let Err(e) = event_tx.send(event).await {
        log::error!("Failed to send gesture event: {}", e);
    }
}
