//! Terminal kiosk
//!
//! Registers with the server once and keeps the registration on disk, so a
//! restarted kiosk stays paired. It then polls its state once a second:
//! while unpaired or idle it shows the PIN, during a session it renders the
//! current `{session_id, token}` code. Tokens are derived locally from the
//! session secret on the server's clock.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use qrcode::QrCode;
use reqwest::StatusCode;
use rollcall_attendance::token;
use rollcall_attendance::{KioskRegistration, KioskState, KioskView, Pin};
use rollcall_core::protocol::{ErrorBody, QrPayload};
use rollcall_core::unix_timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What is currently on screen
#[derive(Debug, PartialEq, Eq)]
enum Screen {
    Pin { state: KioskState, pin: String },
    Code { payload: QrPayload, count: i64 },
}

/// Registration saved between runs, tied to the server that issued it
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedKiosk {
    server: String,
    registration: KioskRegistration,
}

/// Kiosk registration backed by a JSON file
struct RegistrationFile {
    path: PathBuf,
}

impl RegistrationFile {
    fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default path (~/.config/rollcall/kiosk.json)
    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("No config directory"))?;
        Ok(config_dir.join("rollcall").join("kiosk.json"))
    }

    /// The saved registration, if it was issued by `server`
    fn load(&self, server: &str) -> Option<KioskRegistration> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<SavedKiosk>(&contents) {
            Ok(saved) if saved.server == server => Some(saved.registration),
            Ok(saved) => {
                info!("Saved kiosk belongs to {}, registering again", saved.server);
                None
            }
            Err(e) => {
                warn!("Failed to parse kiosk file, registering again: {}", e);
                None
            }
        }
    }

    fn save(&self, server: &str, registration: &KioskRegistration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let saved = SavedKiosk {
            server: server.to_string(),
            registration: registration.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&saved)?)?;
        debug!("Saved kiosk registration to {:?}", self.path);
        Ok(())
    }
}

/// Offset between this machine's clock and the server's
#[derive(Debug, Default, Clone, Copy)]
struct ServerClock {
    offset: i64,
}

impl ServerClock {
    /// Record the server time reported in a response received at `local_now`
    fn observe(&mut self, server_time: i64, local_now: i64) {
        self.offset = server_time - local_now;
    }

    /// Server time corresponding to `local_now`
    fn now(&self, local_now: i64) -> i64 {
        local_now + self.offset
    }
}

/// Result of one state poll
enum Poll {
    View(KioskView),
    /// Unknown kiosk or secret; the registration is no longer valid
    Rejected(String),
}

pub async fn run(server: &str, registration_file: Option<PathBuf>) -> Result<()> {
    let base_url = server.trim_end_matches('/').to_string();
    let http = reqwest::Client::new();
    let file = RegistrationFile::with_path(match registration_file {
        Some(path) => path,
        None => RegistrationFile::default_path()?,
    });

    let mut registration = file.load(&base_url);
    if let Some(saved) = &registration {
        info!("Resuming kiosk {}", saved.kiosk_id);
    }
    let mut clock = ServerClock::default();
    let mut shown: Option<Screen> = None;

    loop {
        if registration.is_none() {
            match register(&http, &base_url).await {
                Ok(fresh) => {
                    info!("Registered kiosk {}", fresh.kiosk_id);
                    if let Err(e) = file.save(&base_url, &fresh) {
                        warn!("Failed to save kiosk registration: {}", e);
                    }
                    registration = Some(fresh);
                    shown = None;
                }
                Err(e) => warn!("Kiosk registration failed: {}", e),
            }
        }

        if let Some(current) = &registration {
            let state_url = format!("{base_url}/api/kiosks/{}/state", current.kiosk_id);
            match poll(&http, &state_url, &current.kiosk_secret).await {
                Ok(Poll::View(view)) => {
                    clock.observe(view.server_time, unix_timestamp());
                    let screen = screen_for(&view, clock.now(unix_timestamp()))?;
                    if shown.as_ref() != Some(&screen) {
                        render(&screen);
                        shown = Some(screen);
                    }
                }
                Ok(Poll::Rejected(detail)) => {
                    warn!(kiosk_id = %current.kiosk_id, "Kiosk rejected by server ({}), registering again", detail);
                    registration = None;
                    continue;
                }
                Err(e) => warn!("Kiosk poll failed: {}", e),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Kiosk stopped");
                return Ok(());
            }
        }
    }
}

async fn register(http: &reqwest::Client, base_url: &str) -> Result<KioskRegistration> {
    Ok(http
        .post(format!("{base_url}/api/kiosks/init"))
        .send()
        .await
        .context("Failed to reach server")?
        .error_for_status()?
        .json()
        .await?)
}

async fn poll(http: &reqwest::Client, url: &str, secret: &str) -> Result<Poll> {
    let response = http.get(url).bearer_auth(secret).send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(Poll::View(response.json().await?));
    }
    let detail = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.detail)
        .unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
        return Ok(Poll::Rejected(detail));
    }
    bail!("{status}: {detail}")
}

/// What to show for a view, with `now` on the server's clock
fn screen_for(view: &KioskView, now: i64) -> Result<Screen> {
    match &view.session {
        Some(session) => {
            let rotate = u32::try_from(session.rotate_seconds).unwrap_or(1);
            let payload =
                token::current_payload(session.secret.as_bytes(), &session.session_id, now, rotate)?;
            debug!(window = token::window_index(now, rotate), "Derived check-in code");
            Ok(Screen::Code {
                payload,
                count: session.attendance_count,
            })
        }
        None => Ok(Screen::Pin {
            state: view.kiosk.state,
            pin: view.kiosk.pin.clone().unwrap_or_default(),
        }),
    }
}

fn render(screen: &Screen) {
    // Clear the terminal
    print!("\x1b[2J\x1b[H");
    match screen {
        Screen::Pin { state, pin } => {
            let grouped = Pin::parse(pin).map(|p| p.grouped()).unwrap_or_else(|_| pin.clone());
            let label = match state {
                KioskState::Unpaired => "REGISTRATION PIN",
                KioskState::Paired => "DISPLAY PIN",
            };
            println!();
            println!("  {}: {}", label, grouped);
            println!();
            match state {
                KioskState::Unpaired => println!("  Ask an administrator to pair this kiosk."),
                KioskState::Paired => println!("  Enter this PIN in the teacher app to start a session."),
            }
        }
        Screen::Code { payload, count } => {
            match serde_json::to_string(payload) {
                Ok(json) => display_qr_code(&json),
                Err(e) => warn!("Failed to encode check-in code: {}", e),
            }
            println!();
            println!("  Scan to check in. Present: {}", count);
        }
    }
}

/// Display a QR code in the terminal
fn display_qr_code(data: &str) {
    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to generate QR code: {}", e);
            return;
        }
    };

    // Render as Unicode block characters for terminal display
    let string = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build();

    for line in string.lines() {
        println!("  {}", line);
    }
}
