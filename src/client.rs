//! Command-line client
//!
//! Credentials persist in the user's config directory unless the client
//! runs ephemeral, in which case they live in memory for this invocation
//! only. Every call goes through the refresh coordinator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use rollcall_attendance::{
    CheckInInfo, KioskInfo, Lesson, Location, PairRequest, PairedKiosk, SessionInfo, SessionState,
    StartSessionRequest, StartedSession,
};
use rollcall_auth::client::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, RollcallClient,
    StoragePolicy,
};
use rollcall_core::protocol::{CheckInRequest, CheckInStatus, QrPayload};
use tracing::info;

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server base URL
    #[arg(long, env = "ROLLCALL_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Keep credentials in memory for this run; nothing is written to disk
    #[arg(long)]
    ephemeral: bool,

    /// Start from this access token (with --refresh-token, implies --ephemeral)
    #[arg(long, env = "ROLLCALL_ACCESS_TOKEN", hide_env_values = true, requires = "refresh_token")]
    access_token: Option<String>,

    #[arg(long, env = "ROLLCALL_REFRESH_TOKEN", hide_env_values = true, requires = "access_token")]
    refresh_token: Option<String>,

    /// Credentials file [default: ~/.config/rollcall/credentials.json]
    #[arg(long, env = "ROLLCALL_CREDENTIALS")]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: ClientCommand,
}

impl ClientArgs {
    /// Pick the credential store for this invocation
    fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        if let (Some(access), Some(refresh)) = (&self.access_token, &self.refresh_token) {
            let credential = Credential::new(access.as_str(), refresh.as_str());
            return Ok(Arc::new(MemoryCredentialStore::seeded(credential)));
        }
        if self.ephemeral {
            return Ok(Arc::new(MemoryCredentialStore::new()));
        }
        let store = match &self.credentials {
            Some(path) => FileCredentialStore::with_path(path.clone())?,
            None => FileCredentialStore::new()?,
        };
        Ok(Arc::new(store))
    }
}

#[derive(Subcommand, Debug)]
enum ClientCommand {
    /// Sign in and store the credential
    Login {
        username: String,
        #[arg(long, env = "ROLLCALL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show who is signed in
    Status,
    /// Revoke the credential and forget it
    Logout,
    /// Pair the kiosk showing a registration PIN (admin)
    Pair {
        pin: String,
        #[arg(long, default_value = "")]
        building: String,
        #[arg(long, default_value = "")]
        room: String,
    },
    /// List kiosks (admin)
    Kiosks,
    /// Start a session on the kiosk showing a display PIN (teacher)
    Start {
        display_pin: String,
        /// Candidate lesson as SUBJECT@HH:MM-HH:MM; repeatable
        #[arg(long = "lesson", required = true)]
        lessons: Vec<String>,
        /// Index of the lesson to use instead of the one running now
        #[arg(long)]
        select: Option<usize>,
    },
    /// Close a session
    Close { session_id: String },
    /// List sessions
    Sessions {
        #[arg(long)]
        kiosk: Option<String>,
    },
    /// Show who has checked in
    Attendees {
        session_id: String,
        /// Keep polling until the session closes
        #[arg(long)]
        watch: bool,
        /// Poll interval in seconds
        #[arg(long, default_value = "5")]
        interval: u64,
    },
    /// Submit a scanned code (student)
    CheckIn {
        /// The scanned JSON, e.g. {"session_id":"...","token":"..."}
        payload: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let store = args.credential_store()?;
    let policy = store.policy();
    let client = RollcallClient::new(args.server, store);

    match args.command {
        ClientCommand::Login { username, password } => {
            client.login(&username, &password).await?;
            let me = client.me().await?;
            println!("Signed in as {} ({})", me.name, me.role);
            if policy == StoragePolicy::Ephemeral {
                println!("  Credential kept in memory only");
            }
        }
        ClientCommand::Status => match client.credential() {
            None => println!("Not signed in"),
            Some(credential) => {
                let claims = credential.claims()?;
                println!("Signed in as {} ({})", claims.name, claims.role);
                if let Some(entity_id) = claims.entity_id {
                    println!("  Student id: {}", entity_id);
                }
                match client.me().await {
                    Ok(_) => println!("  Credential is valid"),
                    Err(e) => println!("  Server check failed: {}", e),
                }
            }
        },
        ClientCommand::Logout => {
            client.logout().await?;
            println!("Signed out");
        }
        ClientCommand::Pair { pin, building, room } => {
            let request = PairRequest {
                registration_pin: pin,
                location: Location { building, room },
            };
            let paired: PairedKiosk = client.post("/api/kiosks/pair", &request).await?;
            println!(
                "Paired kiosk {}; display PIN {}",
                paired.kiosk.id,
                paired.display_pin.grouped()
            );
        }
        ClientCommand::Kiosks => {
            let kiosks: Vec<KioskInfo> = client.get("/api/kiosks").await?;
            for kiosk in kiosks {
                println!(
                    "{}  {:?}  {} {}",
                    kiosk.id,
                    kiosk.state,
                    kiosk.building.unwrap_or_default(),
                    kiosk.room.unwrap_or_default()
                );
            }
        }
        ClientCommand::Start {
            display_pin,
            lessons,
            select,
        } => {
            let candidates = lessons
                .iter()
                .map(|lesson| parse_lesson(lesson))
                .collect::<Result<Vec<_>>>()?;
            let request = StartSessionRequest {
                display_pin,
                candidates,
                selected: select,
            };
            let started: StartedSession = client.post("/api/sessions", &request).await?;
            println!("Started {} ({})", started.session.discipline, started.session.id);
        }
        ClientCommand::Close { session_id } => {
            let session: SessionInfo = client.delete(&format!("/api/sessions/{session_id}")).await?;
            println!(
                "Closed {}: {} present",
                session.discipline, session.attendance_count
            );
        }
        ClientCommand::Sessions { kiosk } => {
            let path = match kiosk {
                Some(kiosk) => format!("/api/sessions?kiosk_id={kiosk}"),
                None => "/api/sessions".to_string(),
            };
            let sessions: Vec<SessionInfo> = client.get(&path).await?;
            for session in sessions {
                println!(
                    "{}  {:?}  {}  {}  {} present",
                    session.id,
                    session.state,
                    session.started_at.format("%Y-%m-%d %H:%M"),
                    session.discipline,
                    session.attendance_count
                );
            }
        }
        ClientCommand::Attendees {
            session_id,
            watch,
            interval,
        } => attendees(&client, &session_id, watch, Duration::from_secs(interval.max(1))).await?,
        ClientCommand::CheckIn { payload, email } => {
            let payload: QrPayload =
                serde_json::from_str(&payload).context("Not a check-in code")?;
            let credential = client.credential().ok_or_else(|| anyhow!("Not signed in"))?;
            let claims = credential.claims()?;

            let request = CheckInRequest {
                session_id: payload.session_id,
                token: payload.token,
                student_external_id: claims.entity_id.unwrap_or(claims.sub),
                student_name: claims.name,
                student_email: email,
            };
            let response = client.check_in(&request).await?;
            match response.status {
                CheckInStatus::Marked => println!("Checked in"),
                CheckInStatus::AlreadyMarked => println!("{}", response.message),
            }
        }
    }
    Ok(())
}

async fn attendees(
    client: &RollcallClient,
    session_id: &str,
    watch: bool,
    interval: Duration,
) -> Result<()> {
    let mut seen = HashSet::new();
    loop {
        let list: Vec<CheckInInfo> = client
            .get(&format!("/api/sessions/{session_id}/attendees"))
            .await?;
        for check_in in list {
            if seen.insert(check_in.student_external_id.clone()) {
                println!(
                    "{}  {}  {}",
                    check_in.marked_at.format("%H:%M:%S"),
                    check_in.student_external_id,
                    check_in.student_name
                );
            }
        }
        if !watch {
            return Ok(());
        }

        let session: SessionInfo = client.get(&format!("/api/sessions/{session_id}")).await?;
        if session.state == SessionState::Closed {
            info!("Session closed with {} present", session.attendance_count);
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Parse `SUBJECT@HH:MM-HH:MM`
fn parse_lesson(input: &str) -> Result<Lesson> {
    let Some((subject, times)) = input.rsplit_once('@') else {
        bail!("lesson must look like SUBJECT@HH:MM-HH:MM: {input}");
    };
    let Some((start, end)) = times.split_once('-') else {
        bail!("lesson must look like SUBJECT@HH:MM-HH:MM: {input}");
    };
    Ok(Lesson::new(subject.trim(), start.trim(), end.trim()))
}
