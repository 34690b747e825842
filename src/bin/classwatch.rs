//! classwatch - classroom phone-detection monitor
//!
//! This binary:
//! 1. Logs in as a teacher and signs in to a classroom with its QR payload
//! 2. Streams the classroom camera and polls the detector
//! 3. Reports violations and prints alerts pushed by the backend
//! 4. Runs until Ctrl-C, then tears the session down

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};

use classwatch::{BackendClient, MonitorConfig, MonitorSession, SessionContext};

#[derive(Parser, Debug)]
#[command(author, version, about = "Classroom phone-detection monitor")]
struct Args {
    /// Backend base URL. Overrides the config file and CLASSWATCH_API_URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Teacher username.
    #[arg(long, env = "CLASSWATCH_USERNAME")]
    username: String,

    /// Teacher password.
    #[arg(long, env = "CLASSWATCH_PASSWORD", hide_env_values = true)]
    password: String,

    /// QR payload displayed in the classroom.
    #[arg(long, env = "CLASSWATCH_QR")]
    qr: String,

    /// Camera stream URL. Derived from the classroom's camera address when unset.
    #[arg(long)]
    stream_url: Option<String>,

    /// Do not listen to the backend's frame relay.
    #[arg(long)]
    no_relay: bool,

    /// Write the latest annotated frame to this JPEG file every poll.
    #[arg(long)]
    overlay_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = MonitorConfig::load()?;
    if let Some(url) = args.api_url.clone() {
        config.api_url = url;
    }
    if let Some(url) = args.stream_url.clone() {
        config.stream.url = Some(url);
    }
    if args.no_relay {
        config.relay_enabled = false;
    }
    config.validate().context("invalid command-line options")?;

    let session = SessionContext::new();
    let client = BackendClient::new(&config.api_url, config.api_timeout, session.clone());
    client
        .teacher_login(&args.username, &args.password)
        .context("teacher login")?;
    let signed_in = client.sign_in(&args.qr).context("classroom sign-in")?;
    if let Some(path) = &config.token_path {
        session.persist_token_file(path)?;
        log::info!("session token written to {}", path.display());
    }
    log::info!(
        "signed in to {}",
        signed_in.class_name.as_deref().unwrap_or("classroom")
    );

    let monitor = MonitorSession::start(&config, session, signed_in.class_ip.as_deref())?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("classwatch running; Ctrl-C to stop");
    let mut seen_alerts = 0;
    loop {
        match rx.recv_timeout(config.detection.poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let (fresh, seen) = monitor.notification_list().since(seen_alerts);
        seen_alerts = seen;
        for alert in fresh.iter().rev() {
            match &alert.image_url {
                Some(url) => println!("[alert] {} ({})", alert.message, url),
                None => println!("[alert] {}", alert.message),
            }
        }
        if let Some(path) = &args.overlay_out {
            if let Err(err) = write_annotated(&monitor, path, config.detection.jpeg_quality) {
                log::warn!("overlay output not written: {:#}", err);
            }
        }
    }

    log::info!("shutdown signal received, stopping monitor...");
    monitor.teardown()?;
    client.logout()?;
    Ok(())
}

fn write_annotated(monitor: &MonitorSession, path: &Path, quality: u8) -> Result<()> {
    let Some(frame) = monitor.annotated_frame()? else {
        return Ok(());
    };
    let jpeg = frame.encode_jpeg(quality)?;
    std::fs::write(path, jpeg).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
