//! Loopback call between two in-process call contexts.

use anyhow::Result;
use audio_routing::AudioBackend;
use call_core::{CallEvent, Role};
use clap::Parser;
use log::{debug, info, warn};
use negotiation::WebRtcEngine;
use rtpcall::CallContext;
use settings_manager::{ConfigManager, Settings};
use std::sync::Arc;
use std::time::Duration;

/// rtpcall - run a loopback call and report what happens
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// How long to keep the call up, in seconds
    #[clap(long, default_value_t = 10)]
    duration: u64,

    /// Add a video track
    #[clap(long)]
    video: bool,

    /// Open a data channel and exchange a greeting
    #[clap(long)]
    data_channel: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn load_settings() -> Settings {
    match ConfigManager::new() {
        Ok(config) => config.settings().clone(),
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Settings::default()
        }
    }
}

fn print_event(side: &str, event: &CallEvent) {
    match event {
        CallEvent::StatsReady { stats, .. } => println!(
            "[{}] stats: sent {:?} B, received {:?} B{}",
            side,
            stats.bytes_sent_delta,
            stats.bytes_received_delta,
            stats
                .encoder
                .as_ref()
                .and_then(|e| e.frame_rate)
                .map(|fps| format!(", {:.1} fps", fps))
                .unwrap_or_default()
        ),
        CallEvent::AudioDeviceChanged {
            selected,
            available,
        } => println!("[{}] audio device: {:?} of {:?}", side, selected, available),
        CallEvent::ConnectionStateChanged { state, .. } => {
            println!("[{}] connection: {:?}", side, state)
        }
        CallEvent::DataChannelMessage { message, .. } => {
            println!("[{}] message: {}", side, message)
        }
        CallEvent::NegotiationFailed { reason, .. } => {
            println!("[{}] negotiation failed: {}", side, reason)
        }
        other => debug!("[{}] {:?}", side, other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
        debug!("Debug logging enabled");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut settings = load_settings();
    settings.media.video |= args.video;
    settings.media.data_channel |= args.data_channel;

    info!("Starting loopback call for {}s", args.duration);

    let caller = CallContext::new(
        Arc::new(WebRtcEngine::new()?),
        AudioBackend::headless(),
        &settings,
    );
    let callee = CallContext::new(
        Arc::new(WebRtcEngine::new()?),
        AudioBackend::headless(),
        &settings,
    );
    let mut caller_events = caller.subscribe_all();
    let mut callee_events = callee.subscribe_all();

    caller.start_session(Role::Offerer, None)?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = caller_events.events.recv() => {
                print_event("caller", &event);
                match event {
                    CallEvent::LocalDescriptionReady { description, .. } => {
                        callee.start_session(Role::Answerer, Some(description))?;
                    }
                    CallEvent::LocalCandidate { candidate, .. } => {
                        callee.add_remote_ice_candidate(candidate)?;
                    }
                    CallEvent::DataChannelMessage { message, .. } => {
                        info!("Caller got reply: {}", message);
                    }
                    _ => {}
                }
            }
            Some(event) = callee_events.events.recv() => {
                print_event("callee", &event);
                match event {
                    CallEvent::LocalDescriptionReady { description, .. } => {
                        caller.set_remote_description(description)?;
                    }
                    CallEvent::LocalCandidate { candidate, .. } => {
                        caller.add_remote_ice_candidate(candidate)?;
                    }
                    CallEvent::ConnectionStateChanged { state, .. }
                        if args.data_channel && state == call_core::ConnectionState::Connected =>
                    {
                        // Give the data channel a moment to open on both ends
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        caller.send_data("hello from the caller")?;
                    }
                    CallEvent::DataChannelMessage { message, .. } => {
                        callee.send_data(format!("echo: {}", message))?;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Releasing loopback call");
    caller.release().await?;
    callee.release().await?;

    Ok(())
}
