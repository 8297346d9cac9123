use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::broadcast::ChangedField;
use crate::engine::RodioTransport;
use crate::mpris::ControlCmd;
use crate::resume::Resumption;
use crate::session::Session;

mod control;
mod logging;
mod mpris_sync;
mod settings;

pub use control::{Flow, apply as apply_control};

/// Headless player: open the folder given on the command line, or resume
/// the last one, and serve MPRIS until interrupted.
pub async fn run() -> anyhow::Result<()> {
    let settings = settings::load_settings();
    logging::init(&settings.logging);

    let session = Session::open(&settings, RodioTransport::open_default)
        .await
        .context("failed to start the player")?;

    let started = match env::args().nth(1).map(PathBuf::from) {
        Some(folder) => session.open_folder(&folder, true).await,
        None => session.resume().await,
    };
    match started {
        Ok(Resumption::Load(plan)) => info!(
            folder = %plan.folder().display(),
            index = plan.start_index,
            position_ms = plan.start_position_ms,
            "tape loaded"
        ),
        Ok(Resumption::Reattach) => {}
        Ok(Resumption::Idle(reason)) => info!(?reason, "nothing to play"),
        Err(err) => warn!(%err, "could not load a tape"),
    }

    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ControlCmd>();
    let mpris = crate::mpris::spawn_mpris(control_tx);

    let mut updates = session.attach().await.context("engine is unavailable")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            Some(cmd) = control_rx.recv() => {
                match control::apply(session.engine(), cmd) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(err) => warn!(%err, "control command failed"),
                }
            }
            update = updates.next() => {
                let Some(update) = update else { break };
                mpris_sync::update_mpris(&mpris, session.engine(), &update);
                if update.changed.contains(ChangedField::Track) {
                    if let Some(name) = &update.snapshot.track_name {
                        info!(track = %name, position_ms = update.snapshot.position_ms, "now playing");
                    }
                }
                if update.snapshot.unavailable {
                    error!("audio engine stopped");
                    break;
                }
            }
        }
    }

    drop(updates);
    session.shutdown().await.context("shutdown failed")?;
    Ok(())
}
