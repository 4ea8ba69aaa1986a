use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use voxlink::{
    audio::Transcoder,
    common::{logger, types::AnyResult},
    configs::Config,
    gateway::NetConnector,
    playback::{PLAY_QUEUE_CAPACITY, PlayQueue, Player, QueuedClip},
    server::{StaticSessionLayer, VoiceRegistry},
};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);
    info!("voxlink {} starting", env!("CARGO_PKG_VERSION"));

    let session = config
        .session
        .clone()
        .ok_or("config has no [session] section")?;
    let params = config.voice.to_params()?;
    let transcoder = Transcoder::new(params, &config.voice.decoder)?;

    let (layer, mut events) = StaticSessionLayer::new(&session);
    let registry = Arc::new(VoiceRegistry::new(
        Arc::new(layer),
        Arc::new(NetConnector::new(&config.gateway)),
        config.gateway.clone(),
    ));

    let cancel = CancellationToken::new();
    let dispatcher = {
        let registry = registry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => registry.dispatch(&event),
                        None => break,
                    },
                }
            }
        })
    };

    let (queue, clips) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
    let player = Player::new(
        registry.clone(),
        params,
        Duration::from_secs(session.idle_leave_secs),
    );
    let mut player_task = tokio::spawn(player.run(clips, cancel.clone()));

    for path in std::env::args().skip(1) {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Skipping {}: {}", path, e);
                continue;
            }
        };
        let frames = match transcoder.collect(file).await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to transcode {}: {}", path, e);
                continue;
            }
        };
        info!("Queued {} ({} frames)", path, frames.len());
        if let Err(e) = queue.enqueue(QueuedClip {
            guild_id: session.guild_id.as_str().into(),
            channel_id: session.channel_id.as_str().into(),
            name: path,
            frames,
        }) {
            warn!("{}", e);
        }
    }
    drop(queue);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            cancel.cancel();
            let _ = player_task.await;
        }
        _ = &mut player_task => {}
    }

    registry.shutdown().await;
    cancel.cancel();
    let _ = dispatcher.await;
    Ok(())
}
