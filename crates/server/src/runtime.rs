//! Fixed-step server runtime.
//!
//! One tokio task owns the whole match: between ticks it drains transport
//! events into the game, then advances the simulation and sleeps off the
//! remainder of the tick budget. Sleeping the remainder (rather than a
//! fixed period) keeps the long-run tick rate at the target even when
//! individual ticks are slow.

use crate::game::{Game, GameOptions};
use anyhow::Result;
use redzone_core::TICK_PERIOD_MS;
use redzone_net::{ConnectionId, OutboundHandle, ServerEndpoint, TransportEvent};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Ticks between timing log lines.
const TIMING_LOG_INTERVAL: u32 = 200;

/// Everything needed to host one match.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address the TCP listener binds to.
    pub bind_addr: SocketAddr,
    /// Match parameters.
    pub game: GameOptions,
}

/// Host one match to completion.
///
/// Returns once the match has ended and the final packets were flushed, or
/// with an error if the listener cannot bind.
pub async fn run(options: ServerOptions) -> Result<()> {
    let mut endpoint = ServerEndpoint::bind(options.bind_addr).await?;
    info!(addr = %endpoint.local_addr(), seed = options.game.seed, "match starting");

    let mut game = Game::new(options.game)?;
    let mut handles: BTreeMap<ConnectionId, OutboundHandle> = BTreeMap::new();

    let tick_period = Duration::from_millis(TICK_PERIOD_MS);
    let mut spent = Duration::ZERO;
    let mut measured = 0u32;

    loop {
        let started = Instant::now();

        // Inbound messages apply between ticks, never during one.
        while let Some(event) = endpoint.poll_event() {
            match event {
                TransportEvent::Connected(conn, handle) => {
                    game.handle_connected(conn, &handle);
                    handles.insert(conn, handle);
                }
                TransportEvent::Message(conn, frame) => {
                    if let Some(handle) = handles.get(&conn) {
                        game.handle_message(conn, handle, &frame);
                    }
                }
                TransportEvent::Disconnected(conn) => {
                    handles.remove(&conn);
                    game.handle_disconnected(conn);
                }
            }
        }

        game.tick();

        if game.is_finished() {
            info!(ticks = game.current_tick().0, "match finished, shutting down");
            return Ok(());
        }

        let elapsed = started.elapsed();
        spent += elapsed;
        measured += 1;
        if measured == TIMING_LOG_INTERVAL {
            let avg_ms = spent.as_secs_f64() * 1000.0 / f64::from(TIMING_LOG_INTERVAL);
            info!(
                avg_ms,
                players = game.observer_count(),
                alive = game.alive_count(),
                "tick timing"
            );
            spent = Duration::ZERO;
            measured = 0;
        }

        if elapsed >= tick_period {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "tick overran its budget"
            );
        } else {
            sleep(tick_period - elapsed).await;
        }
    }
}
