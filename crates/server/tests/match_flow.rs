//! End-to-end match flow against the public game API, with frames going
//! through real outbound channels and parsed back with the wire codec.

use glam::Vec2;
use redzone_core::WORLD_SIZE;
use redzone_net::packets::encode;
use redzone_net::{
    BitReader, InputMessage, MsgType, OutboundHandle, HEALTH_BITS, POSITION_BITS, PROTOCOL_VERSION,
};
use redzone_server::{Game, GameOptions};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn test_game() -> Game {
    Game::new(GameOptions {
        seed: 7,
        ..GameOptions::default()
    })
    .expect("game builds from a fixed seed")
}

fn join(game: &mut Game, conn: u64, name: &str) -> (OutboundHandle, UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = unbounded_channel();
    let handle = OutboundHandle::from_sender(tx);
    game.handle_connected(conn, &handle);
    game.handle_message(conn, &handle, &encode::join(PROTOCOL_VERSION, name));
    (handle, rx)
}

fn next_frame(rx: &mut UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    rx.try_recv().expect("a frame was queued")
}

/// Read past the update preamble (alive, gas stage, gas circle blocks) and
/// stop just before the full-entity count. Returns the alive count when the
/// packet carried one.
fn skip_update_preamble(r: &mut BitReader) -> Option<u8> {
    assert_eq!(r.read_u8().unwrap(), MsgType::Update as u8);
    let alive = if r.read_bool().unwrap() {
        Some(r.read_u8().unwrap())
    } else {
        None
    };
    if r.read_bool().unwrap() {
        r.read_bits(2).unwrap();
        r.read_float(0.0, 20.0, HEALTH_BITS).unwrap();
        for _ in 0..2 {
            r.read_vec(Vec2::ZERO, Vec2::splat(WORLD_SIZE), POSITION_BITS)
                .unwrap();
        }
        for _ in 0..2 {
            r.read_float(0.0, WORLD_SIZE, POSITION_BITS).unwrap();
        }
        r.read_float(0.0, 600.0, HEALTH_BITS).unwrap();
    }
    if r.read_bool().unwrap() {
        r.read_vec(Vec2::ZERO, Vec2::splat(WORLD_SIZE), POSITION_BITS)
            .unwrap();
        r.read_float(0.0, WORLD_SIZE, POSITION_BITS).unwrap();
    }
    alive
}

#[test]
fn two_clients_join_and_the_first_update_is_a_full_snapshot() {
    let mut game = test_game();
    let (_h1, mut rx1) = join(&mut game, 1, "alice");
    let (_h2, mut rx2) = join(&mut game, 2, "bob");

    // Handshake arrives before any tick runs.
    let joined = next_frame(&mut rx1);
    let mut r = BitReader::new(&joined);
    assert_eq!(r.read_u8().unwrap(), MsgType::Joined as u8);
    assert_eq!(r.read_u16().unwrap(), PROTOCOL_VERSION);
    let player_id = r.read_bits(16).unwrap();
    assert_ne!(player_id, 0);
    assert!(!r.read_bool().unwrap()); // solo mode

    let map = next_frame(&mut rx1);
    let mut r = BitReader::new(&map);
    assert_eq!(r.read_u8().unwrap(), MsgType::Map as u8);
    assert_eq!(r.read_u32().unwrap(), 7); // seed low word
    assert_eq!(r.read_u32().unwrap(), 0); // seed high word
    assert!(r.read_bits(16).unwrap() > 0); // statics

    game.tick();

    let update = next_frame(&mut rx1);
    let mut r = BitReader::new(&update);
    assert_eq!(skip_update_preamble(&mut r), Some(2));
    assert!(r.read_bits(16).unwrap() > 0); // full entities in the snapshot

    // The second client got its own snapshot too.
    let joined2 = next_frame(&mut rx2);
    assert_eq!(joined2[0], MsgType::Joined as u8);
    assert_eq!(next_frame(&mut rx2)[0], MsgType::Map as u8);
    assert_eq!(next_frame(&mut rx2)[0], MsgType::Update as u8);
}

#[test]
fn movement_shows_up_as_a_partial_entity_update() {
    let mut game = test_game();
    let (h1, mut rx1) = join(&mut game, 1, "alice");
    let (_h2, _rx2) = join(&mut game, 2, "bob");
    game.tick();
    while rx1.try_recv().is_ok() {} // drop the handshake and snapshot

    game.handle_message(
        1,
        &h1,
        &encode::input(&InputMessage {
            seq: 1,
            moving_left: false,
            moving_right: true,
            moving_up: false,
            moving_down: false,
            shoot_start: false,
            shoot_hold: false,
            direction: Vec2::new(1.0, 0.0),
            actions: Vec::new(),
        }),
    );
    game.tick();

    let update = next_frame(&mut rx1);
    let mut r = BitReader::new(&update);
    skip_update_preamble(&mut r);
    assert_eq!(r.read_bits(16).unwrap(), 0); // nothing went full-dirty
    let partials = r.read_bits(16).unwrap();
    assert!(partials >= 1);

    // The first partial is the moving player, still inside the world.
    assert_eq!(r.read_u8().unwrap(), 1); // player object kind
    let position = r
        .read_vec(Vec2::ZERO, Vec2::splat(WORLD_SIZE), POSITION_BITS)
        .unwrap();
    assert!(position.x > 0.0 && position.x < WORLD_SIZE);
    assert!(position.y > 0.0 && position.y < WORLD_SIZE);
}
