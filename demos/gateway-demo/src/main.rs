//! Minimal end-to-end demo: two in-process FIX sessions (initiator and
//! acceptor) logon over a pair of loopback publications and exchange
//! heartbeats, driven by a manual sweep loop instead of real sockets.
//!
//! Replaces the teacher's `demos/acceptor` binary; this one exercises the
//! transformed session layer rather than a toy echo server.

use std::time::Duration;

use clap::Parser;
use fixgate_core::{AsciiString, CompositeKey, Clock, SystemClock};
use fixgate_codec::fix;
use fixgate_session::{application::NullHandler, fix::FixSession, sequence_state::SequenceState, InMemorySequenceStore, LoopbackPublication};
use tracing::info;

#[derive(Parser)]
struct Args {
    /// Number of poll sweeps to run before exiting.
    #[arg(long, default_value_t = 10)]
    sweeps: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let clock = SystemClock;
    let key = CompositeKey::new(
        AsciiString::try_from("DEMO-INIT")?,
        AsciiString::try_from("DEMO-ACC")?,
    );
    let begin_string = AsciiString::try_from("FIX.4.4")?;

    let mut initiator_store = InMemorySequenceStore::new();
    let mut acceptor_store = InMemorySequenceStore::new();
    let mut initiator_out = LoopbackPublication::new(8192);
    let mut acceptor_out = LoopbackPublication::new(8192);
    let mut handler = NullHandler;

    let mut initiator = FixSession::new(key.clone(), begin_string.clone(), true, 1_000, SequenceState::fresh());
    let mut acceptor = FixSession::new(key.reverse(), begin_string, false, 1_000, SequenceState::fresh());

    let now_ms = clock.now_millis();
    initiator.initiate(now_ms, true, &mut initiator_out, &mut initiator_store)?;
    deliver(&mut initiator_out, &mut acceptor, now_ms, &mut acceptor_out, &mut acceptor_store, &mut handler)?;
    deliver(&mut acceptor_out, &mut initiator, now_ms, &mut initiator_out, &mut initiator_store, &mut handler)?;

    info!(
        initiator_active = initiator.state.is_active(),
        acceptor_active = acceptor.state.is_active(),
        "logon complete"
    );

    for sweep in 0..args.sweeps {
        let now_ms = clock.now_millis();
        initiator.poll(now_ms, &mut initiator_out, &mut initiator_store, &mut handler)?;
        acceptor.poll(now_ms, &mut acceptor_out, &mut acceptor_store, &mut handler)?;
        deliver(&mut initiator_out, &mut acceptor, now_ms, &mut acceptor_out, &mut acceptor_store, &mut handler)?;
        deliver(&mut acceptor_out, &mut initiator, now_ms, &mut initiator_out, &mut initiator_store, &mut handler)?;
        info!(sweep, "sweep complete");
        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(())
}

/// Drains frames committed to `from` and feeds each into `to`'s
/// `on_frame_in`, so replies `to` emits land in `to_out` for the next hop.
fn deliver(
    from: &mut LoopbackPublication,
    to: &mut FixSession,
    now_ms: i64,
    to_out: &mut LoopbackPublication,
    to_store: &mut InMemorySequenceStore,
    handler: &mut NullHandler,
) -> anyhow::Result<()> {
    for frame_bytes in from.drain() {
        if let Some((frame, _)) = fix::decode(&frame_bytes)? {
            to.on_frame_in(frame, now_ms, to_out, to_store, handler)?;
        }
    }
    Ok(())
}
