//! Reader thread: reassembles inbound chunks and routes each payload.

use std::slice;
use std::sync::atomic::Ordering;

use crossbeam_channel::Receiver;
use tracing::{debug, trace, warn};

use crate::error::NodeError;
use crate::session::Shared;
use crate::session::signal::Fulfill;
use crate::wire::message::{InvEntry, Payload, Services, VersionMessage};
use crate::wire::reassembly::Reassembler;

/// Runs until the transport closes `inbound`.
///
/// `handshake` is fulfilled with `Ok` on the first `verack`, or with the
/// error that makes the handshake impossible. Dropping it on exit wakes a
/// connect attempt still waiting for the peer.
pub(super) fn read_loop(shared: &Shared, inbound: Receiver<Vec<u8>>, handshake: Fulfill<Result<(), NodeError>>) {
    let mut reassembler = Reassembler::new(shared.magic);

    for chunk in inbound.iter() {
        for payload in reassembler.push(&chunk) {
            dispatch(shared, payload, &handshake);
        }
    }

    if reassembler.pending() > 0 {
        debug!(bytes = reassembler.pending(), "discarding partial frame");
    }
    debug!("inbound queue closed, reader exiting");
}

fn dispatch(shared: &Shared, payload: Payload, handshake: &Fulfill<Result<(), NodeError>>) {
    trace!(command = payload.command_name(), "dispatch");

    match payload {
        Payload::Version(version) => on_version(shared, &version, handshake),
        Payload::Verack => {
            if handshake.fulfill(Ok(())) {
                // Set before routing anything that follows the verack.
                shared.connected.store(true, Ordering::Release);
                debug!("verack received");
            }
        }
        Payload::Ping(nonce) => reply(shared, Payload::Pong(nonce)),
        Payload::Pong(_) => {}
        Payload::Inv(entries) => on_inv(shared, entries),
        Payload::GetData(entries) => on_getdata(shared, &entries),
        result @ (Payload::Tx(_) | Payload::Reject(_)) => shared.callbacks.tx_result(result),
        Payload::Unknown { command, .. } => trace!(%command, "ignoring message"),
    }
}

fn reply(shared: &Shared, payload: Payload) {
    if let Err(error) = shared.send(slice::from_ref(&payload)) {
        debug!(command = payload.command_name(), %error, "reply failed");
    }
}

fn on_version(shared: &Shared, version: &VersionMessage, handshake: &Fulfill<Result<(), NodeError>>) {
    let expected = shared.settings.magic_word();
    if shared.magic != expected {
        warn!(
            expected = format_args!("{expected:#010x}"),
            got = format_args!("{:#010x}", shared.magic),
            "peer is on a different network than configured"
        );
        handshake.fulfill(Err(NodeError::ProtocolMismatch {
            expected,
            got: shared.magic,
        }));
        shared.transport.shutdown();
        return;
    }

    let witness = version.services.contains(Services::NODE_WITNESS);
    shared.set_peer(witness, version.start_height);

    debug!(
        version = version.version,
        user_agent = %version.user_agent,
        services = ?version.services,
        start_height = version.start_height,
        "peer version"
    );

    reply(shared, Payload::Verack);
}

fn on_inv(shared: &Shared, entries: Vec<InvEntry>) {
    let total = entries.len();
    let (tx, other): (Vec<InvEntry>, Vec<InvEntry>) = entries.into_iter().partition(|e| e.inv_type.is_tx());
    let blocks: Vec<InvEntry> = other.into_iter().filter(|e| e.inv_type.is_block()).collect();

    if tx.len() + blocks.len() < total {
        trace!(skipped = total - tx.len() - blocks.len(), "ignoring inventory of other types");
    }

    if !tx.is_empty() {
        shared.callbacks.tx_inventory(tx);
    }
    if !blocks.is_empty() {
        shared.queue_blocks(blocks, shared.config.block_inventory_delay);
    }
}

fn on_getdata(shared: &Shared, entries: &[InvEntry]) {
    let replies: Vec<Payload> = entries
        .iter()
        .filter_map(|entry| {
            let payload = shared.pending.take(&entry.hash);
            if payload.is_none() {
                debug!(hash = %entry.hash_hex(), "getdata for inventory we no longer offer");
            }
            payload
        })
        .collect();

    if replies.is_empty() {
        return;
    }

    debug!(count = replies.len(), "serving getdata");
    if let Err(error) = shared.send(&replies) {
        warn!(%error, "failed to serve getdata");
    }
}
