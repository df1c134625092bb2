//! The storage side of the relay: a single sequential loop that decodes
//! every datagram and appends it to the record store.

use crate::codec;
use crate::metrics_defs::{RELAY_DATAGRAMS_DROPPED, RELAY_DATAGRAMS_RECEIVED};
use crate::relay::RelayReceiver;
use crate::store::{self, RecordStore};
use shared::counter;
use std::future::Future;

/// Consumes datagrams until `shutdown` resolves.
///
/// Only the wait for the next datagram is interrupted by shutdown; a
/// datagram already received is decoded and stored before the loop exits.
/// Appends run one at a time, so this loop is the sole writer of `store`.
pub async fn run_receive_loop<F>(mut receiver: RelayReceiver, store: RecordStore, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut shutdown = std::pin::pin!(shutdown);
    match receiver.local_addr() {
        Ok(local_addr) => tracing::info!(%local_addr, "Relay receive loop started"),
        Err(e) => tracing::warn!(error = %e, "Relay receive loop started on unknown address"),
    }

    loop {
        let received = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            received = receiver.recv() => received,
        };

        match received {
            Ok(datagram) => {
                counter!(RELAY_DATAGRAMS_RECEIVED).increment(1);
                tracing::debug!(peer = %datagram.peer, size = datagram.payload.len(), "Relay datagram received");
                store_payload(&store, &datagram.payload).await;
            }
            Err(e) => {
                counter!(RELAY_DATAGRAMS_DROPPED, "reason" => e.reason()).increment(1);
                tracing::warn!(error = %e, "Dropping relay datagram");
            }
        }
    }

    tracing::info!("Relay receive loop stopped");
}

/// Decodes and stores one payload, returning the record key on success.
///
/// Failures are logged and swallowed; a malformed payload never reaches the
/// store.
pub async fn store_payload(store: &RecordStore, payload: &[u8]) -> Option<String> {
    let submission = match codec::decode(payload) {
        Ok(submission) => submission,
        Err(e) => {
            counter!(RELAY_DATAGRAMS_DROPPED, "reason" => "malformed").increment(1);
            tracing::error!(error = %e, "Discarding malformed submission");
            return None;
        }
    };

    match store::append_blocking(store, submission).await {
        Ok(key) => {
            tracing::info!(key = %key, "Submission stored");
            Some(key)
        }
        Err(e) => {
            tracing::error!(error = %e, path = %store.path().display(), "Failed to store submission");
            None
        }
    }
}
