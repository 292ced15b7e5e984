//! Per-connection protocol handling.
//!
//! Mirrors the split-task shape of the teacher's `socket/client_conn.rs`:
//! a read task turns bytes into decoded frames, a write task drains an
//! outbound byte channel, and this module's dispatch loop is the only
//! place that touches registry/entry/waiter state for this connection.
//!
//! A connection carries at most one lock through its full lifecycle:
//! `UnLock` carries no lock name on the wire (see [`crate::protocol`]), so
//! the only way to resolve it is against "whatever this connection last
//! tried to `Lock`" — there is no name to key a multi-lock map on. Once a
//! `Lock` attempt resolves, one way or another (clean release, acquisition
//! timeout, hold timeout, or disconnect), the connection closes — matching
//! `original_source/lock.go`'s `node.quit()` being reachable only from the
//! tail of `lockProcess`'s wait loop.
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, timeout, Duration};

use crate::config::LockConfig;
use crate::error::FrameError;
use crate::lock_entry::LockEntry;
use crate::protocol::{Event, Frame, FrameDecoder};
use crate::registry::{self, LockRegistry};
use crate::waiter::Waiter;

type DecodedFrame = Result<Frame, FrameError>;

/// Deadline for the opening `Auth` frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-frame read deadline once a session is past authentication and has
/// no lock attempt in flight (acquire/hold deadlines govern the
/// in-flight case instead; see `run_lock_lifecycle`).
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives one client connection from accept to disconnect.
pub struct Session {
    acquirer_id: String,
    registry: Arc<LockRegistry>,
    config: Arc<LockConfig>,
    frame_tx: UnboundedSender<Vec<u8>>,
}

impl Session {
    /// Run a single connection to completion. Never returns an error for
    /// ordinary protocol failures (those just end the connection); only
    /// I/O setup failures on the initial split propagate.
    pub async fn run(stream: TcpStream, registry: Arc<LockRegistry>, config: Arc<LockConfig>) {
        let acquirer_id = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                log::warn!("could not read peer address, dropping connection: {e}");
                return;
            }
        };

        let (mut read_half, mut write_half) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (decoded_tx, mut decoded_rx) = mpsc::unbounded_channel::<DecodedFrame>();

        tokio::spawn(async move {
            while let Some(bytes) = frame_rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                match decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            if decoded_tx.send(Ok(frame)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = decoded_tx.send(Err(e));
                        return;
                    }
                }
            }
        });

        let session = Session { acquirer_id, registry, config, frame_tx };

        if session.authenticate(&mut decoded_rx).await {
            session.dispatch(&mut decoded_rx).await;
        }
    }

    /// Require a valid `Auth` frame as the first message. Any other frame,
    /// a decode error, or disconnect at this phase closes the connection
    /// outright — unlike the steady-state loop, there's no recovering from
    /// a bad opening move.
    async fn authenticate(&self, decoded_rx: &mut UnboundedReceiver<DecodedFrame>) -> bool {
        let frame = match timeout(AUTH_TIMEOUT, decoded_rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => {
                log::info!("{}: auth timed out", self.acquirer_id);
                return false;
            }
        };
        match frame {
            Some(Ok(Frame { event: Event::Auth, body })) => {
                if body == self.config.secret_key.as_bytes() {
                    self.send(Event::AuthOK);
                    true
                } else {
                    self.send(Event::AuthFail);
                    log::info!("{}: auth failed", self.acquirer_id);
                    false
                }
            }
            Some(Ok(_)) => {
                self.send(Event::AuthFail);
                false
            }
            Some(Err(e)) => {
                log::warn!("{}: malformed auth frame: {e}", self.acquirer_id);
                false
            }
            None => false,
        }
    }

    /// Top-level loop for a connection that has no lock attempt in flight.
    /// Only a non-empty `Lock` frame ever transitions out of this loop (into
    /// [`Session::run_lock_lifecycle`], which owns the connection until that
    /// one lock's fate is resolved and the connection closes).
    async fn dispatch(&self, decoded_rx: &mut UnboundedReceiver<DecodedFrame>) {
        loop {
            let frame = match timeout(IDLE_READ_TIMEOUT, decoded_rx.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    log::info!("{}: idle read timeout, closing", self.acquirer_id);
                    return;
                }
            };
            match frame {
                None => return,
                Some(Err(e)) => {
                    log::warn!("{}: frame decode error, closing: {e}", self.acquirer_id);
                    return;
                }
                Some(Ok(Frame { event: Event::Lock, body })) => {
                    if body.is_empty() {
                        continue; // silently dropped, per spec
                    }
                    self.run_lock_lifecycle(body, decoded_rx).await;
                    return;
                }
                Some(Ok(Frame { event: Event::UnLock, .. })) => {
                    // No lock has ever been attempted on this connection.
                    self.send(Event::NoSuchLock);
                }
                Some(Ok(frame)) => {
                    log::warn!("{}: unexpected event from client: {:?}", self.acquirer_id, frame.event);
                    self.send(Event::TypeError);
                }
            }
        }
    }

    /// Drive one lock name from acquisition attempt through to its terminal
    /// outcome (clean release, acquisition timeout, hold timeout, or
    /// disconnect). Returns once that outcome is decided; the caller closes
    /// the connection right after.
    async fn run_lock_lifecycle(&self, name: Vec<u8>, decoded_rx: &mut UnboundedReceiver<DecodedFrame>) {
        let key = registry::namespaced_key(&name);
        let waiter = Arc::new(Waiter::new(
            self.acquirer_id.clone(),
            key.clone(),
            self.frame_tx.clone(),
            self.config.acq_timeout,
        ));

        let entry = match self.registry.lookup(&key) {
            Some(entry) => {
                entry.acquire(waiter.clone());
                entry
            }
            None => match self.registry.create_and_seat(key.clone(), waiter.clone()) {
                Some(entry) => {
                    waiter.write_event(Event::LockOK);
                    entry
                }
                None => {
                    // Lost the race to create; someone else seated first.
                    let entry = self
                        .registry
                        .lookup(&key)
                        .expect("entry just created by a racing acquirer");
                    entry.acquire(waiter.clone());
                    entry
                }
            },
        };

        if !entry.is_member(&waiter.acquirer_id) {
            // entry.acquire() already replied AlreadyLocked (can only happen
            // if this acquirer_id was already a member under a stale entry,
            // e.g. address reuse across a fast reconnect).
            return;
        }

        loop {
            tokio::select! {
                _ = waiter.signal.notified() => {
                    // Clean self-release already resolved synchronously in
                    // the UnLock arm below; nothing else signals this waiter
                    // in a single-task-per-connection design, but honoring
                    // it here keeps the state machine faithful to spec.
                    return;
                }
                _ = sleep_until(waiter.deadline()) => {
                    if waiter.take_promoted() {
                        // One-shot acquisition-to-hold deadline swap: the
                        // predecessor's release already installed the new
                        // (hold) deadline and emitted LockOK; re-arm against
                        // it and keep watching, no client-visible message.
                        continue;
                    }
                    if waiter.is_held() {
                        self.send(Event::OperateTimeout);
                    } else {
                        self.send(Event::LockFail);
                    }
                    waiter.set_discard();
                    entry.release(&waiter);
                    return;
                }
                frame = decoded_rx.recv() => {
                    match frame {
                        None | Some(Err(_)) => {
                            waiter.mark_offline();
                            waiter.set_discard();
                            entry.release(&waiter);
                            return;
                        }
                        Some(Ok(Frame { event: Event::UnLock, .. })) => {
                            if !entry.is_member(&waiter.acquirer_id) {
                                self.send(Event::NoSuchLock);
                                return;
                            }
                            if !waiter.is_held() {
                                // Spurious release per spec.md §4.3: identity
                                // != holder and this isn't a discard, so
                                // release() is a no-op and the waiter stays
                                // queued for its eventual promotion, timeout,
                                // or disconnect. `discard` is reserved for
                                // involuntary teardown, not a voluntary
                                // UnLock sent before promotion.
                                entry.release(&waiter);
                            } else {
                                entry.release(&waiter);
                                return;
                            }
                        }
                        Some(Ok(Frame { event: Event::Lock, body })) => {
                            if registry::namespaced_key(&body) == waiter.lock_key {
                                waiter.write_event(Event::AlreadyLocked);
                            } else {
                                log::warn!(
                                    "{}: concurrent lock request while {:?} is in flight; ignoring",
                                    self.acquirer_id,
                                    String::from_utf8_lossy(&waiter.lock_key),
                                );
                            }
                        }
                        Some(Ok(frame)) => {
                            log::warn!(
                                "{}: frame received while awaiting lock resolution: {:?}",
                                self.acquirer_id,
                                frame.event
                            );
                        }
                    }
                }
            }
        }
    }

    fn send(&self, event: Event) {
        if let Ok(bytes) = Frame::bare(event).encode() {
            let _ = self.frame_tx.send(bytes);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("acquirer_id", &self.acquirer_id)
            .finish_non_exhaustive()
    }
}
