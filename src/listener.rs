//! Listener threads blocked on datagram receipt from a shared socket.
//!
//! Multiple threads may call `recv_from` on one UDP socket concurrently;
//! the OS hands each incoming datagram to exactly one of them. The server
//! exploits this with a pool of listeners over a single socket, the
//! client runs exactly one. Listener activity is controlled in two
//! independent ways: `stop_listen`/`start_listen` toggle consumption
//! without tearing the thread down, while `kill` is terminal. A thread
//! already blocked in `recv_from` when it is killed is unblocked by the
//! owner's socket shutdown/wake signal during terminate.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::envelope::try_decode_envelope;
use crate::types::{CourierError, Envelope, MAX_DATAGRAM_BYTES};

/// How long a non-listening (paused) listener sleeps between flag checks.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Shared control flags for one listener thread.
#[derive(Debug, Default)]
pub(crate) struct ListenerHandle {
    listening: AtomicBool,
    killed: AtomicBool,
}

impl ListenerHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start consuming datagrams.
    pub(crate) fn start_listen(&self) {
        self.listening.store(true, Ordering::Release);
    }

    /// Stop consuming datagrams. Takes effect before the next receive
    /// attempt; the thread stays alive.
    pub(crate) fn stop_listen(&self) {
        self.listening.store(false, Ordering::Release);
    }

    /// Terminal: the thread exits at the top of its loop.
    pub(crate) fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }
}

/// Spawn one listener thread over `socket`, decoding datagrams and
/// handing envelopes to `dispatch`. A single bad or hostile packet never
/// stops the loop: decode failures and dispatch errors are logged and the
/// next receive proceeds.
pub(crate) fn spawn_listener<D>(
    socket: Arc<UdpSocket>,
    handle: Arc<ListenerHandle>,
    dispatch: D,
) -> JoinHandle<()>
where
    D: Fn(Envelope, SocketAddr) -> Result<(), CourierError> + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        while !handle.is_killed() {
            if !handle.is_listening() {
                thread::sleep(IDLE_BACKOFF);
                continue;
            }

            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) => {
                    if handle.is_killed() {
                        // Socket torn down under us during terminate.
                        break;
                    }
                    warn!("socket receive failed: {err}");
                    continue;
                }
            };

            // Zero-length reads are the wake signal issued at terminate;
            // an actual empty datagram just fails decoding below.
            if len == 0 && handle.is_killed() {
                break;
            }
            // A datagram can land on a listener that was already blocked
            // in recv_from when the pause happened. Paused means drop
            // without processing, not merely stop receiving.
            if !handle.is_listening() {
                debug!("paused, dropping {len} byte datagram from {from}");
                continue;
            }
            debug!("received {len} bytes from {from}");

            let envelope = match try_decode_envelope(&buf[..len]) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!("dropping datagram from {from}: {err}");
                    continue;
                }
            };

            if let Err(err) = dispatch(envelope, from) {
                warn!("failed to handle datagram from {from}: {err}");
            }
        }
        debug!("listener thread exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encode_envelope;
    use std::sync::mpsc;

    fn loopback_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap())
    }

    #[test]
    fn delivers_decoded_envelopes_with_sender() {
        let socket = loopback_socket();
        let target = socket.local_addr().unwrap();
        let handle = Arc::new(ListenerHandle::new());
        handle.start_listen();

        let (tx, rx) = mpsc::channel();
        let join = spawn_listener(Arc::clone(&socket), Arc::clone(&handle), move |env, from| {
            tx.send((env, from)).unwrap();
            Ok(())
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let encoded = encode_envelope(&Envelope::text("ping")).unwrap();
        sender.send_to(&encoded, target).unwrap();

        let (envelope, from) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(envelope, Envelope::text("ping"));
        assert_eq!(from, sender.local_addr().unwrap());

        handle.kill();
        sender.send_to(&[], target).unwrap();
        join.join().unwrap();
    }

    #[test]
    fn malformed_datagrams_do_not_stop_the_loop() {
        let socket = loopback_socket();
        let target = socket.local_addr().unwrap();
        let handle = Arc::new(ListenerHandle::new());
        handle.start_listen();

        let (tx, rx) = mpsc::channel();
        let join = spawn_listener(Arc::clone(&socket), Arc::clone(&handle), move |env, _| {
            tx.send(env).unwrap();
            Ok(())
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[0xde, 0xad, 0xbe, 0xef], target).unwrap();
        let encoded = encode_envelope(&Envelope::text("after garbage")).unwrap();
        sender.send_to(&encoded, target).unwrap();

        let envelope = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(envelope.text_payload.as_deref(), Some("after garbage"));

        handle.kill();
        sender.send_to(&[], target).unwrap();
        join.join().unwrap();
    }

    #[test]
    fn paused_listener_leaves_datagrams_in_the_os_buffer() {
        let socket = loopback_socket();
        let target = socket.local_addr().unwrap();
        let handle = Arc::new(ListenerHandle::new());
        // Never started listening: the thread idles.

        let (tx, rx) = mpsc::channel();
        let join = spawn_listener(Arc::clone(&socket), Arc::clone(&handle), move |env, _| {
            tx.send(env).unwrap();
            Ok(())
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let encoded = encode_envelope(&Envelope::text("queued")).unwrap();
        sender.send_to(&encoded, target).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // Resuming picks up what queued while paused.
        handle.start_listen();
        let envelope = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(envelope.text_payload.as_deref(), Some("queued"));

        handle.kill();
        sender.send_to(&[], target).unwrap();
        join.join().unwrap();
    }
}
