//! Couples two [`Streamer`]/sink pairs — conventionally a client and an
//! upstream broker — and routes each packet crossing one side to the
//! other, or to whatever a [`Policy`] decides.
//!
//! Grounded on `pkg/proxy/bridge.go`'s `Bridge`/`RoutingStreamer`: a
//! `Router` there is a function from a header to a `mqtt.Writer`, but in
//! every caller it only ever resolves to one of the bridge's own two
//! sinks (`SinkLeft`/`SinkRight`). That observation is why [`Decision`]
//! here carries a closed [`Side`] rather than a boxed sink trait object —
//! the routing space really is binary, and modelling it as an enum lets
//! the bridge own both halves outright instead of threading `Arc`s through
//! a trait object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::codec::packet::{Connect, DecodeOptions, Packet, PacketHeader};
use crate::consts::MAX_REMAINING_LENGTH;
use crate::error::MqttError;
use crate::streamer::Streamer;

/// Which half of a [`Bridge`] a packet arrived on, or should be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// What a [`Policy`] wants done with a packet, decided from its header
/// alone, before any bytes of the body have been read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Copy the packet byte-for-byte to the named side without decoding.
    Forward(Side),
    /// Read and discard the body; nothing is written to either side.
    Drop,
    /// Decode the body into a [`Packet`] and hand it to
    /// [`Policy::handle`] for a further decision.
    Decode,
}

/// What to do with a packet that was decoded because a [`Policy`]
/// returned [`Decision::Decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Forward(Side),
    Drop,
}

/// Decides how each packet crossing a bridge is handled. `side` is the
/// side the packet arrived *from*; a policy forwarding unconditionally
/// returns `Forward(side.opposite())`.
pub trait Policy: Send + Sync {
    fn decide(&self, side: Side, header: &PacketHeader) -> Decision;

    /// Only called when [`decide`](Policy::decide) returned
    /// [`Decision::Decode`]. The default forwards the packet, decoded or
    /// not, to the opposite side — useful for a policy that only needs to
    /// inspect traffic, not alter its routing.
    fn handle(&self, side: Side, _packet: &Packet) -> HandlerAction {
        HandlerAction::Forward(side.opposite())
    }
}

/// Forwards every packet to the opposite side without decoding it — the
/// bridge's default behaviour, matching the Go original's default
/// `Router` closures that always resolve to `SinkRight`/`SinkLeft`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl Policy for DefaultPolicy {
    fn decide(&self, side: Side, _header: &PacketHeader) -> Decision {
        Decision::Forward(side.opposite())
    }
}

/// Per-direction byte and packet counters. Generalises the teacher's
/// global `core::broker_info` atomics into a per-[`Bridge`] instance so
/// multiple proxied connections don't share one counter set.
#[derive(Debug, Default)]
pub struct BridgeStats {
    left_to_right_packets: AtomicU64,
    right_to_left_packets: AtomicU64,
    left_to_right_bytes: AtomicU64,
    right_to_left_bytes: AtomicU64,
    dropped_packets: AtomicU64,
}

impl BridgeStats {
    fn record(&self, from: Side, bytes: u64) {
        match from {
            Side::Left => {
                self.left_to_right_packets.fetch_add(1, Ordering::Relaxed);
                self.left_to_right_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Side::Right => {
                self.right_to_left_packets.fetch_add(1, Ordering::Relaxed);
                self.right_to_left_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    fn record_drop(&self) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn left_to_right_packets(&self) -> u64 {
        self.left_to_right_packets.load(Ordering::Relaxed)
    }

    pub fn right_to_left_packets(&self) -> u64 {
        self.right_to_left_packets.load(Ordering::Relaxed)
    }

    pub fn left_to_right_bytes(&self) -> u64 {
        self.left_to_right_bytes.load(Ordering::Relaxed)
    }

    pub fn right_to_left_bytes(&self) -> u64 {
        self.right_to_left_bytes.load(Ordering::Relaxed)
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }
}

/// Why one direction of a [`Bridge`] stopped forwarding.
#[derive(Debug)]
pub enum BridgeOutcome {
    /// `side` reached a clean end of stream.
    Closed { side: Side },
    /// `side`'s direction failed with `error`.
    Errored { side: Side, error: MqttError },
    /// `side`'s worker was cancelled — either by the bridge's own
    /// [`CancellationToken`] being triggered externally, or because the
    /// opposite direction terminated first and
    /// [`BridgeHandle::wait`] signalled this one to stop. No recovery is
    /// attempted either way; the outcome is surfaced, not acted on.
    Cancelled { side: Side },
}

/// Both workers' outcomes, in the order they actually terminated.
#[derive(Debug)]
pub struct BridgeTermination {
    pub first: BridgeOutcome,
    pub second: BridgeOutcome,
}

/// Couples a left and right transport, forwarding packets between them
/// according to a [`Policy`] until one side ends, errors, or the bridge is
/// cancelled externally.
pub struct Bridge<LR, LW, RR, RW> {
    left_reader: LR,
    left_writer: LW,
    right_reader: RR,
    right_writer: RW,
    policy: Arc<dyn Policy>,
    stats: Arc<BridgeStats>,
    token: CancellationToken,
    opts: DecodeOptions,
    max_packet_len: u32,
    /// Fired (read-only) the first time a CONNECT packet is decoded
    /// crossing left-to-right. Telemetry use case from spec.md §1; the
    /// default policy never triggers decoding at all, so this only fires
    /// for a policy that asks for `Decision::Decode` on CONNECT headers.
    on_connect: Option<Arc<dyn Fn(&Connect) + Send + Sync>>,
}

impl<LR, LW, RR, RW> Bridge<LR, LW, RR, RW>
where
    LR: AsyncRead + Unpin + Send + 'static,
    LW: AsyncWrite + Unpin + Send + 'static,
    RR: AsyncRead + Unpin + Send + 'static,
    RW: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(left_reader: LR, left_writer: LW, right_reader: RR, right_writer: RW) -> Self {
        Self {
            left_reader,
            left_writer,
            right_reader,
            right_writer,
            policy: Arc::new(DefaultPolicy),
            stats: Arc::new(BridgeStats::default()),
            token: CancellationToken::new(),
            opts: DecodeOptions::default(),
            max_packet_len: MAX_REMAINING_LENGTH,
            on_connect: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_decode_options(mut self, opts: DecodeOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Caps the remaining-length a header may declare before the bridge
    /// refuses to act on it (`PacketTooLarge`), independent of decision
    /// kind — this bounds memory for `Decode`/`Drop` bodies and the
    /// scratch copy used by `Forward`, not just decoded packets.
    pub fn with_max_packet_len(mut self, max_packet_len: u32) -> Self {
        self.max_packet_len = max_packet_len.min(MAX_REMAINING_LENGTH);
        self
    }

    pub fn with_on_connect(mut self, hook: Arc<dyn Fn(&Connect) + Send + Sync>) -> Self {
        self.on_connect = Some(hook);
        self
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    /// An external handle a caller can use to stop this bridge, e.g. on
    /// listener shutdown, before either worker has been spawned.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawns the two directional workers and returns a [`BridgeHandle`]
    /// to observe how they end. Each worker runs independently until its
    /// side closes, errors, or is cancelled; neither is restarted.
    pub fn start(self) -> BridgeHandle {
        let Bridge {
            left_reader,
            left_writer,
            right_reader,
            right_writer,
            policy,
            stats,
            token,
            opts,
            max_packet_len,
            on_connect,
        } = self;

        let l_to_r = tokio::spawn(pump(
            Side::Left,
            left_reader,
            right_writer,
            policy.clone(),
            stats.clone(),
            opts,
            max_packet_len,
            on_connect,
            token.clone(),
        ));
        let r_to_l = tokio::spawn(pump(
            Side::Right,
            right_reader,
            left_writer,
            policy,
            stats,
            opts,
            max_packet_len,
            // the hook is only ever consulted for traffic moving left-to-right.
            None,
            token.clone(),
        ));

        BridgeHandle {
            l_to_r,
            r_to_l,
            token,
        }
    }
}

/// Handle to a running [`Bridge`], returned by [`Bridge::start`].
pub struct BridgeHandle {
    l_to_r: tokio::task::JoinHandle<BridgeOutcome>,
    r_to_l: tokio::task::JoinHandle<BridgeOutcome>,
    token: CancellationToken,
}

impl BridgeHandle {
    /// An external handle a caller can use to stop both workers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Blocks until both workers have terminated, returning their
    /// outcomes in arrival order. When one worker terminates, `wait`
    /// signals the other via the shared `CancellationToken` — closing
    /// both underlying streams is the caller's job (dropping the
    /// transports once this returns), but the token is what lets the
    /// still-running worker stop promptly rather than wait out its
    /// current read. The second termination is surfaced; no recovery is
    /// attempted.
    pub async fn wait(self) -> BridgeTermination {
        let BridgeHandle {
            mut l_to_r,
            mut r_to_l,
            token,
        } = self;

        enum Winner {
            Left,
            Right,
        }

        let (winner, first) = select! {
            res = &mut l_to_r => (Winner::Left, join_outcome(res, Side::Left)),
            res = &mut r_to_l => (Winner::Right, join_outcome(res, Side::Right)),
        };

        token.cancel();

        let second = match winner {
            Winner::Left => join_outcome(r_to_l.await, Side::Right),
            Winner::Right => join_outcome(l_to_r.await, Side::Left),
        };

        BridgeTermination { first, second }
    }
}

fn join_outcome(result: Result<BridgeOutcome, tokio::task::JoinError>, side: Side) -> BridgeOutcome {
    result.unwrap_or_else(|join_err| {
        error!("{:?} worker panicked: {}", side, join_err);
        BridgeOutcome::Errored {
            side,
            error: MqttError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                join_err.to_string(),
            )),
        }
    })
}

enum Step {
    Continue,
    Done(BridgeOutcome),
}

/// Reads packets from `side`'s stream and routes each one according to
/// `policy`, writing forwarded packets to `sink`. Runs until the stream
/// ends, errors, the bridge is cancelled via `token`, or a decode failure
/// occurs.
#[allow(clippy::too_many_arguments)]
async fn pump<R, W>(
    side: Side,
    reader: R,
    mut sink: W,
    policy: Arc<dyn Policy>,
    stats: Arc<BridgeStats>,
    opts: DecodeOptions,
    max_packet_len: u32,
    mut on_connect: Option<Arc<dyn Fn(&Connect) + Send + Sync>>,
    token: CancellationToken,
) -> BridgeOutcome
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut streamer = Streamer::new(reader);

    loop {
        let step = select! {
            biased;
            () = token.cancelled() => {
                debug!("{:?} worker cancelled", side);
                return BridgeOutcome::Cancelled { side };
            }
            step = pump_one(
                side,
                &mut streamer,
                &mut sink,
                &policy,
                &stats,
                opts,
                max_packet_len,
                &mut on_connect,
            ) => step,
        };

        match step {
            Step::Continue => continue,
            Step::Done(outcome) => return outcome,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump_one<R, W>(
    side: Side,
    streamer: &mut Streamer<R>,
    sink: &mut W,
    policy: &Arc<dyn Policy>,
    stats: &Arc<BridgeStats>,
    opts: DecodeOptions,
    max_packet_len: u32,
    on_connect: &mut Option<Arc<dyn Fn(&Connect) + Send + Sync>>,
) -> Step
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let header = match streamer.next().await {
        Ok(Some(header)) => *header,
        Ok(None) => {
            debug!("{:?} stream ended cleanly", side);
            return Step::Done(BridgeOutcome::Closed { side });
        }
        Err(error) => {
            error!("{:?} failed reading a packet header: {}", side, error);
            return Step::Done(BridgeOutcome::Errored { side, error });
        }
    };

    trace!(
        "{:?} header read: type={:?} flags={:#06b} length={}",
        side,
        header.packet_type(),
        header.flags(),
        header.length()
    );

    if header.length() > max_packet_len {
        let error = MqttError::PacketTooLarge(header.length() as usize);
        // the body is left unconsumed; the bridge is tearing down either
        // way and no sink is waiting on this direction's order.
        error!("{:?} {}", side, error);
        return Step::Done(BridgeOutcome::Errored { side, error });
    }

    let decision = policy.decide(side, &header);
    trace!(
        "{:?} {:?} (len={}) routed as {:?}",
        side,
        header.packet_type(),
        header.length(),
        decision
    );

    match decision {
        Decision::Forward(dest) if dest == side => {
            // forwarding to the side a packet arrived from is never
            // meaningful for a two-party bridge; treat it as a no-op
            // drop rather than writing back to the sender.
            warn!("policy forwarded a packet back to the side it arrived from; dropping");
            if let Err(error) = streamer.discard().await {
                error!("{:?} failed discarding a mis-routed packet: {}", side, error);
                return Step::Done(BridgeOutcome::Errored { side, error });
            }
            stats.record_drop();
        }
        Decision::Forward(dest) => match streamer.forward_to(sink).await {
            Ok(n) => {
                trace!(
                    "{:?} forwarded {:?} ({} bytes) to {:?}",
                    side,
                    header.packet_type(),
                    n,
                    dest
                );
                stats.record(side, n);
            }
            Err(error) => {
                error!("{:?} failed forwarding a packet: {}", side, error);
                return Step::Done(BridgeOutcome::Errored { side, error });
            }
        },
        Decision::Drop => {
            if let Err(error) = streamer.discard().await {
                error!("{:?} failed discarding a packet: {}", side, error);
                return Step::Done(BridgeOutcome::Errored { side, error });
            }
            trace!(
                "{:?} dropped {:?} ({} bytes)",
                side,
                header.packet_type(),
                header.length()
            );
            stats.record_drop();
        }
        Decision::Decode => {
            let packet = match streamer.decode(&opts).await {
                Ok(packet) => packet,
                Err(error) => {
                    error!("{:?} failed decoding a packet: {}", side, error);
                    return Step::Done(BridgeOutcome::Errored { side, error });
                }
            };

            if let Packet::Connect(connect) = &packet {
                if let Some(hook) = on_connect.take() {
                    hook(connect);
                }
            }

            match policy.handle(side, &packet) {
                HandlerAction::Forward(dest) if dest == side.opposite() => {
                    debug!(
                        "{:?} forwarding decoded {:?} to {:?}",
                        side,
                        packet.packet_type(),
                        dest
                    );
                    // the body has already been consumed by decode(), so a
                    // decoded packet is re-encoded rather than copied from
                    // the wire.
                    if let Err(error) = crate::codec::encode::write_packet(sink, &packet).await {
                        error!("{:?} failed writing a decoded packet: {}", side, error);
                        return Step::Done(BridgeOutcome::Errored { side, error });
                    }
                    stats.record(side, header.length() as u64);
                }
                HandlerAction::Forward(_) => {
                    trace!("{:?} handler dropped decoded {:?}", side, packet.packet_type());
                    stats.record_drop();
                }
                HandlerAction::Drop => {
                    trace!("{:?} handler dropped decoded {:?}", side, packet.packet_type());
                    stats.record_drop();
                }
            }
        }
    }

    Step::Continue
}
