use crate::icmpv4::{decode_echo_reply, encode_echo_request};
use crate::ping_error::{PingError, PingResult};
use crate::response::Response;
use crate::response_stat::ResponseStat;
use crate::transport::{RawSocket, Transport, RECEIVE_BUFFER_SIZE, SOCKET_TIMEOUT};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub(crate) const MINIMUM_INTERVAL: Duration = Duration::from_millis(10);
const REPLY_CHANNEL_SIZE: usize = 64;

type ReplySender = mpsc::SyncSender<PingResult<Response>>;
type ReplyReceiver = mpsc::Receiver<PingResult<Response>>;

fn reply_channel() -> (ReplySender, ReplyReceiver) {
    mpsc::sync_channel(REPLY_CHANNEL_SIZE)
}

#[allow(clippy::cast_possible_truncation)]
fn current_time_us() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch");
    since_epoch.as_micros() as u64
}

/// A ping session bound to one destination.
///
/// The session owns the transport for its whole lifetime; the underlying
/// handle is released when the session and all of its streams are dropped.
pub struct PingSession<S = RawSocket> {
    transport: Arc<S>,
    identifier: u16,
    requests_count: Arc<AtomicU64>,
    stats: Arc<Mutex<ResponseStat>>,
}

impl PingSession<RawSocket> {
    /// Opens a raw ICMPv4 socket connected to `destination`.
    ///
    /// Raw sockets work only with sufficient privileges.
    pub fn connect(destination: Ipv4Addr) -> PingResult<Self> {
        let socket = RawSocket::connect(destination, SOCKET_TIMEOUT)?;
        Ok(Self::with_transport(socket))
    }
}

impl<S> PingSession<S>
where
    S: Transport + 'static,
{
    /// The 16-bit echo identifier is drawn from a random source here and
    /// stays constant for the whole session.
    pub fn with_transport(transport: S) -> Self {
        PingSession {
            transport: Arc::new(transport),
            identifier: rand::thread_rng().gen(),
            requests_count: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(Mutex::new(ResponseStat::default())),
        }
    }

    /// Number of echo requests sent so far in the current run.
    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.requests_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the running round-trip statistics.
    #[must_use]
    pub fn statistics(&self) -> ResponseStat {
        self.stats.lock().expect("stats mutex poisoned").clone()
    }

    /// Starts a paced run of `times` echo requests (`0` means unbounded)
    /// and returns the lazy stream of replies.
    ///
    /// Requests are sent one per `interval`, strictly in sequence order.
    /// Replies are yielded as they arrive and may be out of order relative
    /// to the sends. Dropping the stream cancels all pending receive
    /// operations without raising.
    pub fn exec(&self, times: u64, interval: Duration) -> PingResult<ResponseStream<S>> {
        if interval < MINIMUM_INTERVAL {
            return Err(PingError::InvalidInterval { requested: interval, minimum: MINIMUM_INTERVAL });
        }
        self.requests_count.store(0, Ordering::Relaxed);
        self.stats.lock().expect("stats mutex poisoned").reset();

        Ok(ResponseStream::start(
            self.transport.clone(),
            self.identifier,
            times,
            interval,
            self.requests_count.clone(),
            self.stats.clone(),
        ))
    }
}

enum Phase {
    /// The next action is to send the echo request for `sequence`.
    Send,
    /// Waiting out the pacing interval that started at `deadline - interval`.
    Drain { deadline: Instant },
    Done,
}

/// Lazy sequence of echo replies produced by [`PingSession::exec`].
///
/// A dedicated worker thread blocks on the transport and publishes decoded
/// replies onto a bounded channel; `next` interleaves draining that channel
/// with the paced sends.
pub struct ResponseStream<S = RawSocket> {
    transport: Arc<S>,
    identifier: u16,
    times: u64,
    interval: Duration,
    sequence: u64,
    phase: Phase,
    reply_rx: ReplyReceiver,
    requests_count: Arc<AtomicU64>,
    stats: Arc<Mutex<ResponseStat>>,
    halt_tx: mpsc::Sender<()>,
    receiver_thread: Option<JoinHandle<()>>,
}

impl<S> ResponseStream<S>
where
    S: Transport + 'static,
{
    fn start(
        transport: Arc<S>,
        identifier: u16,
        times: u64,
        interval: Duration,
        requests_count: Arc<AtomicU64>,
        stats: Arc<Mutex<ResponseStat>>,
    ) -> Self {
        let (reply_tx, reply_rx) = reply_channel();
        let (halt_tx, halt_rx) = mpsc::channel::<()>();
        let receiver_thread = start_receiver_thread(transport.clone(), reply_tx, halt_rx);

        ResponseStream {
            transport,
            identifier,
            times,
            interval,
            sequence: 0,
            phase: Phase::Send,
            reply_rx,
            requests_count,
            stats,
            halt_tx,
            receiver_thread: Some(receiver_thread),
        }
    }

    fn send_echo_request(&mut self) -> PingResult<()> {
        // The wire field is 16 bits; unbounded runs wrap around.
        #[allow(clippy::cast_possible_truncation)]
        let sequence = self.sequence as u16;
        let packet = encode_echo_request(self.identifier, sequence, current_time_us());
        self.transport.send(&packet)?;
        self.sequence += 1;
        self.requests_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(sequence, "echo request sent");
        Ok(())
    }

    /// Stops producing items and signals the receive worker to discard any
    /// replies that are still in flight.
    fn finish(&mut self) {
        let _ = self.halt_tx.send(());
        self.phase = Phase::Done;
    }
}

impl<S> Iterator for ResponseStream<S>
where
    S: Transport + 'static,
{
    type Item = PingResult<Response>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Send => {
                    if self.times != 0 && self.sequence == self.times {
                        self.finish();
                        return None;
                    }
                    if let Err(error) = self.send_echo_request() {
                        self.finish();
                        return Some(Err(error));
                    }
                    self.phase = Phase::Drain { deadline: Instant::now() + self.interval };
                }
                Phase::Drain { deadline } => {
                    let now = Instant::now();
                    if now >= deadline {
                        let outstanding = self
                            .requests_count
                            .load(Ordering::Relaxed)
                            .saturating_sub(self.stats.lock().expect("stats mutex poisoned").count());
                        tracing::debug!(outstanding, "pacing interval elapsed");
                        self.phase = Phase::Send;
                        continue;
                    }
                    match self.reply_rx.recv_timeout(deadline - now) {
                        Ok(Ok(response)) => {
                            self.stats
                                .lock()
                                .expect("stats mutex poisoned")
                                .add_rtt(response.rtt_us());
                            return Some(Ok(response));
                        }
                        Ok(Err(error)) => {
                            self.finish();
                            return Some(Err(error));
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            self.finish();
                            return None;
                        }
                    }
                }
            }
        }
    }
}

impl<S> Drop for ResponseStream<S> {
    fn drop(&mut self) {
        // mpsc::Sender::send() returns an error only if the receiver is gone.
        let _ = self.halt_tx.send(());
        // Unblock a worker that is parked on a full reply channel, then let
        // it run into the halt check.
        while self.reply_rx.try_recv().is_ok() {}
        if let Some(handle) = self.receiver_thread.take() {
            let _ = handle.join();
        }
    }
}

fn start_receiver_thread<S>(
    transport: Arc<S>,
    reply_tx: ReplySender,
    halt_rx: mpsc::Receiver<()>,
) -> JoinHandle<()>
where
    S: Transport + 'static,
{
    std::thread::spawn(move || {
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        'outer: loop {
            match halt_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break 'outer,
                Err(mpsc::TryRecvError::Empty) => {}
            }
            match transport.receive(&mut buf) {
                Ok(n) => {
                    let reply_time_us = current_time_us();
                    match decode_echo_reply(&buf[..n], reply_time_us) {
                        Ok(response) => {
                            tracing::trace!(sequence = response.sequence, "echo reply received");
                            if reply_tx.send(Ok(response)).is_err() {
                                break 'outer;
                            }
                        }
                        Err(error) => {
                            // Malformed datagrams are skipped instead of
                            // tearing down the session.
                            tracing::warn!(%error, "discarding datagram");
                        }
                    }
                }
                Err(error) => {
                    let _ = reply_tx.send(Err(error.into()));
                    break 'outer;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{OnSend, TransportMock};
    use more_asserts as ma;

    const INTERVAL: Duration = Duration::from_millis(20);
    const MOCK_TIMEOUT: Duration = Duration::from_millis(500);

    #[test]
    fn interval_below_floor_fails_before_any_send() {
        let mock = TransportMock::new(OnSend::SynthesizeReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock.clone());

        let result = session.exec(1, Duration::from_millis(5));

        assert!(matches!(
            result,
            Err(PingError::InvalidInterval { requested, .. }) if requested == Duration::from_millis(5)
        ));
        mock.should_send_number_of_messages(0);
        assert_eq!(0, session.requests_sent());
    }

    #[test]
    fn finite_run_sends_exactly_times_requests_in_order() {
        let mock = TransportMock::new(OnSend::Swallow, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock.clone());

        let responses: Vec<_> = session.exec(3, INTERVAL).unwrap().collect();

        assert!(responses.is_empty());
        mock.should_send_number_of_messages(3);
        assert_eq!(vec![0, 1, 2], mock.sent_sequences());
        assert_eq!(3, session.requests_sent());
        assert_eq!(0, session.statistics().count());
    }

    #[test]
    fn replies_are_yielded_and_fed_into_statistics() {
        let mock = TransportMock::new(OnSend::SynthesizeReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock);

        let responses: Vec<_> = session
            .exec(2, INTERVAL)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(2, responses.len());
        assert_eq!(0, responses[0].sequence);
        assert_eq!(1, responses[1].sequence);
        assert_eq!(responses[0].identifier, responses[1].identifier);
        for response in &responses {
            assert_eq!(0, response.icmp_type);
            ma::assert_ge!(response.rtt_us(), 0);
        }

        let stats = session.statistics();
        assert_eq!(2, stats.count());
        assert!(stats.min_rtt_us().is_some());
        ma::assert_ge!(stats.max_rtt_us(), stats.min_rtt_us().unwrap());
        assert_eq!(2, session.requests_sent());
    }

    #[test]
    fn statistics_are_readable_while_the_stream_is_live() {
        let mock = TransportMock::new(OnSend::SynthesizeReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock);

        let mut stream = session.exec(2, INTERVAL).unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(0, first.sequence);
        assert_eq!(1, session.statistics().count());

        let _rest: Vec<_> = stream.collect();
        assert_eq!(2, session.statistics().count());
    }

    #[test]
    fn exec_resets_counters_and_statistics() {
        let mock = TransportMock::new(OnSend::SynthesizeReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock);

        let _first_run: Vec<_> = session.exec(2, INTERVAL).unwrap().collect();
        assert_eq!(2, session.statistics().count());

        let stream = session.exec(1, INTERVAL).unwrap();
        assert_eq!(0, session.requests_sent());
        assert_eq!(0, session.statistics().count());

        let responses: Vec<_> = stream.collect();
        assert_eq!(1, responses.len());
        assert_eq!(1, session.requests_sent());
    }

    #[test]
    fn send_failure_propagates_and_terminates_iteration() {
        let mock = TransportMock::new(OnSend::ReturnErr, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock);

        let mut stream = session.exec(0, INTERVAL).unwrap();

        assert!(matches!(stream.next(), Some(Err(PingError::Transport(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn receive_timeout_propagates_and_terminates_iteration() {
        let mock = TransportMock::new(OnSend::Swallow, Duration::from_millis(50));
        let session = PingSession::with_transport(mock);

        let mut stream = session.exec(0, Duration::from_secs(1)).unwrap();

        assert!(matches!(stream.next(), Some(Err(PingError::Transport(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn malformed_replies_are_skipped_not_fatal() {
        let mock = TransportMock::new(OnSend::SynthesizeCorruptReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock.clone());

        let responses: Vec<_> = session.exec(1, INTERVAL).unwrap().collect();

        assert!(responses.is_empty());
        mock.should_send_number_of_messages(1);
        assert_eq!(0, session.statistics().count());
    }

    #[test]
    fn abandoning_an_unbounded_stream_stops_all_sends() {
        let mock = TransportMock::new(OnSend::SynthesizeReply, MOCK_TIMEOUT);
        let session = PingSession::with_transport(mock.clone());

        let mut stream = session.exec(0, INTERVAL).unwrap();
        let first = stream.next().unwrap().unwrap();
        let second = stream.next().unwrap().unwrap();
        assert_eq!(0, first.sequence);
        assert_eq!(1, second.sequence);
        drop(stream);

        let sent_after_drop = mock.sent_count();
        std::thread::sleep(3 * INTERVAL);
        assert_eq!(sent_after_drop, mock.sent_count());
    }
}
