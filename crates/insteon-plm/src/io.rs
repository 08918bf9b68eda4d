//! IO task -- the single owner of the modem connection.
//!
//! Every piece of mutable protocol state lives here: the transport, the
//! byte [`Assembler`], the FIFO of pending jobs, the [`ExpectationTable`],
//! the in-flight job and the link session. Callers talk to the task through
//! a [`Submitter`] (an mpsc request channel with oneshot replies), so none of
//! it is ever shared.
//!
//! The loop selects, in priority order, on:
//!
//! 1. cancellation,
//! 2. caller requests,
//! 3. expectation deadline notices,
//! 4. link-window deadline notices,
//! 5. the queue tick,
//! 6. the end of a read backoff,
//! 7. inbound bytes from the transport.
//!
//! Messages that do not satisfy a live expectation are forwarded, in
//! arrival order, to the dispatcher task. A failing transport is read with
//! a doubling pause, and the outage is reported as
//! [`PlmEvent::Disconnected`] and [`PlmEvent::Reconnected`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use insteon_core::device::LinkMode;
use insteon_core::error::{Error, Result};
use insteon_core::events::{LinkEnd, PlmEvent};
use insteon_core::transport::Transport;

use crate::actions::{CommandRequest, ModemAction};
use crate::assembler::Assembler;
use crate::codec;
use crate::commands::{CommandName, lookup_by_name};
use crate::expect::{ExpectKey, Expectation, ExpectationTable, Expired};
use crate::message::{LinkCompletion, Message, MessageBody};

/// How long the modem stays in linking mode before the session is ended.
pub const LINK_WINDOW: Duration = Duration::from_secs(4 * 60);

/// Read timeout handed to the transport on each poll.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Pause after an empty read so the loop can service other branches.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Ceiling for the pause between reads while the transport keeps failing.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub(crate) struct IoConfig {
    /// Deadline unit: the i-th expectation of a job waits `timeout * i`.
    pub timeout: Duration,
    /// Caller-side bound from submission to settlement.
    pub queue_timeout: Duration,
    /// Backstop tick for the queue processor.
    pub queue_interval: Duration,
    pub link_window: Duration,
}

type JobReply = oneshot::Sender<Result<Vec<Message>>>;

/// A request from a caller to the IO task.
pub(crate) enum Request {
    /// Queue a command and reply once it settles.
    Submit { req: CommandRequest, reply: JobReply },
    /// Open a link session.
    BeginLinking {
        mode: LinkMode,
        auto_add: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the link session; replies whether one was open.
    EndLinking {
        reason: LinkEnd,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    /// Graceful shutdown; returns the transport for test recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Work handed from the IO task to the dispatcher.
#[derive(Debug)]
pub(crate) enum DispatchItem {
    /// An unsolicited message.
    Message(Message),
    /// A device finished linking with the modem.
    LinkCompleted {
        completion: LinkCompletion,
        auto_add: bool,
    },
}

/// A point-in-time view of the engine's queue and expectation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub queued: usize,
    pub in_flight: bool,
    pub outstanding: usize,
    /// Expectations registered since start.
    pub registered: u64,
    /// Expectations settled since start, by match, deadline or withdrawal.
    pub settled: u64,
    pub linking: bool,
}

/// Cloneable request side of the IO task.
#[derive(Clone)]
pub struct Submitter {
    cmd_tx: mpsc::Sender<Request>,
    queue_timeout: Duration,
}

impl Submitter {
    /// Queue `req` and wait for it to settle.
    ///
    /// Returns the matched responses in declaration order. A job that has
    /// not settled within the queue timeout fails with [`Error::Timeout`].
    pub async fn submit(&self, req: CommandRequest) -> Result<Vec<Message>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Submit {
                req,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(self.queue_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    pub(crate) async fn begin_linking(&self, mode: LinkMode, auto_add: bool) -> Result<()> {
        self.call(|reply| Request::BeginLinking {
            mode,
            auto_add,
            reply,
        })
        .await?
    }

    pub(crate) async fn end_linking(&self, reason: LinkEnd) -> Result<bool> {
        self.call(|reply| Request::EndLinking { reason, reply }).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.call(|reply| Request::Stats { reply }).await
    }

    /// Stop the IO task and hand back its transport.
    pub(crate) async fn shutdown(&self) -> Result<Box<dyn Transport>> {
        self.call(|reply| Request::Shutdown { reply }).await
    }
}

/// Handle to the IO task. Stored inside [`Plm`](crate::plm::Plm).
pub(crate) struct PlmIo {
    pub submitter: Submitter,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl PlmIo {
    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let transport = self.submitter.shutdown().await?;
        let _ = self.task.await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<PlmEvent>,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
    cancel: CancellationToken,
) -> PlmIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
    let (link_tx, link_rx) = mpsc::unbounded_channel();

    let submitter = Submitter {
        cmd_tx,
        queue_timeout: config.queue_timeout,
    };
    let engine = Engine {
        transport,
        config,
        assembler: Assembler::new(),
        queue: VecDeque::new(),
        expectations: ExpectationTable::new(expiry_tx),
        in_flight: None,
        link: None,
        link_tx,
        event_tx,
        dispatch_tx,
        next_job: 1,
        next_session: 1,
        receive_failures: 0,
    };

    let task = tokio::spawn(io_loop(engine, cmd_rx, expiry_rx, link_rx, cancel.clone()));

    PlmIo {
        submitter,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

struct Job {
    id: u64,
    req: CommandRequest,
    /// `None` for jobs queued by the engine itself.
    reply: Option<JobReply>,
}

struct InFlight {
    job: u64,
    command: CommandName,
    responses: Vec<Option<Message>>,
    reply: Option<JobReply>,
}

struct LinkSession {
    id: u64,
    auto_add: bool,
    cancel: CancellationToken,
}

struct Engine {
    transport: Box<dyn Transport>,
    config: IoConfig,
    assembler: Assembler,
    queue: VecDeque<Job>,
    expectations: ExpectationTable,
    in_flight: Option<InFlight>,
    link: Option<LinkSession>,
    link_tx: mpsc::UnboundedSender<u64>,
    event_tx: broadcast::Sender<PlmEvent>,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
    next_job: u64,
    next_session: u64,
    /// Consecutive failed reads; zero while the transport is healthy.
    receive_failures: u32,
}

fn send_reply(reply: Option<JobReply>, result: Result<Vec<Message>>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

// ---------------------------------------------------------------------------
// IO loop
// ---------------------------------------------------------------------------

async fn io_loop(
    mut engine: Engine,
    mut cmd_rx: mpsc::Receiver<Request>,
    mut expiry_rx: mpsc::UnboundedReceiver<Expired>,
    mut link_rx: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(engine.config.queue_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = [0u8; 256];
    // Set while reads are backing off after a transport error.
    let mut reads_paused: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        engine.abandon();
                        let _ = reply.send(engine.transport);
                        return;
                    }
                    Some(Request::Submit { req, reply }) => engine.submit(req, reply).await,
                    Some(Request::BeginLinking { mode, auto_add, reply }) => {
                        let _ = reply.send(engine.begin_linking(mode, auto_add));
                    }
                    Some(Request::EndLinking { reason, reply }) => {
                        let _ = reply.send(engine.end_linking(reason));
                    }
                    Some(Request::Stats { reply }) => {
                        let _ = reply.send(engine.stats());
                    }
                    None => {
                        debug!("all request senders dropped, exiting IO task");
                        break;
                    }
                }
            }

            Some(expired) = expiry_rx.recv() => {
                engine.on_expired(expired).await;
            }

            Some(session) = link_rx.recv() => {
                engine.on_link_deadline(session).await;
            }

            _ = tick.tick() => {
                engine.process_queue().await;
            }

            _ = tokio::time::sleep_until(reads_paused.unwrap_or_else(Instant::now)), if reads_paused.is_some() => {
                reads_paused = None;
            }

            n = read_chunk(&mut *engine.transport, &mut buf), if reads_paused.is_none() => {
                match n {
                    Ok(Some(n)) => {
                        engine.on_receive_ok();
                        trace!(bytes = ?&buf[..n], "received");
                        for msg in engine.assembler.push(&buf[..n]) {
                            engine.on_message(msg).await;
                        }
                    }
                    Ok(None) => engine.on_receive_ok(),
                    Err(e) => {
                        let pause = engine.on_receive_error(e);
                        reads_paused = Some(Instant::now() + pause);
                    }
                }
            }
        }
    }

    engine.abandon();
}

/// Read one chunk. A quiet line yields `Ok(None)`.
async fn read_chunk(transport: &mut dyn Transport, buf: &mut [u8]) -> Result<Option<usize>> {
    match transport.receive(buf, RECEIVE_POLL).await {
        Ok(n) if n > 0 => Ok(Some(n)),
        Ok(_) | Err(Error::Timeout) => {
            tokio::time::sleep(IDLE_BACKOFF).await;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Pause after the `failures`-th consecutive failed read: doubles from
/// [`IDLE_BACKOFF`] up to [`MAX_ERROR_BACKOFF`].
fn error_backoff(failures: u32) -> Duration {
    IDLE_BACKOFF
        .saturating_mul(1 << failures.saturating_sub(1).min(10))
        .min(MAX_ERROR_BACKOFF)
}

/// Deadline of the `slot`-th expectation of a job: `timeout * (slot + 1)`.
fn deadline(timeout: Duration, slot: usize) -> Duration {
    let factor = u32::try_from(slot).map_or(u32::MAX, |s| s.saturating_add(1));
    timeout.saturating_mul(factor)
}

impl Engine {
    async fn submit(&mut self, req: CommandRequest, reply: JobReply) {
        let id = self.next_job;
        self.next_job += 1;
        debug!(job = id, command = %req.command, queued = self.queue.len(), "job queued");
        self.queue.push_back(Job {
            id,
            req,
            reply: Some(reply),
        });
        self.process_queue().await;
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.is_some(),
            outstanding: self.expectations.len(),
            registered: self.expectations.registered(),
            settled: self.expectations.settled(),
            linking: self.link.is_some(),
        }
    }

    // -- queue --------------------------------------------------------------

    /// Start queued jobs while nothing is outstanding.
    async fn process_queue(&mut self) {
        while self.in_flight.is_none() && self.expectations.is_empty() {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            if job.reply.as_ref().is_some_and(|r| r.is_closed()) {
                debug!(job = job.id, command = %job.req.command, "caller gave up, dropping job");
                continue;
            }
            self.start(job).await;
        }
    }

    async fn start(&mut self, job: Job) {
        let command = job.req.command;
        let frame = match codec::encode(lookup_by_name(command), &job.req.args) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(job = job.id, %command, error = %e, "cannot encode command");
                send_reply(job.reply, Err(e));
                return;
            }
        };

        let keys: Vec<(ExpectKey, Duration)> = job
            .req
            .expects
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(&job.req.args), deadline(self.config.timeout, i)))
            .collect();
        if let Err(e) = self.expectations.register_all(job.id, &keys) {
            warn!(job = job.id, %command, error = %e, "cannot register expectations");
            send_reply(job.reply, Err(e));
            return;
        }

        trace!(job = job.id, frame = ?frame, "sending");
        if let Err(e) = self.transport.send(&frame).await {
            warn!(job = job.id, %command, error = %e, "send failed");
            self.expectations.withdraw_job(job.id);
            send_reply(job.reply, Err(e));
            return;
        }

        if keys.is_empty() {
            debug!(job = job.id, %command, "sent, nothing to wait for");
            send_reply(job.reply, Ok(Vec::new()));
            return;
        }

        debug!(job = job.id, %command, expecting = keys.len(), "sent");
        self.in_flight = Some(InFlight {
            job: job.id,
            command,
            responses: vec![None; keys.len()],
            reply: job.reply,
        });
    }

    /// Reject the in-flight job and withdraw what it still waits for.
    async fn fail_in_flight(&mut self, err: Error) {
        if let Some(flight) = self.in_flight.take() {
            let withdrawn = self.expectations.withdraw_job(flight.job);
            debug!(job = flight.job, command = %flight.command, error = %err, withdrawn, "job failed");
            send_reply(flight.reply, Err(err));
        }
        self.process_queue().await;
    }

    // -- inbound ------------------------------------------------------------

    /// Record a failed read and return how long to pause reads.
    fn on_receive_error(&mut self, err: Error) -> Duration {
        self.receive_failures = self.receive_failures.saturating_add(1);
        let pause = error_backoff(self.receive_failures);
        if self.receive_failures > 1 {
            debug!(error = %err, failures = self.receive_failures, ?pause, "receive still failing");
            return pause;
        }
        warn!(error = %err, ?pause, "receive failed, backing off");
        let _ = self.event_tx.send(PlmEvent::Disconnected {
            error: err.to_string(),
        });
        pause
    }

    fn on_receive_ok(&mut self) {
        if self.receive_failures == 0 {
            return;
        }
        info!(failures = self.receive_failures, "receive recovered");
        self.receive_failures = 0;
        let _ = self.event_tx.send(PlmEvent::Reconnected);
    }

    async fn on_message(&mut self, msg: Message) {
        let _ = self.event_tx.send(PlmEvent::MessageReceived {
            command: msg.command.as_str(),
            summary: msg.to_string(),
        });

        if let Some(entry) = ExpectKey::for_message(&msg).and_then(|key| self.expectations.resolve(&key)) {
            self.settle(entry, msg).await;
            return;
        }

        match msg.body {
            MessageBody::LinkCompleted(completion) => self.on_link_completed(completion),
            _ => self.dispatch(DispatchItem::Message(msg)),
        }
    }

    async fn settle(&mut self, entry: Expectation, msg: Message) {
        if self.in_flight.as_ref().is_none_or(|f| f.job != entry.job) {
            debug!(job = entry.job, "response for a job that already settled");
            return;
        }
        if msg.is_nak() {
            self.fail_in_flight(Error::Nak(msg.command.as_str())).await;
            return;
        }

        let complete = match self.in_flight.as_mut() {
            Some(flight) => {
                flight.responses[entry.slot] = Some(msg);
                flight.responses.iter().all(Option::is_some)
            }
            None => false,
        };
        if !complete {
            return;
        }
        if let Some(flight) = self.in_flight.take() {
            debug!(job = flight.job, command = %flight.command, "job complete");
            let messages = flight.responses.into_iter().flatten().collect();
            send_reply(flight.reply, Ok(messages));
        }
        self.process_queue().await;
    }

    async fn on_expired(&mut self, expired: Expired) {
        let Some(entry) = self.expectations.expire(&expired.key, expired.id) else {
            return;
        };
        warn!(key = %expired.key, job = entry.job, "timed out waiting for response");
        if self.in_flight.as_ref().is_some_and(|f| f.job == entry.job) {
            self.fail_in_flight(Error::Timeout).await;
        } else {
            self.process_queue().await;
        }
    }

    fn dispatch(&self, item: DispatchItem) {
        if self.dispatch_tx.send(item).is_err() {
            debug!("dispatcher gone, dropping message");
        }
    }

    // -- linking ------------------------------------------------------------

    fn begin_linking(&mut self, mode: LinkMode, auto_add: bool) -> Result<()> {
        if self.link.is_some() {
            return Err(Error::AlreadyLinking);
        }
        let id = self.next_session;
        self.next_session += 1;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.link_tx.clone();
        let window = self.config.link_window;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    let _ = tx.send(id);
                }
            }
        });

        info!(?mode, auto_add, "linking started");
        self.link = Some(LinkSession {
            id,
            auto_add,
            cancel,
        });
        let _ = self.event_tx.send(PlmEvent::LinkingStarted { mode });
        Ok(())
    }

    fn end_linking(&mut self, reason: LinkEnd) -> bool {
        let Some(session) = self.link.take() else {
            return false;
        };
        session.cancel.cancel();
        info!(?reason, "linking stopped");
        let _ = self.event_tx.send(PlmEvent::LinkingStopped { reason });
        true
    }

    async fn on_link_deadline(&mut self, session: u64) {
        if self.link.as_ref().is_none_or(|s| s.id != session) {
            return;
        }
        self.end_linking(LinkEnd::TimedOut);
        let id = self.next_job;
        self.next_job += 1;
        self.queue.push_back(Job {
            id,
            req: ModemAction::CancelAllLinking.request(),
            reply: None,
        });
        self.process_queue().await;
    }

    fn on_link_completed(&mut self, completion: LinkCompletion) {
        let auto_add = match self.link.as_ref() {
            Some(session) => {
                let auto_add = session.auto_add;
                self.end_linking(LinkEnd::Completed);
                auto_add
            }
            None => false,
        };
        info!(address = %completion.address, group = completion.group, auto_add, "link completed");
        self.dispatch(DispatchItem::LinkCompleted {
            completion,
            auto_add,
        });
    }

    /// Drop all pending work. Waiting callers see [`Error::NotConnected`].
    fn abandon(&mut self) {
        if let Some(session) = self.link.take() {
            session.cancel.cancel();
        }
        self.expectations.clear();
        self.in_flight = None;
        self.queue.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
