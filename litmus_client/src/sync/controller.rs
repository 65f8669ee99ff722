//! Report sync controller
//!
//! One tokio task per mounted experiment. The task owns the `ReportView`,
//! applies REST responses and live frames to it in a single `select!` loop
//! and publishes every change over a `watch` channel. Views hold a
//! `SyncHandle` and never touch the state directly.

use crate::api::ExperimentApi;
use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{ActionError, LiveError, RequestError};
use crate::live::{LiveChannel, LiveConnector};
use crate::sync::view::{ChannelStatus, ReportMerge, ReportView};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use litmus_common::{
    Experiment, ExperimentReport, GuardrailCreate, GuardrailDirection, GuardrailMetric,
    ReportSnapshot, TerminateRequest,
};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Pending commands per mount
const COMMAND_BUFFER: usize = 16;

/// A guardrail observation to record against the mounted experiment
#[derive(Debug, Clone, PartialEq)]
pub struct NewGuardrail {
    pub name: String,
    pub value: f64,
    pub threshold_value: f64,
    pub direction: GuardrailDirection,
}

impl NewGuardrail {
    fn into_create(self, experiment_id: &str) -> GuardrailCreate {
        GuardrailCreate {
            experiment_id: experiment_id.to_string(),
            name: self.name,
            value: self.value,
            threshold_value: self.threshold_value,
            direction: self.direction,
        }
    }
}

/// Mounts report views for experiments
///
/// Cheap to clone; every mount shares the same transport and connector.
pub struct ReportSync<A, L> {
    api: Arc<A>,
    connector: Arc<L>,
    config: ClientConfig,
}

impl<A, L> Clone for ReportSync<A, L> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            connector: self.connector.clone(),
            config: self.config.clone(),
        }
    }
}

impl<A: ExperimentApi, L: LiveConnector> ReportSync<A, L> {
    pub fn new(api: Arc<A>, connector: Arc<L>, config: ClientConfig) -> Self {
        Self {
            api,
            connector,
            config,
        }
    }

    /// Start syncing one experiment
    ///
    /// Must be called inside a tokio runtime.
    pub fn mount(&self, experiment_id: &str) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let view = ReportView::new(experiment_id);
        let (view_tx, view_rx) = watch::channel(view.clone());

        let controller = Controller {
            experiment_id: experiment_id.to_string(),
            live_url: self.config.live_url(experiment_id),
            api: self.api.clone(),
            connector: self.connector.clone(),
            view,
            updates: view_tx,
            commands: command_rx,
            in_flight: FuturesUnordered::new(),
            next_seq: 0,
            applied: AppliedSeqs::default(),
            awaiting_experiment: false,
            awaiting_report: false,
            terminate_reply: None,
            guardrail_reply: None,
            channel: None,
            connecting: false,
            backoff: Backoff::new(self.config.reconnect.clone()),
            reconnect_at: None,
        };

        tracing::debug!("Mounting report view for {}", experiment_id);
        let task = tokio::spawn(controller.run());

        SyncHandle {
            experiment_id: experiment_id.to_string(),
            commands: command_tx,
            view: view_rx,
            task: Some(task),
        }
    }

    /// Move a view to another experiment
    ///
    /// The current mount (and its live channel) is fully shut down before the
    /// new one starts. Switching to the same id keeps the current mount.
    pub async fn switch_to(&self, current: SyncHandle, experiment_id: &str) -> SyncHandle {
        if current.experiment_id == experiment_id {
            return current;
        }
        current.close().await;
        self.mount(experiment_id)
    }
}

enum Command {
    Terminate {
        reason: Option<String>,
        reply: oneshot::Sender<Result<Experiment, ActionError>>,
    },
    SubmitGuardrail {
        guardrail: NewGuardrail,
        reply: oneshot::Sender<Result<GuardrailMetric, ActionError>>,
    },
    Refresh,
    Close,
}

/// A view's connection to its controller task
///
/// Dropping the handle unmounts the view: the task is aborted, the live
/// channel goes with it and in-flight fetches are never applied.
pub struct SyncHandle {
    experiment_id: String,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ReportView>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Receiver that wakes on every published change
    pub fn subscribe(&self) -> watch::Receiver<ReportView> {
        self.view.clone()
    }

    /// Latest published view
    pub fn view(&self) -> ReportView {
        self.view.borrow().clone()
    }

    /// Wait until the published view satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ReportView, ActionError>
    where
        F: FnMut(&ReportView) -> bool,
    {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(|view| predicate(view))
            .await
            .map_err(|_| ActionError::Closed)?;
        Ok(view.clone())
    }

    /// Terminate the experiment and wait for the refetched experiment
    pub async fn terminate(&self, reason: Option<&str>) -> Result<Experiment, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Terminate {
            reason: reason.map(str::to_string),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ActionError::Closed)?
    }

    /// Record a guardrail observation; resolves once the write succeeds
    pub async fn submit_guardrail(&self, guardrail: NewGuardrail) -> Result<GuardrailMetric, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubmitGuardrail { guardrail, reply }).await?;
        rx.await.map_err(|_| ActionError::Closed)?
    }

    /// Refetch every slice
    pub async fn refresh(&self) -> Result<(), ActionError> {
        self.send(Command::Refresh).await
    }

    /// Unmount and wait for the controller to finish closing the live channel
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), ActionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ActionError::Closed)
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExperimentFetch {
    Mount,
    Refresh,
    ConfirmTerminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFetch {
    Mount,
    Refresh,
    /// After a reconnect, to cover frames missed while disconnected
    Resubscribe,
}

/// A finished piece of in-flight work
enum Completion<C> {
    Experiment {
        seq: u64,
        fetch: ExperimentFetch,
        result: Result<Experiment, RequestError>,
    },
    Report {
        seq: u64,
        fetch: ReportFetch,
        result: Result<ExperimentReport, RequestError>,
    },
    Snapshots {
        seq: u64,
        result: Result<Vec<ReportSnapshot>, RequestError>,
    },
    Guardrails {
        seq: u64,
        result: Result<Vec<GuardrailMetric>, RequestError>,
    },
    Connected(Result<C, LiveError>),
    TerminateWritten(Result<Experiment, RequestError>),
    GuardrailWritten(Result<GuardrailMetric, RequestError>),
}

/// Sequence number of the newest applied response per slice
///
/// `report` is stamped when a report is accepted from any source, so a
/// failed fetch issued before that point never clears it.
#[derive(Debug, Default)]
struct AppliedSeqs {
    experiment: u64,
    report: u64,
    snapshots: u64,
    guardrails: u64,
}

struct Controller<A, L: LiveConnector> {
    experiment_id: String,
    live_url: String,
    api: Arc<A>,
    connector: Arc<L>,

    view: ReportView,
    updates: watch::Sender<ReportView>,
    commands: mpsc::Receiver<Command>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion<L::Channel>>>,

    next_seq: u64,
    applied: AppliedSeqs,
    awaiting_experiment: bool,
    awaiting_report: bool,

    terminate_reply: Option<oneshot::Sender<Result<Experiment, ActionError>>>,
    guardrail_reply: Option<oneshot::Sender<Result<GuardrailMetric, ActionError>>>,

    channel: Option<L::Channel>,
    connecting: bool,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
}

impl<A: ExperimentApi, L: LiveConnector> Controller<A, L> {
    async fn run(mut self) {
        self.awaiting_experiment = true;
        self.awaiting_report = true;
        self.fetch_experiment(ExperimentFetch::Mount);
        self.fetch_report(ReportFetch::Mount);
        self.fetch_snapshots();
        self.fetch_guardrails();
        self.connect();
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Close) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.handle_completion(done);
                }

                frame = next_frame(&mut self.channel) => {
                    self.handle_frame(frame);
                }

                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }

            self.publish();
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.view.channel = ChannelStatus::Closed;
        self.publish();
        tracing::debug!("Report view for {} unmounted", self.experiment_id);
    }

    fn publish(&mut self) {
        self.view.settle_phase(
            self.awaiting_experiment || self.awaiting_report,
            self.terminate_reply.is_some() || self.guardrail_reply.is_some(),
        );
        let view = &self.view;
        self.updates.send_if_modified(|current| {
            if current != view {
                *current = view.clone();
                true
            } else {
                false
            }
        });
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn fetch_experiment(&mut self, fetch: ExperimentFetch) {
        let seq = self.seq();
        let api = self.api.clone();
        let id = self.experiment_id.clone();
        self.in_flight.push(
            async move {
                let result = api.get_experiment(&id).await;
                Completion::Experiment { seq, fetch, result }
            }
            .boxed(),
        );
    }

    fn fetch_report(&mut self, fetch: ReportFetch) {
        let seq = self.seq();
        let api = self.api.clone();
        let id = self.experiment_id.clone();
        self.in_flight.push(
            async move {
                let result = api.get_report(&id).await;
                Completion::Report { seq, fetch, result }
            }
            .boxed(),
        );
    }

    fn fetch_snapshots(&mut self) {
        let seq = self.seq();
        let api = self.api.clone();
        let id = self.experiment_id.clone();
        self.in_flight.push(
            async move {
                let result = api.list_snapshots(&id).await;
                Completion::Snapshots { seq, result }
            }
            .boxed(),
        );
    }

    fn fetch_guardrails(&mut self) {
        let seq = self.seq();
        let api = self.api.clone();
        let id = self.experiment_id.clone();
        self.in_flight.push(
            async move {
                let result = api.list_guardrails(&id).await;
                Completion::Guardrails { seq, result }
            }
            .boxed(),
        );
    }

    fn connect(&mut self) {
        if self.connecting || self.channel.is_some() {
            return;
        }
        self.connecting = true;

        let connector = self.connector.clone();
        let url = self.live_url.clone();
        self.in_flight.push(
            async move { Completion::Connected(connector.connect(&url).await) }.boxed(),
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Terminate { reason, reply } => self.start_terminate(reason, reply),
            Command::SubmitGuardrail { guardrail, reply } => self.start_guardrail(guardrail, reply),
            Command::Refresh => {
                tracing::debug!("Refreshing report view for {}", self.experiment_id);
                self.fetch_experiment(ExperimentFetch::Refresh);
                self.fetch_report(ReportFetch::Refresh);
                self.fetch_snapshots();
                self.fetch_guardrails();
            }
            // Handled by the run loop
            Command::Close => {}
        }
    }

    fn start_terminate(
        &mut self,
        reason: Option<String>,
        reply: oneshot::Sender<Result<Experiment, ActionError>>,
    ) {
        if self.terminate_reply.is_some() {
            let _ = reply.send(Err(ActionError::Busy("terminate")));
            return;
        }

        let Some(experiment) = self.view.experiment.loaded() else {
            let _ = reply.send(Err(ActionError::NotLoaded));
            return;
        };
        if !experiment.status.is_running() {
            let _ = reply.send(Err(ActionError::NotRunning(experiment.status)));
            return;
        }

        tracing::info!("Terminating experiment {}", self.experiment_id);
        let request = TerminateRequest::new(reason.as_deref());
        let api = self.api.clone();
        let id = self.experiment_id.clone();
        self.in_flight.push(
            async move { Completion::TerminateWritten(api.terminate(&id, &request).await) }.boxed(),
        );
        self.terminate_reply = Some(reply);
    }

    fn start_guardrail(
        &mut self,
        guardrail: NewGuardrail,
        reply: oneshot::Sender<Result<GuardrailMetric, ActionError>>,
    ) {
        if self.guardrail_reply.is_some() {
            let _ = reply.send(Err(ActionError::Busy("guardrail submission")));
            return;
        }

        tracing::info!(
            "Recording guardrail {} for experiment {}",
            guardrail.name,
            self.experiment_id
        );
        let payload = guardrail.into_create(&self.experiment_id);
        let api = self.api.clone();
        self.in_flight.push(
            async move { Completion::GuardrailWritten(api.create_guardrail(&payload).await) }.boxed(),
        );
        self.guardrail_reply = Some(reply);
    }

    fn handle_completion(&mut self, done: Completion<L::Channel>) {
        match done {
            Completion::Experiment { seq, fetch, result } => self.apply_experiment(seq, fetch, result),

            Completion::Report { seq, fetch, result } => {
                if fetch == ReportFetch::Mount {
                    self.awaiting_report = false;
                }
                match result {
                    Ok(report) => {
                        if self.offer_report(report) == ReportMerge::Accepted
                            && fetch == ReportFetch::Resubscribe
                        {
                            self.fetch_snapshots();
                        }
                    }
                    Err(e) if seq < self.applied.report => {
                        tracing::debug!(
                            "Ignoring failed report fetch for {} superseded by a newer report: {}",
                            self.experiment_id,
                            e
                        );
                    }
                    Err(e) => {
                        tracing::debug!("Report fetch for {} failed: {}", self.experiment_id, e);
                        self.view.fail_report(e.detail());
                    }
                }
            }

            Completion::Snapshots { seq, result } => {
                if seq < self.applied.snapshots {
                    tracing::debug!("Discarding out-of-order snapshot list for {}", self.experiment_id);
                    return;
                }
                self.applied.snapshots = seq;
                match result {
                    Ok(snapshots) => self.view.merge_snapshots(snapshots),
                    Err(e) => self.view.fail_snapshots(e.detail()),
                }
            }

            Completion::Guardrails { seq, result } => {
                if seq < self.applied.guardrails {
                    tracing::debug!("Discarding out-of-order guardrail list for {}", self.experiment_id);
                    return;
                }
                self.applied.guardrails = seq;
                match result {
                    Ok(guardrails) => self.view.merge_guardrails(guardrails),
                    Err(e) => self.view.fail_guardrails(e.detail()),
                }
            }

            Completion::Connected(result) => {
                self.connecting = false;
                match result {
                    Ok(channel) => {
                        let resubscribed = self.backoff.attempt() > 0;
                        self.backoff.reset();
                        self.channel = Some(channel);
                        self.view.channel = ChannelStatus::Live;
                        if resubscribed {
                            tracing::info!("Live channel for {} reconnected", self.experiment_id);
                            self.fetch_report(ReportFetch::Resubscribe);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Live channel for {} unavailable: {}", self.experiment_id, e);
                        self.schedule_reconnect();
                    }
                }
            }

            Completion::TerminateWritten(result) => match result {
                Ok(_) => {
                    // The write response is not trusted as the new state
                    self.fetch_experiment(ExperimentFetch::ConfirmTerminate);
                }
                Err(e) => {
                    tracing::warn!("Terminate of {} failed: {}", self.experiment_id, e);
                    self.view.last_error = Some(e.detail());
                    if let Some(reply) = self.terminate_reply.take() {
                        let _ = reply.send(Err(ActionError::Write(e)));
                    }
                }
            },

            Completion::GuardrailWritten(result) => {
                let reply = self.guardrail_reply.take();
                match result {
                    Ok(metric) => {
                        self.view.last_error = None;
                        self.view.prepend_guardrail(metric.clone());
                        self.fetch_report(ReportFetch::Refresh);
                        self.fetch_snapshots();
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(metric));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Guardrail submission for {} failed: {}", self.experiment_id, e);
                        self.view.last_error = Some(e.detail());
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(ActionError::Write(e)));
                        }
                    }
                }
            }
        }
    }

    fn apply_experiment(
        &mut self,
        seq: u64,
        fetch: ExperimentFetch,
        result: Result<Experiment, RequestError>,
    ) {
        if fetch == ExperimentFetch::Mount {
            self.awaiting_experiment = false;
        }

        let current = seq > self.applied.experiment;
        if current {
            self.applied.experiment = seq;
        } else {
            tracing::debug!("Discarding out-of-order experiment for {}", self.experiment_id);
        }

        match result {
            Ok(experiment) => {
                if fetch == ExperimentFetch::ConfirmTerminate {
                    self.view.last_error = None;
                    if let Some(reply) = self.terminate_reply.take() {
                        let _ = reply.send(Ok(experiment.clone()));
                    }
                }
                if current {
                    self.view.set_experiment(experiment);
                }
            }
            Err(e) => {
                tracing::debug!("Experiment fetch for {} failed: {}", self.experiment_id, e);
                if fetch == ExperimentFetch::ConfirmTerminate {
                    // No confirmation; never keep showing the pre-terminate status
                    self.view.fail_experiment(e.detail());
                    self.view.last_error = Some(e.detail());
                    if let Some(reply) = self.terminate_reply.take() {
                        let _ = reply.send(Err(ActionError::Unconfirmed(e)));
                    }
                } else if current {
                    self.view.fail_experiment(e.detail());
                }
            }
        }
    }

    fn offer_report(&mut self, report: ExperimentReport) -> ReportMerge {
        let merge = self.view.offer_report(report);
        match &merge {
            ReportMerge::Accepted => self.applied.report = self.seq(),
            ReportMerge::Stale { held, offered } => {
                tracing::debug!(
                    "Discarding stale report for {} ({} <= {})",
                    self.experiment_id,
                    offered,
                    held
                );
            }
            ReportMerge::Foreign(other) => {
                tracing::warn!(
                    "Discarding report for {} on the {} channel",
                    other,
                    self.experiment_id
                );
            }
        }
        merge
    }

    fn handle_frame(&mut self, frame: Option<Result<String, LiveError>>) {
        match frame {
            Some(Ok(text)) => match ExperimentReport::from_frame(&text) {
                Ok(report) => {
                    if self.offer_report(report) == ReportMerge::Accepted {
                        self.fetch_snapshots();
                    }
                }
                Err(e) => {
                    tracing::debug!("Ignoring live frame for {}: {}", self.experiment_id, e);
                }
            },
            Some(Err(e)) => {
                tracing::warn!("Live channel for {} failed: {}", self.experiment_id, e);
                self.channel = None;
                self.schedule_reconnect();
            }
            None => {
                tracing::info!("Live channel for {} closed by server", self.experiment_id);
                self.channel = None;
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                tracing::debug!(
                    "Reconnecting live channel for {} in {:?} (attempt {})",
                    self.experiment_id,
                    delay,
                    attempt
                );
                self.view.channel = ChannelStatus::Reconnecting { attempt };
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                tracing::warn!(
                    "Giving up on live channel for {} after {} attempts",
                    self.experiment_id,
                    self.backoff.attempt()
                );
                self.view.channel = ChannelStatus::Offline;
            }
        }
    }
}

/// Next frame from the channel, or never when there is none
async fn next_frame<C: LiveChannel>(channel: &mut Option<C>) -> Option<Result<String, LiveError>> {
    match channel {
        Some(channel) => channel.next_frame().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
