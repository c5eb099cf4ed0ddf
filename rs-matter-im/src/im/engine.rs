/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! The Interaction Model engine.
//!
//! [`ImEngine`] serves Read, Write, Invoke, Subscribe and Timed requests against an
//! [`InteractionModel`], runs the reporting pass of the subscriptions, and tears
//! subscriptions and in-flight transactions down when fabrics go away.
//!
//! The engine runs on a single loop and never blocks: requests are handled to completion
//! in [`ImEngine::handle`], deferred command replies come back as continuations posted
//! to the [`RunLoop`](crate::utils::runloop::RunLoop), and reports go out when
//! [`ImEngine::poll`] finds a scheduler timer expired.

use core::cell::Cell;

use std::collections::BTreeMap;
use std::rc::Rc;

use embassy_time::Duration;

use log::{debug, error, info, trace, warn};

use crate::acl::SubjectDescriptor;
use crate::dm::{
    AsyncCommandHandle, AttrDataDecoder, AttrWriteRequest, CmdInvokeRequest, CmdReply,
    ConcretePath, EventPriority, InteractionModel, PathExpander, WriteFlags,
};
use crate::error::{Error, ErrorCode};
use crate::events::EventLog;
use crate::pending::{PendingResponseTracker, MAX_PENDING_RESPONSES};
use crate::reporting::{
    ReportScheduler, ReportSchedulerImpl, SynchronizedReportScheduler, TimerQueue,
};
use crate::resumption::SubscriptionResumptionStorage;
use crate::subscriptions::{ReportContent, Subscription, SubscriptionPool};
use crate::tlv::{get_root_node_struct, to_tlv_vec, FromTLV, TLVElement, TLVWriter, TagType, ToTLV};
use crate::utils::epoch::{Clock, Timestamp};
use crate::utils::runloop::{CancelToken, Poster};

use super::{
    write_im_revision, AttrStatus, CmdPath, CommandRef, EventNumber, FabricIndex, GenericPath,
    IMStatusCode, InvReq, InvResp, NodeId, OpCode, ReadReq, StatusResp, SubscribeReq,
    SubscribeResp, SubscriptionId, TimedReq, WriteReq, WriteResp,
};

pub use report::*;

mod report;

/// Identifies an exchange of the session layer
pub type ExchangeId = u32;

/// The longest max interval the engine negotiates on its own, in seconds
pub const MAX_INTERVAL_CEILING_SECS: u16 = 3600;

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// The size of the subscription pool, and of the scheduling-node pool
    pub max_subscriptions: usize,
    pub max_subscriptions_per_fabric: usize,
    /// The largest ReportData message the engine emits, in bytes
    pub max_report_size: usize,
    pub event_log_capacity: usize,
    /// The lowest max interval the engine accepts for a subscription, in seconds
    pub publisher_max_interval_floor: Option<u16>,
    /// Align all subscription reports on a single timer
    pub synchronized_reports: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 16,
            max_subscriptions_per_fabric: 3,
            max_report_size: 1024,
            event_log_capacity: 64,
            publisher_max_interval_floor: None,
            synchronized_reports: false,
        }
    }
}

/// The exchange a request arrived on.
#[derive(Debug, Clone)]
pub struct ExchangeCtx {
    pub id: ExchangeId,
    pub subject: SubjectDescriptor,
}

impl ExchangeCtx {
    pub fn new(id: ExchangeId, subject: SubjectDescriptor) -> Self {
        Self { id, subject }
    }
}

/// Where a message of the engine goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    /// A response on the exchange of a request
    Exchange(ExchangeId),
    /// A report of an established subscription, on an exchange initiated with the subscriber
    Subscriber {
        fab_idx: FabricIndex,
        node_id: NodeId,
        subscription_id: SubscriptionId,
    },
}

/// The session layer, as far as the engine is concerned.
pub trait MessageSink {
    /// Sends an Interaction Model message; a failure to send a subscription report
    /// terminates the subscription
    fn send(&mut self, dest: Dest, opcode: OpCode, payload: &[u8]) -> Result<(), Error>;
}

/// An AttributeDataIB list write still waiting for further chunks
#[derive(Debug, Clone, Copy)]
struct OpenList {
    path: ConcretePath,
    /// Set once a chunk failed: the rest of the list is answered with it
    failed: Option<IMStatusCode>,
}

/// A Write transaction spanning several WriteRequest messages
#[derive(Debug, Default)]
struct WriteTxn {
    timed: bool,
    open_list: Option<OpenList>,
}

/// An Invoke transaction with deferred replies still outstanding
struct PendingInvoke {
    suppress_response: bool,
    responses: Vec<InvResp>,
    tracker: PendingResponseTracker,
    paths: BTreeMap<CommandRef, (CmdPath, Option<CommandRef>)>,
    token: CancelToken,
}

#[derive(Default)]
struct ExchangeState {
    fab_idx: FabricIndex,
    timed_deadline: Option<Timestamp>,
    write: Option<WriteTxn>,
    invoke: Option<PendingInvoke>,
}

impl ExchangeState {
    fn is_idle(&self) -> bool {
        self.timed_deadline.is_none() && self.write.is_none() && self.invoke.is_none()
    }
}

/// The Interaction Model engine.
pub struct ImEngine<M> {
    model: M,
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    sink: Box<dyn MessageSink>,
    poster: Poster<ImEngine<M>>,
    subscriptions: SubscriptionPool,
    events: EventLog,
    resumption: Option<Box<dyn SubscriptionResumptionStorage>>,
    exchanges: BTreeMap<ExchangeId, ExchangeState>,
}

impl<M> ImEngine<M>
where
    M: InteractionModel + 'static,
{
    /// Creates the engine.
    ///
    /// Deferred command replies are delivered as continuations posted through `poster`;
    /// the loop behind it must run with the engine as its context.
    pub fn new(
        model: M,
        config: EngineConfig,
        clock: Rc<dyn Clock>,
        sink: Box<dyn MessageSink>,
        poster: Poster<ImEngine<M>>,
    ) -> Self {
        let scheduler: Box<dyn ReportScheduler> = if config.synchronized_reports {
            Box::new(SynchronizedReportScheduler::new(
                config.max_subscriptions,
                TimerQueue::new(),
            ))
        } else {
            Box::new(ReportSchedulerImpl::new(
                config.max_subscriptions,
                TimerQueue::new(),
            ))
        };

        Self {
            model,
            subscriptions: SubscriptionPool::new(scheduler, config.max_subscriptions_per_fabric),
            events: EventLog::new(config.event_log_capacity),
            config,
            clock,
            sink,
            poster,
            resumption: None,
            exchanges: BTreeMap::new(),
        }
    }

    /// Persists subscriptions into `storage`, so that they can be resumed after a restart
    pub fn with_resumption(mut self, storage: Box<dyn SubscriptionResumptionStorage>) -> Self {
        self.set_resumption(storage);
        self
    }

    pub fn set_resumption(&mut self, storage: Box<dyn SubscriptionResumptionStorage>) {
        self.resumption = Some(storage);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionPool {
        &self.subscriptions
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn resumption(&self) -> Option<&dyn SubscriptionResumptionStorage> {
        self.resumption.as_deref()
    }

    /// Handles one Interaction Model message received on an exchange.
    ///
    /// Malformed requests are answered with an `InvalidAction` status. Errors are only
    /// returned for unknown opcodes and for failures of the session layer.
    pub fn handle(
        &mut self,
        ctx: &ExchangeCtx,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<(), Error> {
        trace!("IM: {:?} on exchange {}", opcode, ctx.id);

        let result = match opcode {
            OpCode::ReadRequest => self.read(ctx, payload),
            OpCode::WriteRequest => self.write(ctx, payload),
            OpCode::InvokeRequest => self.invoke(ctx, payload),
            OpCode::SubscribeRequest => self.subscribe(ctx, payload),
            OpCode::TimedRequest => self.timed(ctx, payload),
            OpCode::StatusResponse => {
                match get_root_node_struct(payload).and_then(|root| StatusResp::from_tlv(&root)) {
                    Ok(status) => debug!("IM: Status response: {:?}", status.status),
                    Err(e) => warn!("IM: Malformed status response: {:?}", e.code()),
                }

                Ok(())
            }
            opcode => {
                error!("Invalid opcode: {:?}", opcode);
                Err(ErrorCode::InvalidOpcode.into())
            }
        };

        if self
            .exchanges
            .get(&ctx.id)
            .is_some_and(ExchangeState::is_idle)
        {
            self.exchanges.remove(&ctx.id);
        }

        result
    }

    /// Forgets an exchange closed by the session layer.
    ///
    /// Deferred command replies of the exchange are discarded; a chunked list write left
    /// open is abandoned without being committed.
    pub fn close_exchange(&mut self, id: ExchangeId) {
        if let Some(state) = self.exchanges.remove(&id) {
            if let Some(invoke) = state.invoke {
                invoke.token.cancel();
                debug!(
                    "Exchange {} closed with {} deferred replies outstanding",
                    id,
                    invoke.tracker.count()
                );
            }

            if let Some(open) = state.write.and_then(|txn| txn.open_list) {
                warn!("List write of {} abandoned", open.path);
            }
        }
    }

    fn read(&mut self, ctx: &ExchangeCtx, payload: &[u8]) -> Result<(), Error> {
        let req = match get_root_node_struct(payload).and_then(|root| ReadReq::from_tlv(&root)) {
            Ok(req) => req,
            Err(e) => return self.reject(ctx.id, e),
        };

        debug!("IM: Read request: {:?}", req);

        if req.attr_requests.is_none() && req.event_requests.is_none() {
            return self.send_status(ctx.id, IMStatusCode::InvalidAction);
        }

        let mut items = report::plan_attributes(
            &self.model,
            req.attr_requests.as_deref().unwrap_or_default(),
            req.dataver_filters.as_deref().unwrap_or_default(),
        );

        if let Some(paths) = &req.event_requests {
            items.extend(report::plan_events(
                &self.model,
                &self.events,
                &ctx.subject,
                paths,
                event_min(&req),
            ));
        }

        let mut report = Report::new(None, ctx.subject.clone(), req.fabric_filtered, true, items);

        self.send_report(Dest::Exchange(ctx.id), &mut report)
            .map(|_| ())
    }

    fn write(&mut self, ctx: &ExchangeCtx, payload: &[u8]) -> Result<(), Error> {
        let root = match get_root_node_struct(payload) {
            Ok(root) => root,
            Err(e) => return self.reject(ctx.id, e),
        };

        let req = match WriteReq::from_tlv(&root) {
            Ok(req) => req,
            Err(e) => return self.reject(ctx.id, e),
        };

        debug!(
            "IM: Write request: {} attributes, more chunks: {}",
            req.write_requests.len(),
            req.more_chunks
        );

        // A continuation of a chunked write inherits the timed state of its first message
        let txn = self
            .exchanges
            .get_mut(&ctx.id)
            .and_then(|state| state.write.take());

        let mut txn = match txn {
            Some(txn) => txn,
            None => {
                if let Some(status) = self.check_timed(ctx.id, req.timed_request) {
                    return self.send_status(ctx.id, status);
                }

                WriteTxn {
                    timed: req.timed_request,
                    open_list: None,
                }
            }
        };

        let now = self.clock.now();
        let mut statuses = Vec::new();

        for (index, data) in req.write_requests.iter().enumerate() {
            let gp = data.path.to_gp();
            let concrete = ConcretePath::from_gp(&gp);

            if let Some(open) = txn.open_list {
                if !(data.path.is_list_append() && concrete == Some(open.path)) {
                    self.close_list(&ctx.subject, txn.timed, open, now);
                    txn.open_list = None;
                }
            }

            let Some(path) = concrete else {
                self.write_wildcard(ctx, &txn, &gp, data.data, now);
                continue;
            };

            let is_list = self
                .model
                .metadata()
                .attribute(path.endpoint, path.cluster, path.leaf)
                .map(|attr| attr.is_list())
                .unwrap_or(false);

            let mut flags = if txn.timed {
                WriteFlags::TIMED
            } else {
                WriteFlags::empty()
            };

            if is_list && data.path.list_index.is_none() {
                flags |= WriteFlags::LIST_FIRST_CHUNK;
            }

            let in_list = is_list
                && (flags.contains(WriteFlags::LIST_FIRST_CHUNK) || txn.open_list.is_some());

            if in_list {
                let continued = match req.write_requests.get(index + 1) {
                    Some(next) => {
                        next.path.is_list_append()
                            && ConcretePath::from_gp(&next.path.to_gp()) == Some(path)
                    }
                    None => req.more_chunks,
                };

                if !continued {
                    flags |= WriteFlags::LIST_LAST_CHUNK;
                }
            }

            let failed = txn
                .open_list
                .filter(|open| open.path == path)
                .and_then(|open| open.failed);

            let result = match failed {
                Some(status) => Err(status),
                None => self
                    .model
                    .write_attribute(
                        &AttrWriteRequest {
                            path,
                            list_index: data.path.list_index,
                            data_ver: data.data_ver,
                            subject: &ctx.subject,
                            flags,
                        },
                        &AttrDataDecoder::new(data.data, data.path.list_index),
                    )
                    .map_err(IMStatusCode::from),
            };

            match result {
                Ok(()) => {
                    self.subscriptions.mark_attribute_changed(&path, now);
                }
                Err(status) => debug!("{}::Write failed: {:?}", path, status),
            }

            if in_list {
                txn.open_list = (!flags.contains(WriteFlags::LIST_LAST_CHUNK)).then_some(OpenList {
                    path,
                    failed: result.err(),
                });
            }

            statuses.push(AttrStatus::new(
                &gp,
                result.err().unwrap_or(IMStatusCode::Success),
                None,
            ));
        }

        if req.more_chunks {
            self.exchange(ctx).write = Some(txn);
        } else if let Some(open) = txn.open_list {
            self.close_list(&ctx.subject, txn.timed, open, now);
        }

        if req.suppress_response {
            return Ok(());
        }

        let resp = WriteResp {
            write_responses: statuses,
        };

        self.send_tlv(Dest::Exchange(ctx.id), OpCode::WriteResponse, &resp)
    }

    /// Writes a wildcard path to every concrete attribute it expands to.
    ///
    /// Wildcard writes are neither chunked nor reported: failures are dropped.
    fn write_wildcard(
        &mut self,
        ctx: &ExchangeCtx,
        txn: &WriteTxn,
        gp: &GenericPath,
        data: TLVElement,
        now: Timestamp,
    ) {
        let expanded = PathExpander::new(self.model.metadata())
            .expand_attributes(gp)
            .unwrap_or_default();

        for path in expanded {
            let mut flags = if txn.timed {
                WriteFlags::TIMED
            } else {
                WriteFlags::empty()
            };

            let is_list = self
                .model
                .metadata()
                .attribute(path.endpoint, path.cluster, path.leaf)
                .map(|attr| attr.is_list())
                .unwrap_or(false);

            if is_list {
                flags |= WriteFlags::LIST_FIRST_CHUNK | WriteFlags::LIST_LAST_CHUNK;
            }

            let req = AttrWriteRequest {
                path,
                list_index: None,
                data_ver: None,
                subject: &ctx.subject,
                flags,
            };

            match self
                .model
                .write_attribute(&req, &AttrDataDecoder::new(data, None))
            {
                Ok(()) => {
                    self.subscriptions.mark_attribute_changed(&path, now);
                }
                Err(e) => trace!("{}::Write skipped: {:?}", path, e.code()),
            }
        }
    }

    /// Commits a list write whose last chunk carried no element
    fn close_list(
        &mut self,
        subject: &SubjectDescriptor,
        timed: bool,
        open: OpenList,
        now: Timestamp,
    ) {
        if open.failed.is_some() {
            return;
        }

        let mut flags = WriteFlags::LIST_LAST_CHUNK;
        if timed {
            flags |= WriteFlags::TIMED;
        }

        let req = AttrWriteRequest {
            path: open.path,
            list_index: None,
            data_ver: None,
            subject,
            flags,
        };

        match self.model.write_attribute(&req, &AttrDataDecoder::empty()) {
            Ok(()) => {
                self.subscriptions.mark_attribute_changed(&open.path, now);
            }
            Err(e) => warn!("{}: completing the list write failed: {:?}", open.path, e.code()),
        }
    }

    fn invoke(&mut self, ctx: &ExchangeCtx, payload: &[u8]) -> Result<(), Error> {
        let root = match get_root_node_struct(payload) {
            Ok(root) => root,
            Err(e) => return self.reject(ctx.id, e),
        };

        let req = match InvReq::from_tlv(&root) {
            Ok(req) => req,
            Err(e) => return self.reject(ctx.id, e),
        };

        debug!("IM: Invoke request: {} commands", req.invoke_requests.len());

        if let Some(status) = self.check_timed(ctx.id, req.timed_request) {
            return self.send_status(ctx.id, status);
        }

        if self
            .exchanges
            .get(&ctx.id)
            .is_some_and(|state| state.invoke.is_some())
        {
            return self.send_status(ctx.id, IMStatusCode::Busy);
        }

        if let Some(status) = check_batch(&req) {
            return self.send_status(ctx.id, status);
        }

        // Shared by every deferred reply, so that closing the exchange cancels them all
        let token = CancelToken::new();
        let invoke_token = token.clone();
        let poster = self.poster.clone();
        let exchange = ctx.id;

        // Deferred replies are keyed per expanded path: the expansions of a wildcard
        // command all share its command ref
        let deferral_key = Rc::new(Cell::new(0 as CommandRef));
        let current_key = deferral_key.clone();

        let deferrer = move |path: CmdPath, command_ref: Option<CommandRef>| {
            let poster = poster.clone();
            let continuation_token = token.clone();
            let key = current_key.get();

            AsyncCommandHandle::new(path, command_ref, token.clone(), move |resp| {
                let posted =
                    poster.post_cancellable(&continuation_token, move |engine: &mut ImEngine<M>| {
                        engine.complete_invoke(exchange, key, resp)
                    });

                if let Err(e) = posted {
                    error!("Deferred reply {} on exchange {} lost: {:?}", key, exchange, e.code());
                }
            })
        };

        let mut pending = PendingInvoke {
            suppress_response: req.suppress_response,
            responses: Vec::new(),
            tracker: PendingResponseTracker::new(),
            paths: BTreeMap::new(),
            token: invoke_token,
        };

        let mut next_key: CommandRef = 0;

        for data in &req.invoke_requests {
            let gp = data.path.to_gp();

            let expanded = match PathExpander::new(self.model.metadata()).expand_commands(&gp) {
                Ok(expanded) => expanded,
                Err(e) => {
                    pending.responses.push(InvResp::status(
                        data.path,
                        e.into(),
                        data.command_ref,
                    ));
                    continue;
                }
            };

            for path in expanded {
                let key = next_key;
                next_key = next_key.wrapping_add(1);
                deferral_key.set(key);

                let cmd_req = CmdInvokeRequest {
                    path,
                    command_ref: data.command_ref,
                    subject: &ctx.subject,
                    timed: req.timed_request,
                };

                let details = cmd_req.details();
                let mut reply = CmdReply::new(&details, Some(&deferrer));

                let result = self.model.invoke(&cmd_req, data.data.as_ref(), &mut reply);

                match result {
                    Err(e) => {
                        if gp.is_wildcard() {
                            trace!("{}::Invoke skipped: {:?}", path, e.code());
                        } else {
                            pending.responses.push(InvResp::status(
                                path.cmd_path(),
                                e.into(),
                                data.command_ref,
                            ));
                        }
                    }
                    Ok(()) => match reply.into_response() {
                        Some(resp) => pending.responses.push(resp),
                        None => match pending.tracker.add(key) {
                            Ok(()) => {
                                pending
                                    .paths
                                    .insert(key, (path.cmd_path(), data.command_ref));
                            }
                            Err(e) => {
                                // Its completion finds no tracked key and goes nowhere
                                warn!("{}: deferred reply not tracked: {:?}", path, e.code());

                                pending.responses.push(InvResp::status(
                                    path.cmd_path(),
                                    IMStatusCode::Failure,
                                    data.command_ref,
                                ));
                            }
                        },
                    },
                }
            }
        }

        if pending.tracker.is_empty() {
            self.send_invoke_response(ctx.id, pending)
        } else {
            debug!(
                "IM: Invoke on exchange {} waits for {} deferred replies",
                ctx.id,
                pending.tracker.count()
            );

            self.exchange(ctx).invoke = Some(pending);

            Ok(())
        }
    }

    /// Delivers the deferred command reply `key` of the Invoke transaction on `exchange`.
    ///
    /// Once the last deferred reply arrived, the InvokeResponse goes out.
    pub fn complete_invoke(&mut self, exchange: ExchangeId, key: CommandRef, resp: InvResp) {
        let Some(pending) = self
            .exchanges
            .get_mut(&exchange)
            .and_then(|state| state.invoke.as_mut())
        else {
            debug!("Deferred reply for exchange {} dropped: no transaction", exchange);
            return;
        };

        if pending.tracker.remove(key).is_err() {
            warn!("Deferred reply {} dropped: not tracked", key);
            return;
        }

        pending.responses.push(resp);

        if pending.tracker.is_empty() {
            if let Some(pending) = self.take_invoke(exchange) {
                if let Err(e) = self.send_invoke_response(exchange, pending) {
                    warn!("Sending the invoke response failed: {:?}", e.code());
                }
            }
        }
    }

    /// Gives up on the deferred replies of the Invoke transaction on `exchange`.
    ///
    /// Every reply still outstanding is answered with `Failure`.
    pub fn abort_invoke(&mut self, exchange: ExchangeId) -> Result<(), Error> {
        let Some(mut pending) = self.take_invoke(exchange) else {
            return Ok(());
        };

        pending.token.cancel();

        while let Some(key) = pending.tracker.pop_pending_response() {
            if let Some((path, command_ref)) = pending.paths.get(&key) {
                pending
                    .responses
                    .push(InvResp::status(*path, IMStatusCode::Failure, *command_ref));
            }
        }

        self.send_invoke_response(exchange, pending)
    }

    fn take_invoke(&mut self, exchange: ExchangeId) -> Option<PendingInvoke> {
        let state = self.exchanges.get_mut(&exchange)?;
        let pending = state.invoke.take();

        if state.is_idle() {
            self.exchanges.remove(&exchange);
        }

        pending
    }

    fn send_invoke_response(
        &mut self,
        exchange: ExchangeId,
        pending: PendingInvoke,
    ) -> Result<(), Error> {
        if pending.suppress_response {
            return Ok(());
        }

        let payload = to_tlv_vec(&InvokeResponse {
            responses: &pending.responses,
        })?;

        self.send(Dest::Exchange(exchange), OpCode::InvokeResponse, &payload)
    }

    fn subscribe(&mut self, ctx: &ExchangeCtx, payload: &[u8]) -> Result<(), Error> {
        let parsed = get_root_node_struct(payload).and_then(|root| SubscribeReq::from_tlv(&root));

        let req = match parsed {
            Ok(req) => req,
            Err(e) => return self.reject(ctx.id, e),
        };

        debug!("IM: Subscribe request: {:?}", req);

        let subject = &ctx.subject;

        if subject.fab_idx == 0 || req.min_int_floor > req.max_int_ceil {
            return self.send_status(ctx.id, IMStatusCode::InvalidAction);
        }

        if let Some(status) = self.validate_subscription(subject, &req) {
            return self.send_status(ctx.id, status);
        }

        if !req.keep_subs {
            for sub in self
                .subscriptions
                .remove_for_peer(subject.fab_idx, subject.node_id)
            {
                self.forget_subscription(&sub);
            }

            info!(
                "All subscriptions for [F:{:x},P:{:x}] removed",
                subject.fab_idx, subject.node_id
            );
        }

        let max_int_secs = negotiate_max_interval(
            req.min_int_floor,
            req.max_int_ceil,
            self.config.publisher_max_interval_floor,
        );

        let now = self.clock.now();
        let id = self.subscriptions.next_id();

        let sub = Subscription::new(
            id,
            subject.clone(),
            req.min_int_floor,
            max_int_secs,
            req.fabric_filtered,
            req.attr_requests.clone().unwrap_or_default(),
            req.event_requests.clone().unwrap_or_default(),
            event_min(&req.to_read_req()),
        )
        .with_dataver_filters(req.dataver_filters.clone().unwrap_or_default());

        if let Err(e) = self.subscriptions.add(sub, now) {
            return self.send_status(ctx.id, e.into());
        }

        // Until the subscription is confirmed, any failure takes it down again
        let mut guard = scopeguard::guard(&mut *self, move |engine| {
            warn!("Subscription {} failed to establish", id);
            engine.subscriptions.remove(id);
        });

        guard.send_priming_report(ctx, id)?;
        guard.send_tlv(
            Dest::Exchange(ctx.id),
            OpCode::SubscribeResponse,
            &SubscribeResp {
                subscription_id: id,
                max_int: max_int_secs,
            },
        )?;

        let engine = scopeguard::ScopeGuard::into_inner(guard);

        let event_min = engine.events.next_number();
        engine.subscriptions.report_sent(id, event_min, now);

        if let (Some(storage), Some(sub)) =
            (engine.resumption.as_mut(), engine.subscriptions.get(id))
        {
            if let Err(e) = storage.save(&sub.info()) {
                warn!("Subscription {} not persisted: {:?}", id, e.code());
            }
        }

        Ok(())
    }

    /// Checks that the subscription covers at least one existing and accessible path
    fn validate_subscription(
        &self,
        subject: &SubjectDescriptor,
        req: &SubscribeReq,
    ) -> Option<IMStatusCode> {
        let expander = PathExpander::new(self.model.metadata());

        let attrs = req
            .attr_requests
            .iter()
            .flatten()
            .filter_map(|path| expander.expand_attributes(&path.to_gp()).ok())
            .flatten()
            .map(|path| self.model.check_attr_access(subject, &path));

        let events = req
            .event_requests
            .iter()
            .flatten()
            .filter_map(|path| expander.expand_events(&path.to_gp()).ok())
            .flatten()
            .map(|path| self.model.check_event_access(subject, &path));

        let mut exists = false;

        for check in attrs.chain(events) {
            match check {
                Ok(()) => return None,
                Err(e) if e.code() == ErrorCode::UnsupportedAccess => exists = true,
                Err(e) if e.code() == ErrorCode::UnsupportedRead => exists = true,
                Err(_) => (),
            }
        }

        Some(if exists {
            IMStatusCode::UnsupportedAccess
        } else {
            IMStatusCode::InvalidAction
        })
    }

    fn send_priming_report(&mut self, ctx: &ExchangeCtx, id: SubscriptionId) -> Result<(), Error> {
        let sub = self.subscriptions.get(id).ok_or(ErrorCode::NotFound)?;
        let mut report = self.full_report(sub);

        self.send_report(Dest::Exchange(ctx.id), &mut report)
            .map(|_| ())
    }

    fn full_report(&self, sub: &Subscription) -> Report {
        let mut items =
            report::plan_attributes(&self.model, sub.attr_paths(), sub.dataver_filters());

        items.extend(report::plan_events(
            &self.model,
            &self.events,
            sub.subject(),
            sub.event_paths(),
            sub.event_min(),
        ));

        Report::new(
            Some(sub.id()),
            sub.subject().clone(),
            sub.is_fabric_filtered(),
            false,
            items,
        )
    }

    fn changes_report(&self, sub: &Subscription, changed: Vec<ConcretePath>) -> Report {
        let mut items = changed
            .into_iter()
            .map(|path| ReportItem::Attr {
                path,
                wildcard: true,
            })
            .collect::<Vec<_>>();

        let events = sub
            .event_paths()
            .iter()
            .map(|path| path.to_gp())
            .collect::<Vec<_>>();

        items.extend(
            self.events
                .matching(&events, sub.event_min())
                .filter(|record| record.is_visible_to(sub.fab_idx()))
                .filter(|record| {
                    self.model
                        .check_event_access(sub.subject(), &record.path)
                        .is_ok()
                })
                .map(|record| ReportItem::Event(record.number)),
        );

        Report::new(
            Some(sub.id()),
            sub.subject().clone(),
            sub.is_fabric_filtered(),
            false,
            items,
        )
    }

    fn timed(&mut self, ctx: &ExchangeCtx, payload: &[u8]) -> Result<(), Error> {
        let req = match get_root_node_struct(payload).and_then(|root| TimedReq::from_tlv(&root)) {
            Ok(req) => req,
            Err(e) => return self.reject(ctx.id, e),
        };

        debug!("IM: Timed request: {} ms", req.timeout_ms);

        let deadline = self.clock.now() + Duration::from_millis(req.timeout_ms as _);
        self.exchange(ctx).timed_deadline = Some(deadline);

        self.send_status(ctx.id, IMStatusCode::Success)
    }

    /// Consumes the timed state of the exchange, returning the status to answer with if the
    /// request does not agree with it
    fn check_timed(&mut self, exchange: ExchangeId, timed_request: bool) -> Option<IMStatusCode> {
        let deadline = self
            .exchanges
            .get_mut(&exchange)
            .and_then(|state| state.timed_deadline.take());

        if timed_request != deadline.is_some() {
            Some(IMStatusCode::TimedRequestMisMatch)
        } else if deadline.is_some_and(|deadline| self.clock.now() > deadline) {
            Some(IMStatusCode::Timeout)
        } else {
            None
        }
    }

    /// Fires the expired scheduler timers and runs a reporting pass if one is due.
    ///
    /// Returns the number of subscriptions reported on.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();

        let fired = self.subscriptions.fire_expired_timers(now);
        let priming = self.subscriptions.iter().any(Subscription::is_priming);

        if fired || priming {
            self.run_reports()
        } else {
            0
        }
    }

    /// The moment [`ImEngine::poll`] has something to do next
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.subscriptions.next_deadline()
    }

    /// The reporting pass: reports on every subscription which is reportable now.
    ///
    /// A subscription whose report cannot be sent is terminated.
    pub fn run_reports(&mut self) -> usize {
        let now = self.clock.now();
        let mut reported = 0;

        for id in self.subscriptions.reportable(now) {
            match self.report(id, now) {
                Ok(()) => reported += 1,
                Err(e) => {
                    warn!("Subscription {}: sending the report failed: {:?}", id, e.code());

                    // Kept persisted: the peer may come back after a restart
                    self.subscriptions.remove(id);
                }
            }
        }

        reported
    }

    fn report(&mut self, id: SubscriptionId, now: Timestamp) -> Result<(), Error> {
        let sub = self.subscriptions.get(id).ok_or(ErrorCode::NotFound)?;

        let dest = Dest::Subscriber {
            fab_idx: sub.fab_idx(),
            node_id: sub.node_id(),
            subscription_id: id,
        };

        let mut report = match sub.report_content() {
            ReportContent::Full => self.full_report(sub),
            ReportContent::Changes(changed) => self.changes_report(sub, changed),
        };

        let event_min = self.events.next_number();

        let chunks = self.send_report(dest, &mut report)?;
        debug!("Subscription {}: reported in {} messages", id, chunks);

        self.subscriptions.report_sent(id, event_min, now);

        Ok(())
    }

    /// Sends every message of `report`, returning their number
    fn send_report(&mut self, dest: Dest, report: &mut Report) -> Result<usize, Error> {
        let mut buf = vec![0; self.config.max_report_size];
        let mut chunks = 0;

        loop {
            let (len, more) = report.write_chunk(&self.model, &self.events, &mut buf)?;

            self.send(dest, OpCode::ReportData, &buf[..len])?;
            chunks += 1;

            if !more {
                break Ok(chunks);
            }
        }
    }

    /// Records that an attribute changed outside of a write, bumping the data version of
    /// its cluster and marking the subscriptions covering it dirty.
    ///
    /// Returns how many subscriptions got dirty.
    pub fn notify_attribute_changed(&mut self, path: &ConcretePath) -> usize {
        self.model.dataver_changed(path.endpoint, path.cluster);

        let now = self.clock.now();
        self.subscriptions.mark_attribute_changed(path, now)
    }

    /// Writes an attribute on behalf of the node itself, bypassing access control and the
    /// timed-interaction and read-only enforcement.
    pub fn write_internal(&mut self, path: &ConcretePath, data: TLVElement) -> Result<(), Error> {
        let subject = SubjectDescriptor::internal();

        let is_list = self
            .model
            .metadata()
            .attribute(path.endpoint, path.cluster, path.leaf)?
            .is_list();

        let mut flags = WriteFlags::FORCE_INTERNAL;
        if is_list {
            flags |= WriteFlags::LIST_FIRST_CHUNK | WriteFlags::LIST_LAST_CHUNK;
        }

        let req = AttrWriteRequest {
            path: *path,
            list_index: None,
            data_ver: None,
            subject: &subject,
            flags,
        };

        self.model
            .write_attribute(&req, &AttrDataDecoder::new(data, None))?;

        let now = self.clock.now();
        self.subscriptions.mark_attribute_changed(path, now);

        Ok(())
    }

    /// Logs an event and marks the subscriptions covering it dirty.
    ///
    /// `fab_idx` binds the event to a fabric; 0 makes it visible to all fabrics.
    pub fn emit_event<T: ToTLV + ?Sized>(
        &mut self,
        path: &ConcretePath,
        priority: EventPriority,
        fab_idx: FabricIndex,
        data: &T,
    ) -> Result<EventNumber, Error> {
        self.model
            .metadata()
            .event_info(path.endpoint, path.cluster, path.leaf)?;

        let now = self.clock.now();
        let number = self.events.emit(*path, priority, fab_idx, now, data)?;

        self.subscriptions.mark_event_emitted(path, now);

        Ok(number)
    }

    /// Terminates a subscription on request, dropping its persisted record
    pub fn cancel_subscription(&mut self, id: SubscriptionId) -> Result<(), Error> {
        let sub = self.subscriptions.remove(id).ok_or(ErrorCode::NotFound)?;
        self.forget_subscription(&sub);

        Ok(())
    }

    fn forget_subscription(&mut self, sub: &Subscription) {
        if let Some(storage) = self.resumption.as_mut() {
            match storage.delete(&sub.info().key()) {
                Ok(()) => (),
                Err(e) if e.code() == ErrorCode::NotFound => (),
                Err(e) => warn!(
                    "Subscription {}: deleting the record failed: {:?}",
                    sub.id(),
                    e.code()
                ),
            }
        }
    }

    /// Drops everything of a removed fabric: its subscriptions and their records, its
    /// events, its in-flight transactions, and whatever the model keeps for it.
    pub fn on_fabric_removed(&mut self, fab_idx: FabricIndex) {
        let removed = self.subscriptions.remove_for_fabric(fab_idx);

        if let Some(storage) = self.resumption.as_mut() {
            if let Err(e) = storage.delete_all(fab_idx) {
                warn!("Fabric {}: deleting subscription records failed: {:?}", fab_idx, e.code());
            }
        }

        self.events.remove_fabric(fab_idx);
        self.model.remove_fabric(fab_idx);

        let exchanges = self
            .exchanges
            .iter()
            .filter(|(_, state)| state.fab_idx == fab_idx)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        for id in exchanges {
            self.close_exchange(id);
        }

        info!(
            "Fabric {} removed, with {} subscriptions",
            fab_idx,
            removed.len()
        );
    }

    /// Re-establishes the persisted subscriptions.
    ///
    /// Resumed subscriptions get a full priming report on the next reporting pass.
    /// Returns how many were resumed.
    pub fn resume_subscriptions(&mut self) -> Result<usize, Error> {
        let Some(storage) = self.resumption.as_ref() else {
            return Ok(0);
        };

        let infos = storage
            .iterate()?
            .filter_map(|info| match info {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("Skipping a subscription record: {:?}", e.code());
                    None
                }
            })
            .collect::<Vec<_>>();

        let now = self.clock.now();
        let mut resumed = 0;

        for info in infos {
            match self.subscriptions.add(Subscription::from_info(&info), now) {
                Ok(id) => {
                    info!("Subscription {} resumed", id);
                    resumed += 1;
                }
                Err(e) => warn!("Subscription {} not resumed: {:?}", info.key(), e.code()),
            }
        }

        Ok(resumed)
    }

    /// Terminates everything in flight; subscription records stay persisted
    pub fn shutdown(&mut self) {
        let exchanges = self.exchanges.keys().copied().collect::<Vec<_>>();
        for id in exchanges {
            self.close_exchange(id);
        }

        for id in self.subscriptions.ids() {
            self.subscriptions.remove(id);
        }

        info!("Interaction Model engine shut down");
    }

    fn exchange(&mut self, ctx: &ExchangeCtx) -> &mut ExchangeState {
        self.exchanges.entry(ctx.id).or_insert_with(|| ExchangeState {
            fab_idx: ctx.subject.fab_idx,
            ..Default::default()
        })
    }

    fn reject(&mut self, exchange: ExchangeId, e: Error) -> Result<(), Error> {
        warn!("IM: Malformed request on exchange {}: {:?}", exchange, e.code());
        self.send_status(exchange, e.into())
    }

    fn send_status(&mut self, exchange: ExchangeId, status: IMStatusCode) -> Result<(), Error> {
        self.send_tlv(
            Dest::Exchange(exchange),
            OpCode::StatusResponse,
            &StatusResp { status },
        )
    }

    fn send_tlv<T: ToTLV>(&mut self, dest: Dest, opcode: OpCode, msg: &T) -> Result<(), Error> {
        let payload = to_tlv_vec(msg)?;
        self.send(dest, opcode, &payload)
    }

    fn send(&mut self, dest: Dest, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        trace!("IM: {:?} to {:?}, {} bytes", opcode, dest, payload.len());
        self.sink.send(dest, opcode, payload)
    }
}

/// The InvokeResponseMessage, as sent
struct InvokeResponse<'a> {
    responses: &'a [InvResp],
}

impl ToTLV for InvokeResponse<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.bool(TagType::Context(0), false)?;
        self.responses.to_tlv(tw, TagType::Context(1))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The event number floor requested by the EventFilterIBs
fn event_min(req: &ReadReq) -> EventNumber {
    req.event_filters
        .iter()
        .flatten()
        .filter_map(|filter| filter.event_min)
        .max()
        .unwrap_or(0)
}

/// Every command of a batch must carry a distinct command ref and target a distinct path
fn check_batch(req: &InvReq) -> Option<IMStatusCode> {
    let commands = &req.invoke_requests;

    if commands.len() > MAX_PENDING_RESPONSES {
        return Some(IMStatusCode::ResourceExhausted);
    }

    if commands.len() < 2 {
        return None;
    }

    for (index, cmd) in commands.iter().enumerate() {
        let Some(command_ref) = cmd.command_ref else {
            return Some(IMStatusCode::InvalidAction);
        };

        if commands[index + 1..]
            .iter()
            .any(|other| other.command_ref == Some(command_ref) || other.path == cmd.path)
        {
            return Some(IMStatusCode::InvalidAction);
        }
    }

    None
}

/// The max interval the engine grants: the subscriber's ceiling, raised to the publisher's
/// floor and to the min interval, but never above the larger of the ceiling and one hour.
pub fn negotiate_max_interval(
    min_floor: u16,
    max_ceiling: u16,
    publisher_floor: Option<u16>,
) -> u16 {
    let max = max_ceiling
        .max(publisher_floor.unwrap_or(0))
        .max(min_floor);

    max.min(max_ceiling.max(MAX_INTERVAL_CEILING_SECS))
}
