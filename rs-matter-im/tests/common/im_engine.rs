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

use core::cell::{Cell, RefCell};

use std::rc::Rc;

use embassy_time::Instant;

use rs_matter_im::acl::{AclEntry, AclMgr, AuthMode, SubjectDescriptor, Target};
use rs_matter_im::dm::{DataModel, Endpoint, Node, Privilege};
use rs_matter_im::error::{Error, ErrorCode};
use rs_matter_im::im::engine::{Dest, ExchangeCtx, ExchangeId, MessageSink};
use rs_matter_im::im::{
    AttrPath, AttrResp, EndptId, EventPath, FabricIndex, GenericPath, IMStatusCode, InvRespMsg,
    NodeId, OpCode, ReadReq, ReportDataMsg, StatusResp, SubscribeReq, SubscribeResp, WriteResp,
};
use rs_matter_im::persist::{KvBlobStore, MemKvStore};
use rs_matter_im::resumption::DefaultSubscriptionResumptionStorage;
use rs_matter_im::tlv::{get_root_node, get_root_node_struct, to_tlv_vec, FromTLV, ToTLV};
use rs_matter_im::utils::epoch::{Clock, ManualClock, Timestamp};
use rs_matter_im::{EngineConfig, Server};

use super::handlers::{self, SharedState, TestHandler};

pub const FAB_IDX: FabricIndex = 1;
pub const PEER_NODE_ID: NodeId = 445566;
/// A peer with View privilege on endpoints 0 and 1 only
pub const VIEWER_NODE_ID: NodeId = 778899;

pub const ENDPOINTS: [EndptId; 3] = [0, 1, 2];

/// One message the engine sent
#[derive(Debug, Clone)]
pub struct Sent {
    pub at: Timestamp,
    pub dest: Dest,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Sent {
    pub fn report(&self) -> ReportDataMsg<'_> {
        assert_eq!(self.opcode, OpCode::ReportData);
        ReportDataMsg::from_tlv(&get_root_node_struct(&self.payload).unwrap()).unwrap()
    }

    pub fn status(&self) -> IMStatusCode {
        assert_eq!(self.opcode, OpCode::StatusResponse);
        StatusResp::from_tlv(&get_root_node_struct(&self.payload).unwrap())
            .unwrap()
            .status
    }

    pub fn write_resp(&self) -> WriteResp {
        assert_eq!(self.opcode, OpCode::WriteResponse);
        WriteResp::from_tlv(&get_root_node_struct(&self.payload).unwrap()).unwrap()
    }

    pub fn invoke_resp(&self) -> InvRespMsg<'_> {
        assert_eq!(self.opcode, OpCode::InvokeResponse);
        InvRespMsg::from_tlv(&get_root_node_struct(&self.payload).unwrap()).unwrap()
    }

    pub fn subscribe_resp(&self) -> SubscribeResp {
        assert_eq!(self.opcode, OpCode::SubscribeResponse);
        SubscribeResp::from_tlv(&get_root_node_struct(&self.payload).unwrap()).unwrap()
    }
}

/// A [`MessageSink`] recording everything, which can be told to fail
#[derive(Clone)]
pub struct RecordingSink {
    clock: Rc<ManualClock>,
    sent: Rc<RefCell<Vec<Sent>>>,
    failing: Rc<Cell<bool>>,
}

impl MessageSink for RecordingSink {
    fn send(&mut self, dest: Dest, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        if self.failing.get() {
            Err(ErrorCode::NoSpace)?;
        }

        self.sent.borrow_mut().push(Sent {
            at: self.clock.now(),
            dest,
            opcode,
            payload: payload.to_vec(),
        });

        Ok(())
    }
}

/// A [`MemKvStore`] which outlives the engine using it, as a flash store outlives a reboot
#[derive(Clone, Default)]
pub struct SharedStore(pub Rc<RefCell<MemKvStore>>);

impl KvBlobStore for SharedStore {
    fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
        self.0.borrow().load(key, buf)
    }

    fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        self.0.borrow_mut().store(key, data)
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        self.0.borrow_mut().remove(key)
    }
}

/// A server over three endpoints carrying the test cluster, driven by a manual clock
pub struct ImEngine {
    pub server: Server<DataModel>,
    pub clock: Rc<ManualClock>,
    sink: RecordingSink,
    states: Vec<SharedState>,
    next_exchange: ExchangeId,
}

impl ImEngine {
    pub fn new_default() -> Self {
        Self::new(EngineConfig::default(), None)
    }

    pub fn new(config: EngineConfig, store: Option<SharedStore>) -> Self {
        Self::new_at(config, store, Instant::MIN)
    }

    /// Creates the engine with its clock starting at `start`
    pub fn new_at(config: EngineConfig, store: Option<SharedStore>, start: Timestamp) -> Self {
        let clock = Rc::new(ManualClock::new());
        clock.set(start);

        let sink = RecordingSink {
            clock: clock.clone(),
            sent: Rc::new(RefCell::new(Vec::new())),
            failing: Rc::new(Cell::new(false)),
        };

        let node = Node::new(
            0,
            ENDPOINTS
                .iter()
                .map(|ep| Endpoint::new(*ep, &[], vec![handlers::cluster()]))
                .collect(),
        );

        let mut model = DataModel::new(node, default_acl());
        let mut states = Vec::new();

        for ep in ENDPOINTS {
            let state = SharedState::default();
            model
                .handlers_mut()
                .register(ep, handlers::ID, TestHandler::new(state.clone()))
                .unwrap();
            states.push(state);
        }

        let mut server = Server::new(model, config, clock.clone(), Box::new(sink.clone()));

        if let Some(store) = store {
            server = server
                .with_resumption(Box::new(DefaultSubscriptionResumptionStorage::new(store)))
                .unwrap();
        }

        Self {
            server,
            clock,
            sink,
            states,
            next_exchange: 1,
        }
    }

    pub fn state(&self, endpoint: EndptId) -> SharedState {
        self.states[endpoint as usize].clone()
    }

    pub fn subject() -> SubjectDescriptor {
        SubjectDescriptor::case(FAB_IDX, PEER_NODE_ID, &[])
    }

    pub fn viewer() -> SubjectDescriptor {
        SubjectDescriptor::case(FAB_IDX, VIEWER_NODE_ID, &[])
    }

    pub fn new_exchange(&mut self, subject: SubjectDescriptor) -> ExchangeCtx {
        let id = self.next_exchange;
        self.next_exchange += 1;

        ExchangeCtx::new(id, subject)
    }

    /// Sends `req` on a fresh exchange of the admin peer, returning the answers
    pub fn request<T: ToTLV>(&mut self, opcode: OpCode, req: &T) -> Vec<Sent> {
        let ctx = self.new_exchange(Self::subject());
        self.request_on(&ctx, opcode, req)
    }

    pub fn request_on<T: ToTLV>(
        &mut self,
        ctx: &ExchangeCtx,
        opcode: OpCode,
        req: &T,
    ) -> Vec<Sent> {
        let payload = to_tlv_vec(req).unwrap();
        self.server.handle(ctx, opcode, &payload).unwrap();

        self.take_sent()
    }

    pub fn take_sent(&self) -> Vec<Sent> {
        self.sink.sent.borrow_mut().drain(..).collect()
    }

    pub fn fail_sends(&self, failing: bool) {
        self.sink.failing.set(failing);
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Runs the server at every deadline it asks for, up to and including `until`
    pub fn run_until(&mut self, until: Timestamp) -> Vec<Sent> {
        let mut rounds = 0;

        while let Some(deadline) = self.server.run_once().filter(|deadline| *deadline <= until) {
            rounds += 1;
            assert!(rounds < 10_000, "scheduler stuck at {:?}", deadline);

            if deadline > self.now() {
                self.clock.set(deadline);
            }
        }

        if until > self.now() {
            self.clock.set(until);
            self.server.run_once();
        }

        self.take_sent()
    }
}

/// The entry granting the admin peer Administer privilege on the whole node
pub fn admin_acl_entry() -> AclEntry {
    let mut admin = AclEntry::new(Privilege::ADMIN, AuthMode::Case);
    admin.add_subject(PEER_NODE_ID).unwrap();

    admin
}

fn default_acl() -> AclMgr {
    let mut acl = AclMgr::new();

    acl.add(FAB_IDX, admin_acl_entry()).unwrap();

    let mut viewer = AclEntry::new(Privilege::VIEW, AuthMode::Case);
    viewer.add_subject(VIEWER_NODE_ID).unwrap();
    viewer.add_target(Target::new(Some(0), None, None)).unwrap();
    viewer.add_target(Target::new(Some(1), None, None)).unwrap();
    acl.add(FAB_IDX, viewer).unwrap();

    acl
}

pub fn attr_path(endpoint: Option<EndptId>, attr: Option<u32>) -> AttrPath {
    AttrPath::new(&GenericPath::new(endpoint, Some(handlers::ID), attr))
}

pub fn event_path(endpoint: Option<EndptId>, event: Option<u32>) -> EventPath {
    EventPath::new(&GenericPath::new(endpoint, Some(handlers::ID), event))
}

pub fn read_req(attrs: &[AttrPath]) -> ReadReq {
    ReadReq {
        attr_requests: Some(attrs.to_vec()),
        event_requests: None,
        event_filters: None,
        fabric_filtered: true,
        dataver_filters: None,
    }
}

pub fn subscribe_req(min: u16, max: u16, attrs: &[AttrPath]) -> SubscribeReq {
    SubscribeReq {
        keep_subs: true,
        min_int_floor: min,
        max_int_ceil: max,
        attr_requests: (!attrs.is_empty()).then(|| attrs.to_vec()),
        event_requests: None,
        event_filters: None,
        fabric_filtered: true,
        dataver_filters: None,
    }
}

/// Encodes `value` as a standalone element, for use as write or command data
pub fn tlv<T: ToTLV + ?Sized>(value: &T) -> Vec<u8> {
    to_tlv_vec(value).unwrap()
}

/// The attribute reports of a sequence of ReportData messages, in order
pub fn attr_reports<'a>(sent: &'a [Sent]) -> Vec<AttrResp<'a>> {
    sent.iter()
        .filter(|sent| sent.opcode == OpCode::ReportData)
        .flat_map(|sent| sent.report().attr_reports.unwrap_or_default())
        .collect()
}

/// The u16 value carried by an attribute report
pub fn u16_value(resp: &AttrResp) -> u16 {
    u16::from_tlv(&resp.data().unwrap().data).unwrap()
}

/// Decodes the element `encoded` was produced from
pub fn decode<'a, T: FromTLV<'a>>(encoded: &'a [u8]) -> T {
    T::from_tlv(&get_root_node(encoded).unwrap()).unwrap()
}
