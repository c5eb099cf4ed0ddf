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

use core::cell::RefCell;

use std::rc::Rc;

use rs_matter_im::dm::{
    Access, AsyncCommandHandle, AttrDataDecoder, AttrDataEncoder, AttrDetails, Attribute,
    CmdDetails, CmdReply, Cluster, Command, Event, EventPriority, Handler, ListOp, Quality,
};
use rs_matter_im::error::{Error, ErrorCode};
use rs_matter_im::im::{AttrId, ClusterId, CmdId, EventId, IMStatusCode};
use rs_matter_im::tlv::{FromTLV, TLVElement};

pub const ID: ClusterId = 0xFFF1_FC05;

pub const ATTR_VALUE: AttrId = 0;
pub const ATTR_LIST: AttrId = 1;
pub const ATTR_TIMED: AttrId = 2;
pub const ATTR_ADMIN: AttrId = 3;

pub const CMD_ECHO: CmdId = 0;
pub const CMD_ECHO_RESP: CmdId = 1;
pub const CMD_DEFER: CmdId = 2;
pub const CMD_TIMED: CmdId = 3;

pub const EVENT_ALARM: EventId = 0;

/// A list element the cluster refuses to store
pub const REJECTED_ITEM: u32 = 0xDEAD;

pub fn cluster() -> Cluster {
    Cluster::new(
        ID,
        1,
        0,
        &[
            Attribute::new(ATTR_VALUE, Access::RWVO, Quality::NONE),
            Attribute::new(ATTR_LIST, Access::RWVO, Quality::L),
            Attribute::new(
                ATTR_TIMED,
                Access::RWVO.union(Access::TIMED_ONLY),
                Quality::NONE,
            ),
            Attribute::new(ATTR_ADMIN, Access::RWVA, Quality::NONE),
        ],
        &[
            Command::new(CMD_ECHO, Some(CMD_ECHO_RESP), Access::WO),
            Command::new(CMD_DEFER, None, Access::WO),
            Command::new(CMD_TIMED, None, Access::WO.union(Access::TIMED_ONLY)),
        ],
    )
    .with_events(&[Event::new(EVENT_ALARM, EventPriority::Info, Access::RV)])
}

/// What one instance of the test cluster holds, shared with the test body
#[derive(Debug, Default)]
pub struct TestState {
    pub value: u16,
    pub list: Vec<u32>,
    pub timed: u16,
    pub admin: u16,
    pub list_writes: usize,
    pub aborted_list_writes: usize,
    pub deferred: Vec<AsyncCommandHandle>,
}

pub type SharedState = Rc<RefCell<TestState>>;

pub struct TestHandler {
    state: SharedState,
    staged: Option<Vec<u32>>,
}

impl TestHandler {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            staged: None,
        }
    }
}

impl Handler for TestHandler {
    fn read(&self, attr: &AttrDetails, encoder: &mut AttrDataEncoder) -> Result<(), Error> {
        let state = self.state.borrow();

        match attr.attr_id {
            ATTR_VALUE => encoder.encode(&state.value),
            ATTR_LIST => encoder.encode_list(|list| {
                for item in &state.list {
                    list.encode(item)?;
                }

                Ok(())
            }),
            ATTR_TIMED => encoder.encode(&state.timed),
            ATTR_ADMIN => encoder.encode(&state.admin),
            _ => Err(ErrorCode::AttributeNotFound.into()),
        }
    }

    fn write(&mut self, attr: &AttrDetails, data: &AttrDataDecoder) -> Result<(), Error> {
        match attr.attr_id {
            ATTR_VALUE => self.state.borrow_mut().value = data.decode()?,
            ATTR_TIMED => self.state.borrow_mut().timed = data.decode()?,
            ATTR_ADMIN => self.state.borrow_mut().admin = data.decode()?,
            ATTR_LIST => {
                let items = match data.list_op()? {
                    ListOp::ReplaceAll(array) => Vec::<u32>::from_tlv(&array)?,
                    ListOp::AddItem(item) => vec![u32::from_tlv(&item)?],
                };

                if items.contains(&REJECTED_ITEM) {
                    Err(ErrorCode::ConstraintError)?;
                }

                let staged = self.staged.get_or_insert_with(Vec::new);
                if matches!(data.list_op()?, ListOp::ReplaceAll(_)) {
                    staged.clear();
                }

                staged.extend(items);
            }
            _ => Err(ErrorCode::AttributeNotFound)?,
        }

        Ok(())
    }

    fn list_write_begin(&mut self, _attr: &AttrDetails) -> Result<(), Error> {
        self.staged = Some(Vec::new());

        Ok(())
    }

    fn list_write_end(&mut self, _attr: &AttrDetails, successful: bool) -> Result<(), Error> {
        let staged = self.staged.take();
        let mut state = self.state.borrow_mut();

        if successful {
            state.list = staged.unwrap_or_default();
            state.list_writes += 1;
        } else {
            state.aborted_list_writes += 1;
        }

        Ok(())
    }

    fn invoke(
        &mut self,
        cmd: &CmdDetails,
        data: Option<&TLVElement>,
        reply: &mut CmdReply,
    ) -> Result<(), Error> {
        match cmd.cmd_id {
            CMD_ECHO => {
                let value = u16::from_tlv(data.ok_or(ErrorCode::InvalidCommand)?)?;
                reply.set(CMD_ECHO_RESP, &value.wrapping_mul(2))
            }
            CMD_DEFER => {
                let handle = reply.defer()?;
                self.state.borrow_mut().deferred.push(handle);

                Ok(())
            }
            CMD_TIMED => reply.set_status(IMStatusCode::Success),
            _ => Err(ErrorCode::CommandNotFound.into()),
        }
    }
}
