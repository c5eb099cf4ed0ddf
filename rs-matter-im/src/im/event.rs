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

use crate::error::Error;
use crate::tlv::{from_tlv_member, FromTLV, TLVElement, TLVWriter, TagType, ToTLV};

use super::{ClusterId, EndptId, EventId, EventNumber, GenericPath, NodeId, Status};

/// The EventPathIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventPath {
    pub node: Option<NodeId>,
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub event: Option<EventId>,
    pub is_urgent: Option<bool>,
}

impl EventPath {
    pub fn new(path: &GenericPath) -> Self {
        Self {
            endpoint: path.endpoint,
            cluster: path.cluster,
            event: path.leaf,
            ..Default::default()
        }
    }

    pub const fn to_gp(&self) -> GenericPath {
        GenericPath::new(self.endpoint, self.cluster, self.event)
    }
}

impl<'a> FromTLV<'a> for EventPath {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_list()?;

        Ok(Self {
            node: from_tlv_member(&t, 0)?,
            endpoint: from_tlv_member(&t, 1)?,
            cluster: from_tlv_member(&t, 2)?,
            event: from_tlv_member(&t, 3)?,
            is_urgent: from_tlv_member(&t, 4)?,
        })
    }
}

impl ToTLV for EventPath {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_list(tag)?;
        self.node.to_tlv(tw, TagType::Context(0))?;
        self.endpoint.to_tlv(tw, TagType::Context(1))?;
        self.cluster.to_tlv(tw, TagType::Context(2))?;
        self.event.to_tlv(tw, TagType::Context(3))?;
        self.is_urgent.to_tlv(tw, TagType::Context(4))?;
        tw.end_container()
    }
}

/// The EventFilterIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventFilter {
    pub node: Option<NodeId>,
    pub event_min: Option<EventNumber>,
}

impl<'a> FromTLV<'a> for EventFilter {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            node: from_tlv_member(&t, 0)?,
            event_min: from_tlv_member(&t, 1)?,
        })
    }
}

impl ToTLV for EventFilter {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.node.to_tlv(tw, TagType::Context(0))?;
        self.event_min.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

/// The EventStatusIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    pub path: EventPath,
    pub status: Status,
}

impl ToTLV for EventStatus {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.path.to_tlv(tw, TagType::Context(0))?;
        self.status.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for EventStatus {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, 0)?,
            status: from_tlv_member(&t, 1)?,
        })
    }
}

/// Tags of the EventDataIB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDataTag {
    Path = 0,
    EventNumber = 1,
    Priority = 2,
    EpochTimestamp = 3,
    SystemTimestamp = 4,
    DeltaEpochTimestamp = 5,
    DeltaSystemTimestamp = 6,
    Data = 7,
}

/// The EventDataIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventData<'a> {
    pub path: EventPath,
    pub event_number: EventNumber,
    pub priority: u8,
    pub system_timestamp_ms: Option<u64>,
    pub data: TLVElement<'a>,
}

impl<'a> FromTLV<'a> for EventData<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, EventDataTag::Path as _)?,
            event_number: from_tlv_member(&t, EventDataTag::EventNumber as _)?,
            priority: from_tlv_member(&t, EventDataTag::Priority as _)?,
            system_timestamp_ms: from_tlv_member(&t, EventDataTag::SystemTimestamp as _)?,
            data: t.find_tag(EventDataTag::Data as _)?,
        })
    }
}

/// The EventReportIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventResp<'a> {
    Status(EventStatus),
    Data(EventData<'a>),
}

impl<'a> FromTLV<'a> for EventResp<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        if let Ok(status) = t.find_tag(0) {
            Ok(Self::Status(EventStatus::from_tlv(&status)?))
        } else {
            Ok(Self::Data(EventData::from_tlv(&t.find_tag(1)?)?))
        }
    }
}
