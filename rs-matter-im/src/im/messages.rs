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

use super::{
    write_im_revision, AttrData, AttrPath, AttrResp, AttrStatus, CmdData, CmdResp,
    DataVersionFilter, EventFilter, EventPath, EventResp, SubscriptionId,
};

fn flag<'a>(t: &TLVElement<'a>, tag: u8) -> Result<bool, Error> {
    Ok(from_tlv_member::<Option<bool>>(t, tag)?.unwrap_or(false))
}

fn write_flag(tw: &mut TLVWriter, tag: u8, value: bool) -> Result<(), Error> {
    if value {
        tw.bool(TagType::Context(tag), true)
    } else {
        Ok(())
    }
}

/// The ReadRequestMessage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadReq {
    pub attr_requests: Option<Vec<AttrPath>>,
    pub event_requests: Option<Vec<EventPath>>,
    pub event_filters: Option<Vec<EventFilter>>,
    pub fabric_filtered: bool,
    pub dataver_filters: Option<Vec<DataVersionFilter>>,
}

impl<'a> FromTLV<'a> for ReadReq {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            attr_requests: from_tlv_member(&t, 0)?,
            event_requests: from_tlv_member(&t, 1)?,
            event_filters: from_tlv_member(&t, 2)?,
            fabric_filtered: flag(&t, 3)?,
            dataver_filters: from_tlv_member(&t, 4)?,
        })
    }
}

impl ToTLV for ReadReq {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.attr_requests.to_tlv(tw, TagType::Context(0))?;
        self.event_requests.to_tlv(tw, TagType::Context(1))?;
        self.event_filters.to_tlv(tw, TagType::Context(2))?;
        tw.bool(TagType::Context(3), self.fabric_filtered)?;
        self.dataver_filters.to_tlv(tw, TagType::Context(4))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The SubscribeRequestMessage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeReq {
    pub keep_subs: bool,
    pub min_int_floor: u16,
    pub max_int_ceil: u16,
    pub attr_requests: Option<Vec<AttrPath>>,
    pub event_requests: Option<Vec<EventPath>>,
    pub event_filters: Option<Vec<EventFilter>>,
    pub fabric_filtered: bool,
    pub dataver_filters: Option<Vec<DataVersionFilter>>,
}

impl SubscribeReq {
    /// The read-equivalent of this subscription, used for the priming report
    pub fn to_read_req(&self) -> ReadReq {
        ReadReq {
            attr_requests: self.attr_requests.clone(),
            event_requests: self.event_requests.clone(),
            event_filters: self.event_filters.clone(),
            fabric_filtered: self.fabric_filtered,
            dataver_filters: self.dataver_filters.clone(),
        }
    }
}

impl<'a> FromTLV<'a> for SubscribeReq {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            keep_subs: from_tlv_member(&t, 0)?,
            min_int_floor: from_tlv_member(&t, 1)?,
            max_int_ceil: from_tlv_member(&t, 2)?,
            attr_requests: from_tlv_member(&t, 3)?,
            event_requests: from_tlv_member(&t, 4)?,
            event_filters: from_tlv_member(&t, 5)?,
            fabric_filtered: flag(&t, 7)?,
            dataver_filters: from_tlv_member(&t, 8)?,
        })
    }
}

impl ToTLV for SubscribeReq {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.bool(TagType::Context(0), self.keep_subs)?;
        tw.u16(TagType::Context(1), self.min_int_floor)?;
        tw.u16(TagType::Context(2), self.max_int_ceil)?;
        self.attr_requests.to_tlv(tw, TagType::Context(3))?;
        self.event_requests.to_tlv(tw, TagType::Context(4))?;
        self.event_filters.to_tlv(tw, TagType::Context(5))?;
        tw.bool(TagType::Context(7), self.fabric_filtered)?;
        self.dataver_filters.to_tlv(tw, TagType::Context(8))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The SubscribeResponseMessage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeResp {
    pub subscription_id: SubscriptionId,
    pub max_int: u16,
}

impl<'a> FromTLV<'a> for SubscribeResp {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            subscription_id: from_tlv_member(&t, 0)?,
            max_int: from_tlv_member(&t, 2)?,
        })
    }
}

impl ToTLV for SubscribeResp {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.u32(TagType::Context(0), self.subscription_id)?;
        tw.u16(TagType::Context(2), self.max_int)?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// Tags of the ReportDataMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDataTag {
    SubscriptionId = 0,
    AttributeReports = 1,
    EventReports = 2,
    MoreChunkedMsgs = 3,
    SupressResponse = 4,
}

/// The ReportDataMessage, as parsed by a receiver
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReportDataMsg<'a> {
    pub subscription_id: Option<SubscriptionId>,
    pub attr_reports: Option<Vec<AttrResp<'a>>>,
    pub event_reports: Option<Vec<EventResp<'a>>>,
    pub more_chunks: bool,
    pub suppress_response: bool,
}

impl<'a> FromTLV<'a> for ReportDataMsg<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            subscription_id: from_tlv_member(&t, ReportDataTag::SubscriptionId as _)?,
            attr_reports: from_tlv_member(&t, ReportDataTag::AttributeReports as _)?,
            event_reports: from_tlv_member(&t, ReportDataTag::EventReports as _)?,
            more_chunks: flag(&t, ReportDataTag::MoreChunkedMsgs as _)?,
            suppress_response: flag(&t, ReportDataTag::SupressResponse as _)?,
        })
    }
}

/// The WriteRequestMessage
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteReq<'a> {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub write_requests: Vec<AttrData<'a>>,
    pub more_chunks: bool,
}

impl<'a> FromTLV<'a> for WriteReq<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            suppress_response: flag(&t, 0)?,
            timed_request: flag(&t, 1)?,
            write_requests: from_tlv_member(&t, 2)?,
            more_chunks: flag(&t, 3)?,
        })
    }
}

impl<'a> ToTLV for WriteReq<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        write_flag(tw, 0, self.suppress_response)?;
        tw.bool(TagType::Context(1), self.timed_request)?;
        self.write_requests.to_tlv(tw, TagType::Context(2))?;
        write_flag(tw, 3, self.more_chunks)?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The WriteResponseMessage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteResp {
    pub write_responses: Vec<AttrStatus>,
}

impl<'a> FromTLV<'a> for WriteResp {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            write_responses: from_tlv_member::<Option<Vec<AttrStatus>>>(&t, 0)?
                .unwrap_or_default(),
        })
    }
}

impl ToTLV for WriteResp {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.write_responses.to_tlv(tw, TagType::Context(0))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The InvokeRequestMessage
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InvReq<'a> {
    pub suppress_response: bool,
    pub timed_request: bool,
    pub invoke_requests: Vec<CmdData<'a>>,
}

impl<'a> FromTLV<'a> for InvReq<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            suppress_response: flag(&t, 0)?,
            timed_request: flag(&t, 1)?,
            invoke_requests: from_tlv_member(&t, 2)?,
        })
    }
}

impl<'a> ToTLV for InvReq<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.bool(TagType::Context(0), self.suppress_response)?;
        tw.bool(TagType::Context(1), self.timed_request)?;
        self.invoke_requests.to_tlv(tw, TagType::Context(2))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

/// The InvokeResponseMessage, as parsed by a receiver
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InvRespMsg<'a> {
    pub suppress_response: bool,
    pub invoke_responses: Vec<CmdResp<'a>>,
    pub more_chunks: bool,
}

impl<'a> FromTLV<'a> for InvRespMsg<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            suppress_response: flag(&t, 0)?,
            invoke_responses: from_tlv_member::<Option<Vec<CmdResp>>>(&t, 1)?
                .unwrap_or_default(),
            more_chunks: flag(&t, 2)?,
        })
    }
}

/// The TimedRequestMessage
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimedReq {
    pub timeout_ms: u16,
}

impl<'a> FromTLV<'a> for TimedReq {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        Ok(Self {
            timeout_ms: from_tlv_member(&t.confirm_struct()?, 0)?,
        })
    }
}

impl ToTLV for TimedReq {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        tw.u16(TagType::Context(0), self.timeout_ms)?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadReq, SubscribeReq};
    use crate::im::{AttrPath, DataVersionFilter, ClusterPath, EventPath};
    use crate::tlv::{get_root_node_struct, FromTLV, TLVWriter, TagType, ToTLV};
    use crate::utils::writebuf::WriteBuf;

    #[test]
    fn test_read_req_round_trip() {
        let req = ReadReq {
            attr_requests: Some(vec![AttrPath {
                endpoint: Some(1),
                cluster: Some(6),
                ..Default::default()
            }]),
            event_requests: None,
            event_filters: None,
            fabric_filtered: true,
            dataver_filters: Some(vec![DataVersionFilter {
                path: ClusterPath {
                    node: None,
                    endpoint: 1,
                    cluster: 6,
                },
                data_ver: 0xdead,
            }]),
        };

        let mut buf = [0; 128];
        let mut wb = WriteBuf::new(&mut buf);
        req.to_tlv(&mut TLVWriter::new(&mut wb), TagType::Anonymous)
            .unwrap();
        let len = wb.get_tail();

        let root = get_root_node_struct(&buf[..len]).unwrap();
        assert_eq!(ReadReq::from_tlv(&root).unwrap(), req);
    }

    #[test]
    fn test_subscribe_req_round_trip() {
        let req = SubscribeReq {
            keep_subs: true,
            min_int_floor: 1,
            max_int_ceil: 10,
            attr_requests: None,
            event_requests: Some(vec![EventPath {
                endpoint: Some(0),
                is_urgent: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let mut buf = [0; 128];
        let mut wb = WriteBuf::new(&mut buf);
        req.to_tlv(&mut TLVWriter::new(&mut wb), TagType::Anonymous)
            .unwrap();
        let len = wb.get_tail();

        let root = get_root_node_struct(&buf[..len]).unwrap();
        assert_eq!(SubscribeReq::from_tlv(&root).unwrap(), req);
    }
}
