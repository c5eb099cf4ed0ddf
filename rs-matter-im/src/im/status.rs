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

use super::{write_im_revision, ClusterStatus, IMStatusCode};

/// The StatusIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub status: IMStatusCode,
    pub cluster_status: Option<ClusterStatus>,
}

impl Status {
    pub const fn new(status: IMStatusCode, cluster_status: Option<ClusterStatus>) -> Status {
        Status {
            status,
            cluster_status,
        }
    }
}

impl<'a> FromTLV<'a> for Status {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            status: from_tlv_member(&t, 0)?,
            cluster_status: from_tlv_member(&t, 1)?,
        })
    }
}

impl ToTLV for Status {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.status.to_tlv(tw, TagType::Context(0))?;
        self.cluster_status.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

/// The StatusResponseMessage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResp {
    pub status: IMStatusCode,
}

impl<'a> FromTLV<'a> for StatusResp {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        Ok(Self {
            status: from_tlv_member(&t.confirm_struct()?, 0)?,
        })
    }
}

impl ToTLV for StatusResp {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.status.to_tlv(tw, TagType::Context(0))?;
        write_im_revision(tw)?;
        tw.end_container()
    }
}
