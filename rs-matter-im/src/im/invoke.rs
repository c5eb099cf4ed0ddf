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
use crate::tlv::{
    from_tlv_member, get_root_node, FromTLV, TLVElement, TLVWriter, TagType, ToTLV,
};

use super::{ClusterId, CmdId, CommandRef, EndptId, GenericPath, IMStatusCode, Status};

/// The CommandPathIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CmdPath {
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub cmd: Option<CmdId>,
}

impl CmdPath {
    pub const fn new(
        endpoint: Option<EndptId>,
        cluster: Option<ClusterId>,
        cmd: Option<CmdId>,
    ) -> Self {
        Self {
            endpoint,
            cluster,
            cmd,
        }
    }

    pub const fn to_gp(&self) -> GenericPath {
        GenericPath::new(self.endpoint, self.cluster, self.cmd)
    }
}

impl<'a> FromTLV<'a> for CmdPath {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_list()?;

        Ok(Self {
            endpoint: from_tlv_member(&t, 0)?,
            cluster: from_tlv_member(&t, 1)?,
            cmd: from_tlv_member(&t, 2)?,
        })
    }
}

impl ToTLV for CmdPath {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_list(tag)?;
        self.endpoint.to_tlv(tw, TagType::Context(0))?;
        self.cluster.to_tlv(tw, TagType::Context(1))?;
        self.cmd.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

/// The CommandStatusIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdStatus {
    pub path: CmdPath,
    pub status: Status,
    pub command_ref: Option<CommandRef>,
}

impl CmdStatus {
    pub fn new(path: CmdPath, status: IMStatusCode, cluster_status: Option<u16>) -> Self {
        Self {
            path,
            status: Status::new(status, cluster_status),
            command_ref: None,
        }
    }
}

impl<'a> FromTLV<'a> for CmdStatus {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, 0)?,
            status: from_tlv_member(&t, 1)?,
            command_ref: from_tlv_member(&t, 2)?,
        })
    }
}

impl ToTLV for CmdStatus {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.path.to_tlv(tw, TagType::Context(0))?;
        self.status.to_tlv(tw, TagType::Context(1))?;
        self.command_ref.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

/// The CommandDataIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmdData<'a> {
    pub path: CmdPath,
    pub data: Option<TLVElement<'a>>,
    pub command_ref: Option<CommandRef>,
}

impl<'a> FromTLV<'a> for CmdData<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, 0)?,
            data: t.find_tag(1).ok(),
            command_ref: from_tlv_member(&t, 2)?,
        })
    }
}

impl<'a> ToTLV for CmdData<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.path.to_tlv(tw, TagType::Context(0))?;
        if let Some(data) = &self.data {
            tw.element(TagType::Context(1), data)?;
        }
        self.command_ref.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

/// The InvokeResponseIB of the Interaction Model, as parsed out of a response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmdResp<'a> {
    Cmd(CmdData<'a>),
    Status(CmdStatus),
}

impl<'a> CmdResp<'a> {
    pub fn command_ref(&self) -> Option<CommandRef> {
        match self {
            Self::Cmd(data) => data.command_ref,
            Self::Status(status) => status.command_ref,
        }
    }
}

impl<'a> FromTLV<'a> for CmdResp<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        if let Ok(status) = t.find_tag(1) {
            Ok(Self::Status(CmdStatus::from_tlv(&status)?))
        } else {
            Ok(Self::Cmd(CmdData::from_tlv(&t.find_tag(0)?)?))
        }
    }
}

/// An owned InvokeResponseIB, held while the rest of a batch is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvResp {
    /// Response command: its path and the encoded fields (a single anonymous element)
    Cmd {
        path: CmdPath,
        data: Vec<u8>,
        command_ref: Option<CommandRef>,
    },
    Status(CmdStatus),
}

impl InvResp {
    pub fn status(path: CmdPath, status: IMStatusCode, command_ref: Option<CommandRef>) -> Self {
        Self::Status(CmdStatus {
            path,
            status: Status::new(status, None),
            command_ref,
        })
    }

    pub fn command_ref(&self) -> Option<CommandRef> {
        match self {
            Self::Cmd { command_ref, .. } => *command_ref,
            Self::Status(status) => status.command_ref,
        }
    }
}

impl ToTLV for InvResp {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        match self {
            Self::Cmd {
                path,
                data,
                command_ref,
            } => {
                let data = get_root_node(data)?;
                CmdData {
                    path: *path,
                    data: Some(data),
                    command_ref: *command_ref,
                }
                .to_tlv(tw, TagType::Context(0))?
            }
            Self::Status(status) => status.to_tlv(tw, TagType::Context(1))?,
        }
        tw.end_container()
    }
}
