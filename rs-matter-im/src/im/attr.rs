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

use core::fmt;

use crate::error::{Error, ErrorCode};
use crate::tlv::{from_tlv_member, FromTLV, Nullable, TLVElement, TLVWriter, TagType, ToTLV};

use super::{
    AttrId, ClusterId, DataVersion, EndptId, GenericPath, IMStatusCode, ListIndex, NodeId, Status,
};

/// The AttributePathIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttrPath {
    pub tag_compression: Option<bool>,
    pub node: Option<NodeId>,
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub attr: Option<AttrId>,
    /// `Some(Null)` marks a list append, `Some(NotNull(_))` a single list item.
    pub list_index: Option<Nullable<ListIndex>>,
}

impl AttrPath {
    pub fn new(path: &GenericPath) -> Self {
        Self {
            endpoint: path.endpoint,
            cluster: path.cluster,
            attr: path.leaf,
            ..Default::default()
        }
    }

    pub const fn to_gp(&self) -> GenericPath {
        GenericPath::new(self.endpoint, self.cluster, self.attr)
    }

    pub fn is_list_append(&self) -> bool {
        matches!(self.list_index, Some(Nullable::Null))
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(f: &mut fmt::Formatter<'_>, v: Option<u32>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{:#06x}", v),
                None => write!(f, "*"),
            }
        }

        write!(f, "Endpt(")?;
        opt(f, self.endpoint.map(u32::from))?;
        write!(f, ")::Cluster(")?;
        opt(f, self.cluster)?;
        write!(f, ")::Attr(")?;
        opt(f, self.attr)?;
        write!(f, ")")
    }
}

impl<'a> FromTLV<'a> for AttrPath {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_list()?;

        Ok(Self {
            tag_compression: from_tlv_member(&t, 0)?,
            node: from_tlv_member(&t, 1)?,
            endpoint: from_tlv_member(&t, 2)?,
            cluster: from_tlv_member(&t, 3)?,
            attr: from_tlv_member(&t, 4)?,
            list_index: from_tlv_member(&t, 5)?,
        })
    }
}

impl ToTLV for AttrPath {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_list(tag)?;
        self.tag_compression.to_tlv(tw, TagType::Context(0))?;
        self.node.to_tlv(tw, TagType::Context(1))?;
        self.endpoint.to_tlv(tw, TagType::Context(2))?;
        self.cluster.to_tlv(tw, TagType::Context(3))?;
        self.attr.to_tlv(tw, TagType::Context(4))?;
        self.list_index.to_tlv(tw, TagType::Context(5))?;
        tw.end_container()
    }
}

/// The ClusterPathIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClusterPath {
    pub node: Option<NodeId>,
    pub endpoint: EndptId,
    pub cluster: ClusterId,
}

impl<'a> FromTLV<'a> for ClusterPath {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_list()?;

        Ok(Self {
            node: from_tlv_member(&t, 0)?,
            endpoint: from_tlv_member(&t, 1)?,
            cluster: from_tlv_member(&t, 2)?,
        })
    }
}

impl ToTLV for ClusterPath {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_list(tag)?;
        self.node.to_tlv(tw, TagType::Context(0))?;
        self.endpoint.to_tlv(tw, TagType::Context(1))?;
        self.cluster.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

/// The DataVersionFilterIB of the Interaction Model
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DataVersionFilter {
    pub path: ClusterPath,
    pub data_ver: DataVersion,
}

impl<'a> FromTLV<'a> for DataVersionFilter {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, 0)?,
            data_ver: from_tlv_member(&t, 1)?,
        })
    }
}

impl ToTLV for DataVersionFilter {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.path.to_tlv(tw, TagType::Context(0))?;
        self.data_ver.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

/// The AttributeStatusIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrStatus {
    pub path: AttrPath,
    pub status: Status,
}

impl AttrStatus {
    pub fn new(path: &GenericPath, status: IMStatusCode, cluster_status: Option<u16>) -> Self {
        Self {
            path: AttrPath::new(path),
            status: Status::new(status, cluster_status),
        }
    }
}

impl<'a> FromTLV<'a> for AttrStatus {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            path: from_tlv_member(&t, 0)?,
            status: from_tlv_member(&t, 1)?,
        })
    }
}

impl ToTLV for AttrStatus {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.path.to_tlv(tw, TagType::Context(0))?;
        self.status.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

/// Tags of the AttributeDataIB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrDataTag {
    DataVer = 0,
    Path = 1,
    Data = 2,
}

/// The AttributeDataIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttrData<'a> {
    pub data_ver: Option<DataVersion>,
    pub path: AttrPath,
    pub data: TLVElement<'a>,
}

impl<'a> FromTLV<'a> for AttrData<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        Ok(Self {
            data_ver: from_tlv_member(&t, AttrDataTag::DataVer as _)?,
            path: from_tlv_member(&t, AttrDataTag::Path as _)?,
            data: t.find_tag(AttrDataTag::Data as _)?,
        })
    }
}

impl<'a> ToTLV for AttrData<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.data_ver
            .to_tlv(tw, TagType::Context(AttrDataTag::DataVer as _))?;
        self.path
            .to_tlv(tw, TagType::Context(AttrDataTag::Path as _))?;
        tw.element(TagType::Context(AttrDataTag::Data as _), &self.data)?;
        tw.end_container()
    }
}

/// Tags of the AttributeReportIB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrRespTag {
    Status = 0,
    Data = 1,
}

/// The AttributeReportIB of the Interaction Model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrResp<'a> {
    Status(AttrStatus),
    Data(AttrData<'a>),
}

impl<'a> AttrResp<'a> {
    pub fn path(&self) -> &AttrPath {
        match self {
            Self::Status(status) => &status.path,
            Self::Data(data) => &data.path,
        }
    }

    pub fn data(&self) -> Result<&AttrData<'a>, Error> {
        match self {
            Self::Data(data) => Ok(data),
            Self::Status(_) => Err(ErrorCode::InvalidData.into()),
        }
    }
}

impl<'a> FromTLV<'a> for AttrResp<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.confirm_struct()?;

        if let Ok(status) = t.find_tag(AttrRespTag::Status as _) {
            Ok(Self::Status(AttrStatus::from_tlv(&status)?))
        } else {
            Ok(Self::Data(AttrData::from_tlv(
                &t.find_tag(AttrRespTag::Data as _)?,
            )?))
        }
    }
}

impl<'a> ToTLV for AttrResp<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        match self {
            Self::Status(status) => {
                status.to_tlv(tw, TagType::Context(AttrRespTag::Status as _))?
            }
            Self::Data(data) => data.to_tlv(tw, TagType::Context(AttrRespTag::Data as _))?,
        }
        tw.end_container()
    }
}
