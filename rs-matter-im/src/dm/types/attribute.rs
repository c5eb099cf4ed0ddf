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

#![allow(clippy::bad_bit_mask)]

use core::fmt;

use bitflags::bitflags;
use strum::FromRepr;

use crate::error::{Error, ErrorCode};
use crate::im::{AttrId, AttrPath, ClusterId, DataVersion, EndptId, FabricIndex, ListIndex};
use crate::tlv::Nullable;

use super::{Access, ConcretePath};

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Quality: u8 {
        const NONE = 0x00;
        const SCENE = 0x01;      // Short: S
        const PERSISTENT = 0x02; // Short: N
        const FIXED = 0x04;      // Short: F
        const NULLABLE = 0x08;   // Short: X
        const OPTIONAL = 0x10;   // Short: O
        const LIST = 0x20;       // Short: L

        const SN = Self::SCENE.bits() | Self::PERSISTENT.bits();
        const S = Self::SCENE.bits();
        const N = Self::PERSISTENT.bits();
        const F = Self::FIXED.bits();
        const X = Self::NULLABLE.bits();
        const O = Self::OPTIONAL.bits();
        const L = Self::LIST.bits();
    }
}

/// A type modeling the attribute meta-data in the Matter data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute ID
    pub id: AttrId,
    /// The access control for the attribute
    pub access: Access,
    /// The quality of the attribute
    pub quality: Quality,
}

impl Attribute {
    pub const fn new(id: AttrId, access: Access, quality: Quality) -> Self {
        Self {
            id,
            access,
            quality,
        }
    }

    /// Return `true` if the attribute is a system one (i.e. a global attribute).
    pub fn is_system(&self) -> bool {
        Self::is_system_attr(self.id)
    }

    /// Return `true` if the attribute ID is a system one (i.e. a global attribute).
    pub fn is_system_attr(attr_id: AttrId) -> bool {
        attr_id >= (GlobalElements::GeneratedCmdList as AttrId)
    }

    pub fn is_list(&self) -> bool {
        self.quality.contains(Quality::LIST)
    }

    pub fn is_fabric_scoped(&self) -> bool {
        self.access.contains(Access::FAB_SCOPED)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum GlobalElements {
    FabricIndex = 0xFE,
    GeneratedCmdList = 0xFFF8,
    AcceptedCmdList = 0xFFF9,
    EventList = 0xFFFA,
    AttributeList = 0xFFFB,
    FeatureMap = 0xFFFC,
    ClusterRevision = 0xFFFD,
}

impl TryFrom<AttrId> for GlobalElements {
    type Error = Error;

    fn try_from(id: AttrId) -> Result<Self, Self::Error> {
        GlobalElements::from_repr(id).ok_or_else(|| ErrorCode::AttributeNotFound.into())
    }
}

pub const GENERATED_COMMAND_LIST: Attribute = Attribute::new(
    GlobalElements::GeneratedCmdList as _,
    Access::RV,
    Quality::L,
);

pub const ACCEPTED_COMMAND_LIST: Attribute = Attribute::new(
    GlobalElements::AcceptedCmdList as _,
    Access::RV,
    Quality::L,
);

pub const EVENT_LIST: Attribute =
    Attribute::new(GlobalElements::EventList as _, Access::RV, Quality::L);

pub const ATTRIBUTE_LIST: Attribute =
    Attribute::new(GlobalElements::AttributeList as _, Access::RV, Quality::L);

pub const FEATURE_MAP: Attribute =
    Attribute::new(GlobalElements::FeatureMap as _, Access::RV, Quality::NONE);

pub const CLUSTER_REVISION: Attribute = Attribute::new(
    GlobalElements::ClusterRevision as _,
    Access::RV,
    Quality::NONE,
);

/// The global attributes every cluster carries, in the order they are appended.
pub const GLOBAL_ATTRIBUTES: [Attribute; 6] = [
    GENERATED_COMMAND_LIST,
    ACCEPTED_COMMAND_LIST,
    EVENT_LIST,
    ATTRIBUTE_LIST,
    FEATURE_MAP,
    CLUSTER_REVISION,
];

/// The Attribute Details structure records the details about the attribute under consideration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDetails {
    /// The actual endpoint ID
    pub endpoint_id: EndptId,
    /// The actual cluster ID
    pub cluster_id: ClusterId,
    /// The actual attribute ID
    pub attr_id: AttrId,
    /// List Index, if any
    pub list_index: Option<Nullable<ListIndex>>,
    /// The accessing Fabric Index, 0 if none
    pub fab_idx: FabricIndex,
    /// Fabric Filtering Activated
    pub fab_filter: bool,
    pub dataver: DataVersion,
}

impl AttrDetails {
    pub fn is_system(&self) -> bool {
        Attribute::is_system_attr(self.attr_id)
    }

    pub fn path(&self) -> AttrPath {
        AttrPath {
            endpoint: Some(self.endpoint_id),
            cluster: Some(self.cluster_id),
            attr: Some(self.attr_id),
            list_index: self.list_index,
            ..Default::default()
        }
    }

    pub fn concrete(&self) -> ConcretePath {
        ConcretePath::new(self.endpoint_id, self.cluster_id, self.attr_id)
    }
}
