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

//! This module contains the TLV-serde types of the Interaction Model messages,
//! along with the [`engine`] which serves them.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{Error, ErrorCode};
use crate::tlv::{FromTLV, TLVElement, TLVWriter, TagType, ToTLV};

pub use attr::*;
pub use event::*;
pub use invoke::*;
pub use messages::*;
pub use status::*;

pub mod engine;

mod attr;
mod event;
mod invoke;
mod messages;
mod status;

/// Protocol ID of the Interaction Model
pub const PROTO_ID_INTERACTION_MODEL: u16 = 0x01;

/// The Interaction Model revision this engine speaks.
pub const IM_REVISION: u8 = 11;

/// Context tag under which every IM message carries [`IM_REVISION`].
pub const IM_REVISION_TAG: u8 = 0xFF;

/// An enumeration of all possible status codes that can be returned by the Interaction Model.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IMStatusCode {
    Success = 0,
    Failure = 1,
    InvalidSubscription = 0x7D,
    UnsupportedAccess = 0x7E,
    UnsupportedEndpoint = 0x7F,
    InvalidAction = 0x80,
    UnsupportedCommand = 0x81,
    InvalidCommand = 0x85,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    UnsupportedWrite = 0x88,
    ResourceExhausted = 0x89,
    NotFound = 0x8b,
    UnreportableAttribute = 0x8c,
    InvalidDataType = 0x8d,
    UnsupportedRead = 0x8f,
    DataVersionMismatch = 0x92,
    Timeout = 0x94,
    Busy = 0x9c,
    UnsupportedCluster = 0xc3,
    NoUpstreamSubscription = 0xc5,
    NeedsTimedInteraction = 0xc6,
    UnsupportedEvent = 0xc7,
    PathsExhausted = 0xc8,
    TimedRequestMisMatch = 0xc9,
    FailSafeRequired = 0xca,
}

impl From<ErrorCode> for IMStatusCode {
    fn from(e: ErrorCode) -> Self {
        match e {
            ErrorCode::EndpointNotFound => IMStatusCode::UnsupportedEndpoint,
            ErrorCode::ClusterNotFound => IMStatusCode::UnsupportedCluster,
            ErrorCode::AttributeNotFound => IMStatusCode::UnsupportedAttribute,
            ErrorCode::CommandNotFound => IMStatusCode::UnsupportedCommand,
            ErrorCode::EventNotFound => IMStatusCode::UnsupportedEvent,
            ErrorCode::InvalidAction => IMStatusCode::InvalidAction,
            ErrorCode::InvalidCommand => IMStatusCode::InvalidCommand,
            ErrorCode::InvalidDataType => IMStatusCode::InvalidDataType,
            ErrorCode::UnsupportedAccess => IMStatusCode::UnsupportedAccess,
            ErrorCode::UnsupportedRead => IMStatusCode::UnsupportedRead,
            ErrorCode::UnsupportedWrite => IMStatusCode::UnsupportedWrite,
            ErrorCode::NeedsTimedInteraction => IMStatusCode::NeedsTimedInteraction,
            ErrorCode::TimedRequestMismatch => IMStatusCode::TimedRequestMisMatch,
            ErrorCode::Busy => IMStatusCode::Busy,
            ErrorCode::DataVersionMismatch => IMStatusCode::DataVersionMismatch,
            ErrorCode::ResourceExhausted | ErrorCode::NoMemory | ErrorCode::BufferTooSmall => {
                IMStatusCode::ResourceExhausted
            }
            ErrorCode::ConstraintError => IMStatusCode::ConstraintError,
            ErrorCode::NotFound => IMStatusCode::NotFound,
            ErrorCode::TLVNotFound | ErrorCode::TLVTypeMismatch | ErrorCode::InvalidData => {
                IMStatusCode::InvalidAction
            }
            _ => IMStatusCode::Failure,
        }
    }
}

impl From<Error> for IMStatusCode {
    fn from(value: Error) -> Self {
        Self::from(value.code())
    }
}

impl From<&Error> for IMStatusCode {
    fn from(value: &Error) -> Self {
        Self::from(value.code())
    }
}

impl FromTLV<'_> for IMStatusCode {
    fn from_tlv(t: &TLVElement) -> Result<Self, Error> {
        FromPrimitive::from_u16(t.u16()?).ok_or_else(|| ErrorCode::Invalid.into())
    }
}

impl ToTLV for IMStatusCode {
    fn to_tlv(&self, tw: &mut TLVWriter, tag_type: TagType) -> Result<(), Error> {
        tw.u16(tag_type, *self as _)
    }
}

/// An enumeration of all possible opcodes used in the Interaction Model.
#[derive(FromPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCode {
    Reserved = 0,
    StatusResponse = 1,
    ReadRequest = 2,
    SubscribeRequest = 3,
    SubscribeResponse = 4,
    ReportData = 5,
    WriteRequest = 6,
    WriteResponse = 7,
    InvokeRequest = 8,
    InvokeResponse = 9,
    TimedRequest = 10,
}

// Type aliases for first-class matter types
pub type EndptId = u16;
pub type ClusterId = u32;
pub type AttrId = u32;
pub type CmdId = u32;
pub type EventId = u32;
pub type EventNumber = u64;
pub type ClusterStatus = u16;
pub type CommandRef = u16;
pub type DataVersion = u32;
pub type DeviceTypeId = u32;
pub type FabricIndex = u8;
pub type ListIndex = u16;
pub type NodeId = u64;
pub type SubscriptionId = u32;

/// A generic (possibly a wildcard) path with endpoint, clusters, and a leaf
///
/// The leaf could be a command, an attribute, or an event.
///
/// Look at `AttrPath`, `CmdPath`, and `EventPath` for specific TLV structures, which
/// can be turned into `GenericPath` using their `to_gp()` method.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GenericPath {
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub leaf: Option<u32>,
}

impl GenericPath {
    pub const fn new(
        endpoint: Option<EndptId>,
        cluster: Option<ClusterId>,
        leaf: Option<u32>,
    ) -> Self {
        Self {
            endpoint,
            cluster,
            leaf,
        }
    }

    /// Return Ok, if the path is non wildcard, otherwise returns an error
    pub fn not_wildcard(&self) -> Result<(EndptId, ClusterId, u32), Error> {
        match *self {
            GenericPath {
                endpoint: Some(e),
                cluster: Some(c),
                leaf: Some(l),
            } => Ok((e, c, l)),
            _ => Err(ErrorCode::Invalid.into()),
        }
    }

    /// Return true, if the path is wildcard
    pub const fn is_wildcard(&self) -> bool {
        !matches!(
            *self,
            GenericPath {
                endpoint: Some(_),
                cluster: Some(_),
                leaf: Some(_),
            }
        )
    }

    /// Return true, if `other` falls within the set of paths this one describes
    pub fn matches(&self, other: &GenericPath) -> bool {
        fn component<T: PartialEq>(ours: Option<T>, theirs: Option<T>) -> bool {
            match (ours, theirs) {
                (None, _) => true,
                (Some(ours), Some(theirs)) => ours == theirs,
                (Some(_), None) => false,
            }
        }

        component(self.endpoint, other.endpoint)
            && component(self.cluster, other.cluster)
            && component(self.leaf, other.leaf)
    }

    /// Return true, if some concrete path is described by both this path and `other`
    pub fn intersects(&self, other: &GenericPath) -> bool {
        fn component<T: PartialEq>(ours: Option<T>, theirs: Option<T>) -> bool {
            match (ours, theirs) {
                (Some(ours), Some(theirs)) => ours == theirs,
                _ => true,
            }
        }

        component(self.endpoint, other.endpoint)
            && component(self.cluster, other.cluster)
            && component(self.leaf, other.leaf)
    }
}

/// Writes the IM revision member which closes every IM message.
pub(crate) fn write_im_revision(tw: &mut TLVWriter) -> Result<(), Error> {
    tw.u8(TagType::Context(IM_REVISION_TAG), IM_REVISION)
}

#[cfg(test)]
mod tests {
    use super::{GenericPath, IMStatusCode};
    use crate::error::ErrorCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            IMStatusCode::from(ErrorCode::AttributeNotFound),
            IMStatusCode::UnsupportedAttribute
        );
        assert_eq!(
            IMStatusCode::from(ErrorCode::NeedsTimedInteraction),
            IMStatusCode::NeedsTimedInteraction
        );
        assert_eq!(
            IMStatusCode::from(ErrorCode::StdIoError),
            IMStatusCode::Failure
        );
    }

    #[test]
    fn test_wildcard_matching() {
        let wildcard = GenericPath::new(None, Some(6), None);
        let concrete = GenericPath::new(Some(1), Some(6), Some(0));
        let other = GenericPath::new(Some(1), Some(8), Some(0));

        assert!(wildcard.is_wildcard());
        assert!(!concrete.is_wildcard());
        assert!(wildcard.matches(&concrete));
        assert!(!wildcard.matches(&other));
        assert!(!concrete.matches(&wildcard));
        assert!(concrete.intersects(&wildcard));
        assert!(!other.intersects(&wildcard));
        assert_eq!(concrete.not_wildcard().unwrap(), (1, 6, 0));
        assert!(wildcard.not_wildcard().is_err());
    }
}
