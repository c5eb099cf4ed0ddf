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

//! The attribute/command dispatch contract the engine runs requests against.

use bitflags::bitflags;
use log::{debug, warn};

use crate::acl::{AccessControl, AclMgr, SubjectDescriptor};
use crate::error::{Error, ErrorCode};
use crate::im::{ClusterId, CommandRef, DataVersion, EndptId, FabricIndex, ListIndex};
use crate::tlv::{Nullable, TLVElement, TLVWriter};

use super::{
    Access, AttrDataDecoder, AttrDataEncoder, AttrDetails, AttrReadState, CmdDetails, CmdReply,
    ConcretePath, HandlerRegistry, MetadataTree, Node, Privilege,
};

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct WriteFlags: u8 {
        /// The write arrived in a timed interaction
        const TIMED = 0x01;
        /// The write originates on the node itself rather than from a peer
        const FORCE_INTERNAL = 0x02;
        /// First chunk of a list write: the list is to be replaced
        const LIST_FIRST_CHUNK = 0x04;
        /// Last chunk of a list write, possibly without any element
        const LIST_LAST_CHUNK = 0x08;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttrReadRequest<'a> {
    pub path: ConcretePath,
    pub subject: &'a SubjectDescriptor,
    pub fabric_filtered: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AttrWriteRequest<'a> {
    pub path: ConcretePath,
    pub list_index: Option<Nullable<ListIndex>>,
    /// The data version the writer expects the cluster to be at, if any
    pub data_ver: Option<DataVersion>,
    pub subject: &'a SubjectDescriptor,
    pub flags: WriteFlags,
}

impl AttrWriteRequest<'_> {
    pub fn is_list_chunk(&self) -> bool {
        self.flags
            .intersects(WriteFlags::LIST_FIRST_CHUNK | WriteFlags::LIST_LAST_CHUNK)
            || matches!(self.list_index, Some(Nullable::Null))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CmdInvokeRequest<'a> {
    pub path: ConcretePath,
    pub command_ref: Option<CommandRef>,
    pub subject: &'a SubjectDescriptor,
    pub timed: bool,
}

impl CmdInvokeRequest<'_> {
    pub fn details(&self) -> CmdDetails {
        CmdDetails {
            endpoint_id: self.path.endpoint,
            cluster_id: self.path.cluster,
            cmd_id: self.path.leaf,
            command_ref: self.command_ref,
            fab_idx: self.subject.fab_idx,
        }
    }
}

/// The data model as seen by the Interaction Model engine.
///
/// Errors are status-shaped: the `*NotFound` codes for missing metadata, `UnsupportedAccess`
/// when the subject lacks the privilege, `UnsupportedRead`/`UnsupportedWrite` for the wrong
/// kind of access, `NeedsTimedInteraction` when a timed interaction is required.
pub trait InteractionModel {
    fn metadata(&self) -> &dyn MetadataTree;

    /// Checks that the attribute exists, is readable and the subject may read it
    fn check_attr_access(
        &self,
        subject: &SubjectDescriptor,
        path: &ConcretePath,
    ) -> Result<(), Error>;

    /// Checks that the event exists and the subject may receive it
    fn check_event_access(
        &self,
        subject: &SubjectDescriptor,
        path: &ConcretePath,
    ) -> Result<(), Error>;

    /// Reads one attribute into `tw`.
    ///
    /// `state` must start out as [`AttrReadState::new`]. Fails with `MoreListData` when a
    /// list was only partially emitted, in which case the call is to be repeated with the
    /// same state into a fresh message. See [`AttrDataEncoder::encode_list`].
    fn read_attribute(
        &self,
        req: &AttrReadRequest,
        state: &mut AttrReadState,
        tw: &mut TLVWriter,
    ) -> Result<(), Error>;

    fn write_attribute(
        &mut self,
        req: &AttrWriteRequest,
        data: &AttrDataDecoder,
    ) -> Result<(), Error>;

    /// Invokes a command. The handler may reply through `reply`, or defer its reply.
    fn invoke(
        &mut self,
        req: &CmdInvokeRequest,
        data: Option<&TLVElement>,
        reply: &mut CmdReply,
    ) -> Result<(), Error>;

    /// The current data version of a cluster, `None` if nothing serves it
    fn dataver(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion>;

    /// Bumps the data version of a cluster whose state changed outside of a write
    fn dataver_changed(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion>;

    /// Drops everything the model keeps for a removed fabric
    fn remove_fabric(&mut self, _fab_idx: FabricIndex) {}
}

/// The [`InteractionModel`] of a node: its metadata, the cluster handlers and the ACL.
pub struct DataModel<A = AclMgr> {
    node: Node,
    handlers: HandlerRegistry,
    acl: A,
}

impl<A> DataModel<A>
where
    A: AccessControl,
{
    pub fn new(node: Node, acl: A) -> Self {
        Self {
            node,
            handlers: HandlerRegistry::new(),
            acl,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Mutable access to the metadata; endpoints may be added, removed, enabled or disabled
    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn acl(&self) -> &A {
        &self.acl
    }

    pub fn acl_mut(&mut self) -> &mut A {
        &mut self.acl
    }

    fn check(
        &self,
        subject: &SubjectDescriptor,
        path: &ConcretePath,
        privilege: Privilege,
    ) -> Result<(), Error> {
        self.acl.check(subject, &path.to_gp(), privilege)
    }
}

impl<A> InteractionModel for DataModel<A>
where
    A: AccessControl,
{
    fn metadata(&self) -> &dyn MetadataTree {
        &self.node
    }

    fn check_attr_access(
        &self,
        subject: &SubjectDescriptor,
        path: &ConcretePath,
    ) -> Result<(), Error> {
        let attr = self.node.attribute(path.endpoint, path.cluster, path.leaf)?;
        let privilege = attr
            .access
            .required_privilege(Access::READ)
            .ok_or(ErrorCode::UnsupportedRead)?;

        self.check(subject, path, privilege)
    }

    fn check_event_access(
        &self,
        subject: &SubjectDescriptor,
        path: &ConcretePath,
    ) -> Result<(), Error> {
        let event = self.node.event_info(path.endpoint, path.cluster, path.leaf)?;
        let privilege = event
            .access
            .required_privilege(Access::READ)
            .unwrap_or(Privilege::VIEW);

        self.check(subject, path, privilege)
    }

    fn read_attribute(
        &self,
        req: &AttrReadRequest,
        state: &mut AttrReadState,
        tw: &mut TLVWriter,
    ) -> Result<(), Error> {
        let path = req.path;

        self.check_attr_access(req.subject, &path)?;

        let cluster = self.node.cluster(path.endpoint, path.cluster)?;

        let details = AttrDetails {
            endpoint_id: path.endpoint,
            cluster_id: path.cluster,
            attr_id: path.leaf,
            list_index: None,
            fab_idx: req.subject.fab_idx,
            fab_filter: req.fabric_filtered,
            dataver: self.dataver(path.endpoint, path.cluster).unwrap_or(0),
        };

        let mut encoder = AttrDataEncoder::new(&details, state, tw);

        if details.is_system() {
            cluster.read_global(path.leaf, &mut encoder)
        } else {
            let handler = self
                .handlers
                .get(path.endpoint, path.cluster)
                .ok_or(ErrorCode::NoHandler)?;

            debug!("{}::Read", path);

            handler.read(&details, &mut encoder)
        }
    }

    fn write_attribute(
        &mut self,
        req: &AttrWriteRequest,
        data: &AttrDataDecoder,
    ) -> Result<(), Error> {
        let path = req.path;
        let attr = *self.node.attribute(path.endpoint, path.cluster, path.leaf)?;
        let internal = req.flags.contains(WriteFlags::FORCE_INTERNAL);

        if attr.is_system() {
            Err(ErrorCode::UnsupportedWrite)?;
        }

        if !internal {
            let privilege = attr
                .access
                .required_privilege(Access::WRITE)
                .ok_or(ErrorCode::UnsupportedWrite)?;

            self.check(req.subject, &path, privilege)?;

            if attr.is_fabric_scoped() && req.subject.fab_idx == 0 {
                Err(ErrorCode::UnsupportedAccess)?;
            }

            if attr.access.contains(Access::TIMED_ONLY) && !req.flags.contains(WriteFlags::TIMED) {
                Err(ErrorCode::NeedsTimedInteraction)?;
            }
        }

        let current = self.dataver(path.endpoint, path.cluster);
        if req.data_ver.is_some() && req.data_ver != current {
            debug!(
                "{}::Write data version mismatch: {:?} != {:?}",
                path, req.data_ver, current
            );
            Err(ErrorCode::DataVersionMismatch)?;
        }

        let details = AttrDetails {
            endpoint_id: path.endpoint,
            cluster_id: path.cluster,
            attr_id: path.leaf,
            list_index: req.list_index,
            fab_idx: req.subject.fab_idx,
            fab_filter: false,
            dataver: current.unwrap_or(0),
        };

        let handler = self
            .handlers
            .get_mut(path.endpoint, path.cluster)
            .ok_or(ErrorCode::NoHandler)?;

        debug!("{}::Write {:?}", path, req.flags);

        if attr.is_list() && req.is_list_chunk() {
            if req.flags.contains(WriteFlags::LIST_FIRST_CHUNK) {
                handler.list_write_begin(&details)?;
            }

            if !data.is_empty() {
                if let Err(e) = handler.write(&details, data) {
                    warn!("{}::Write failed mid-list: {:?}", path, e.code());
                    handler.list_write_end(&details, false)?;
                    return Err(e);
                }
            }

            if req.flags.contains(WriteFlags::LIST_LAST_CHUNK) {
                handler.list_write_end(&details, true)?;
            }
        } else {
            handler.write(&details, data)?;
        }

        self.handlers.dataver_changed(path.endpoint, path.cluster);

        Ok(())
    }

    fn invoke(
        &mut self,
        req: &CmdInvokeRequest,
        data: Option<&TLVElement>,
        reply: &mut CmdReply,
    ) -> Result<(), Error> {
        let path = req.path;
        let cmd = *self
            .node
            .accepted_command(path.endpoint, path.cluster, path.leaf)?;

        let privilege = cmd
            .access
            .required_privilege(Access::WRITE)
            .unwrap_or(Privilege::OPERATE);

        self.check(req.subject, &path, privilege)?;

        if cmd.is_fabric_scoped() && req.subject.fab_idx == 0 {
            Err(ErrorCode::UnsupportedAccess)?;
        }

        if cmd.is_timed_only() && !req.timed {
            Err(ErrorCode::NeedsTimedInteraction)?;
        }

        let handler = self
            .handlers
            .get_mut(path.endpoint, path.cluster)
            .ok_or(ErrorCode::CommandNotFound)?;

        debug!("{}::Invoke", path);

        handler.invoke(&req.details(), data, reply)
    }

    fn dataver(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion> {
        self.handlers.dataver(endpoint, cluster)
    }

    fn dataver_changed(&self, endpoint: EndptId, cluster: ClusterId) -> Option<DataVersion> {
        self.handlers.dataver_changed(endpoint, cluster)
    }

    fn remove_fabric(&mut self, fab_idx: FabricIndex) {
        self.acl.remove_fabric(fab_idx);
    }
}
