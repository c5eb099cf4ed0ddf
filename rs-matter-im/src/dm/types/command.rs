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

use crate::im::{ClusterId, CmdId, CmdPath, CommandRef, EndptId, FabricIndex};

use super::{Access, ConcretePath};

/// A type modeling the command meta-data in the Matter data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// The command ID
    pub id: CmdId,
    /// The ID of the response command, if the command has one
    pub resp_id: Option<CmdId>,
    /// The access control for the command
    pub access: Access,
}

impl Command {
    /// Creates a new command with the given ID, response command ID, and access control.
    pub const fn new(id: CmdId, resp_id: Option<CmdId>, access: Access) -> Self {
        Self {
            id,
            resp_id,
            access,
        }
    }

    pub fn is_fabric_scoped(&self) -> bool {
        self.access.contains(Access::FAB_SCOPED)
    }

    pub fn is_timed_only(&self) -> bool {
        self.access.contains(Access::TIMED_ONLY)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdDetails {
    pub endpoint_id: EndptId,
    pub cluster_id: ClusterId,
    pub cmd_id: CmdId,
    pub command_ref: Option<CommandRef>,
    /// The accessing Fabric Index, 0 if none
    pub fab_idx: FabricIndex,
}

impl CmdDetails {
    pub fn path(&self) -> CmdPath {
        CmdPath::new(
            Some(self.endpoint_id),
            Some(self.cluster_id),
            Some(self.cmd_id),
        )
    }

    pub fn concrete(&self) -> ConcretePath {
        ConcretePath::new(self.endpoint_id, self.cluster_id, self.cmd_id)
    }
}
