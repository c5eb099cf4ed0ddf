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

use crate::im::{AttrPath, ClusterId, CmdPath, EndptId, EventPath, GenericPath};

/// A fully specified (endpoint, cluster, leaf) triple, where the leaf is an attribute,
/// a command or an event ID depending on context.
///
/// Ordered by the numeric id triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConcretePath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
    pub leaf: u32,
}

impl ConcretePath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId, leaf: u32) -> Self {
        Self {
            endpoint,
            cluster,
            leaf,
        }
    }

    pub fn from_gp(path: &GenericPath) -> Option<Self> {
        path.not_wildcard()
            .ok()
            .map(|(endpoint, cluster, leaf)| Self::new(endpoint, cluster, leaf))
    }

    pub const fn to_gp(&self) -> GenericPath {
        GenericPath::new(Some(self.endpoint), Some(self.cluster), Some(self.leaf))
    }

    pub fn attr_path(&self) -> AttrPath {
        AttrPath::new(&self.to_gp())
    }

    pub fn cmd_path(&self) -> CmdPath {
        CmdPath::new(Some(self.endpoint), Some(self.cluster), Some(self.leaf))
    }

    pub fn event_path(&self) -> EventPath {
        EventPath::new(&self.to_gp())
    }
}

impl fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Endpt({:#06x})::Cluster({:#06x})::Leaf({:#06x})",
            self.endpoint, self.cluster, self.leaf
        )
    }
}
