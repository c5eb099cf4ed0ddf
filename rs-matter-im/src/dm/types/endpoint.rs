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

use crate::im::{ClusterId, DeviceTypeId, EndptId};

use super::Cluster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType {
    pub dtype: DeviceTypeId,
    pub drev: u16,
}

/// A logical sub-device of the node together with the server clusters it hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndptId,
    pub device_types: Vec<DeviceType>,
    pub clusters: Vec<Cluster>,
    /// Disabled endpoints are invisible to every interaction, including wildcard expansion
    pub enabled: bool,
}

impl Endpoint {
    pub fn new(id: EndptId, device_types: &[DeviceType], clusters: Vec<Cluster>) -> Self {
        Self {
            id,
            device_types: device_types.to_vec(),
            clusters,
            enabled: true,
        }
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.id == id)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpt({:#06x}) clusters: [", self.id)?;
        for (index, cluster) in self.clusters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:#06x}", cluster.id)?;
        }
        write!(f, "]")
    }
}
