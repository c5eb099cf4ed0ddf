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

use log::info;

use crate::error::{Error, ErrorCode};
use crate::im::EndptId;

use super::Endpoint;

/// The main Matter metadata type describing a Matter Node.
///
/// Endpoints may be added, removed, enabled and disabled at runtime; all of that
/// happens on the engine's loop, between interactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// The ID of the node.
    pub id: u16,
    /// The endpoints of the node, in ascending endpoint ID order.
    pub endpoints: Vec<Endpoint>,
}

impl Node {
    pub fn new(id: u16, endpoints: Vec<Endpoint>) -> Self {
        let mut node = Self { id, endpoints };
        node.endpoints.sort_by_key(|endpoint| endpoint.id);
        node
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<(), Error> {
        if self.endpoints.iter().any(|ep| ep.id == endpoint.id) {
            Err(ErrorCode::Duplicate)?;
        }

        info!("Adding {}", endpoint);

        let pos = self
            .endpoints
            .partition_point(|ep| ep.id < endpoint.id);
        self.endpoints.insert(pos, endpoint);

        Ok(())
    }

    pub fn remove_endpoint(&mut self, id: EndptId) -> Result<Endpoint, Error> {
        let pos = self
            .endpoints
            .iter()
            .position(|ep| ep.id == id)
            .ok_or(ErrorCode::EndpointNotFound)?;

        info!("Removing endpoint {}", id);

        Ok(self.endpoints.remove(pos))
    }

    pub fn set_endpoint_enabled(&mut self, id: EndptId, enabled: bool) -> Result<(), Error> {
        let endpoint = self
            .endpoints
            .iter_mut()
            .find(|ep| ep.id == id)
            .ok_or(ErrorCode::EndpointNotFound)?;

        endpoint.enabled = enabled;

        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node:")?;
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            writeln!(f, "endpoint {}: {}", index, endpoint)?;
        }

        write!(f, "")
    }
}
