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

//! The read-only view of the data model which request processing runs against.

use crate::error::{Error, ErrorCode};
use crate::im::{AttrId, ClusterId, CmdId, EndptId, EventId};

use super::{Attribute, Cluster, Command, Endpoint, Event, Node};

/// Provider of the endpoint/cluster/attribute/command/event tree currently instantiated
/// on the node.
///
/// Only [`MetadataTree::endpoints`] needs to be implemented. All lookups skip disabled
/// endpoints and fail with the `*NotFound` error code of the missing level.
pub trait MetadataTree {
    /// All endpoints, including disabled ones
    fn endpoints(&self) -> &[Endpoint];

    fn endpoint(&self, endpoint: EndptId) -> Result<&Endpoint, Error> {
        self.endpoints()
            .iter()
            .find(|ep| ep.id == endpoint && ep.enabled)
            .ok_or_else(|| ErrorCode::EndpointNotFound.into())
    }

    fn server_clusters(&self, endpoint: EndptId) -> Result<&[Cluster], Error> {
        Ok(&self.endpoint(endpoint)?.clusters)
    }

    fn cluster(&self, endpoint: EndptId, cluster: ClusterId) -> Result<&Cluster, Error> {
        self.endpoint(endpoint)?
            .cluster(cluster)
            .ok_or_else(|| ErrorCode::ClusterNotFound.into())
    }

    /// The attributes of the cluster, global ones included
    fn attributes(&self, endpoint: EndptId, cluster: ClusterId) -> Result<&[Attribute], Error> {
        Ok(&self.cluster(endpoint, cluster)?.attributes)
    }

    fn attribute(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
        attr: AttrId,
    ) -> Result<&Attribute, Error> {
        self.cluster(endpoint, cluster)?
            .attribute(attr)
            .ok_or_else(|| ErrorCode::AttributeNotFound.into())
    }

    fn accepted_commands(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
    ) -> Result<&[Command], Error> {
        Ok(&self.cluster(endpoint, cluster)?.commands)
    }

    fn accepted_command(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
        cmd: CmdId,
    ) -> Result<&Command, Error> {
        self.cluster(endpoint, cluster)?
            .command(cmd)
            .ok_or_else(|| ErrorCode::CommandNotFound.into())
    }

    /// Response command IDs, ascending and without repetitions
    fn generated_commands(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
    ) -> Result<Vec<CmdId>, Error> {
        Ok(self.cluster(endpoint, cluster)?.generated_commands())
    }

    fn event_info(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
        event: EventId,
    ) -> Result<&Event, Error> {
        self.cluster(endpoint, cluster)?
            .event(event)
            .ok_or_else(|| ErrorCode::EventNotFound.into())
    }
}

impl MetadataTree for Node {
    fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::MetadataTree;
    use crate::dm::{Access, Attribute, Cluster, Command, Endpoint, Node, Quality};
    use crate::error::ErrorCode;

    fn node() -> Node {
        let cluster = Cluster::new(
            6,
            4,
            0,
            &[Attribute::new(0, Access::RV, Quality::NONE)],
            &[Command::new(1, Some(2), Access::WO)],
        );

        let mut disabled = Endpoint::new(2, &[], vec![cluster.clone()]);
        disabled.enabled = false;

        Node::new(0, vec![Endpoint::new(1, &[], vec![cluster]), disabled])
    }

    #[test]
    fn test_lookup_errors() {
        let node = node();

        assert!(node.attribute(1, 6, 0).is_ok());
        assert_eq!(
            node.attribute(3, 6, 0).unwrap_err().code(),
            ErrorCode::EndpointNotFound
        );
        assert_eq!(
            node.attribute(1, 8, 0).unwrap_err().code(),
            ErrorCode::ClusterNotFound
        );
        assert_eq!(
            node.attribute(1, 6, 9).unwrap_err().code(),
            ErrorCode::AttributeNotFound
        );
        assert_eq!(
            node.accepted_command(1, 6, 0).unwrap_err().code(),
            ErrorCode::CommandNotFound
        );
        assert_eq!(
            node.event_info(1, 6, 0).unwrap_err().code(),
            ErrorCode::EventNotFound
        );
    }

    #[test]
    fn test_disabled_endpoint_is_invisible() {
        let node = node();

        assert_eq!(node.endpoints().len(), 2);
        assert_eq!(
            node.server_clusters(2).unwrap_err().code(),
            ErrorCode::EndpointNotFound
        );
        assert_eq!(node.generated_commands(1, 6).unwrap(), vec![2]);
        assert!(node
            .attributes(1, 6)
            .unwrap()
            .iter()
            .any(|attr| attr.id == 0xFFF9));
    }
}
