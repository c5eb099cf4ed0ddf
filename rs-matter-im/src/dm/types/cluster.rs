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

use log::debug;

use crate::error::{Error, ErrorCode};
use crate::im::{AttrId, ClusterId, CmdId, EventId};

use super::{Attribute, Command, Event, GlobalElements, GLOBAL_ATTRIBUTES};
use crate::dm::AttrDataEncoder;

/// A struct modeling the cluster meta-data
/// (i.e. what is the cluster ID, revision, features, attributes and their access,
/// commands and their access)
/// in the Matter data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// The ID of the cluster
    pub id: ClusterId,
    /// The revision of the cluster
    pub revision: u16,
    /// The feature map of the cluster
    pub feature_map: u32,
    /// The attributes of the cluster, always including the global ones
    pub attributes: Vec<Attribute>,
    /// The commands the cluster accepts
    pub commands: Vec<Command>,
    /// The events the cluster emits
    pub events: Vec<Event>,
}

impl Cluster {
    /// Create a new cluster
    ///
    /// The global attributes (AttributeList, AcceptedCommandList, ...) are appended
    /// to `attributes` unless already present.
    pub fn new(
        id: ClusterId,
        revision: u16,
        feature_map: u32,
        attributes: &[Attribute],
        commands: &[Command],
    ) -> Self {
        let mut all = attributes.to_vec();
        for global in GLOBAL_ATTRIBUTES {
            if !all.iter().any(|attr| attr.id == global.id) {
                all.push(global);
            }
        }

        Self {
            id,
            revision,
            feature_map,
            attributes: all,
            commands: commands.to_vec(),
            events: Vec::new(),
        }
    }

    /// Return a new cluster which also emits `events`
    pub fn with_events(self, events: &[Event]) -> Self {
        Self {
            events: events.to_vec(),
            ..self
        }
    }

    /// Return a reference to the attribute with the given ID, if it exists.
    pub fn attribute(&self, id: AttrId) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.id == id)
    }

    /// Return a reference to the command with the given ID, if it exists.
    pub fn command(&self, id: CmdId) -> Option<&Command> {
        self.commands.iter().find(|cmd| cmd.id == id)
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|event| event.id == id)
    }

    /// The IDs of the response commands of this cluster, in ascending order and
    /// without repetitions.
    pub fn generated_commands(&self) -> Vec<CmdId> {
        let mut generated = self
            .commands
            .iter()
            .filter_map(|cmd| cmd.resp_id)
            .collect::<Vec<_>>();

        generated.sort_unstable();
        generated.dedup();

        generated
    }

    /// Performs an IM attribute read for the given global attribute ID.
    pub fn read_global(&self, attr_id: AttrId, encoder: &mut AttrDataEncoder) -> Result<(), Error> {
        match GlobalElements::try_from(attr_id)? {
            GlobalElements::GeneratedCmdList => {
                let generated = self.generated_commands();
                debug!(
                    "Cluster(0x{:04x})::Attr::GeneratedCmdIDs(0xfff8)::Read -> Ok({:?})",
                    self.id, generated
                );

                encoder.encode_list(|list| {
                    for cmd in &generated {
                        list.encode(cmd)?;
                    }

                    Ok(())
                })
            }
            GlobalElements::AcceptedCmdList => encoder.encode_list(|list| {
                for cmd in &self.commands {
                    list.encode(&cmd.id)?;
                }

                Ok(())
            }),
            GlobalElements::EventList => encoder.encode_list(|list| {
                for event in &self.events {
                    list.encode(&event.id)?;
                }

                Ok(())
            }),
            GlobalElements::AttributeList => encoder.encode_list(|list| {
                for attr in &self.attributes {
                    list.encode(&attr.id)?;
                }

                Ok(())
            }),
            GlobalElements::FeatureMap => {
                debug!(
                    "Cluster(0x{:04x})::Attr::FeatureMap(0xfffc)::Read -> Ok({:08x})",
                    self.id, self.feature_map
                );
                encoder.encode(&self.feature_map)
            }
            GlobalElements::ClusterRevision => {
                debug!(
                    "Cluster(0x{:04x})::Attr::ClusterRevision(0xfffd)::Read -> Ok({})",
                    self.id, self.revision
                );
                encoder.encode(&self.revision)
            }
            GlobalElements::FabricIndex => Err(ErrorCode::AttributeNotFound.into()),
        }
    }
}
