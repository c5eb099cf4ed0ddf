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

//! Expansion of (potentially wildcard) request paths into concrete paths, using the
//! metadata of the node.
//!
//! A concrete request path expands to itself after checking that it exists, failing
//! with the error code of the first missing level. A wildcard path expands to every
//! matching concrete path on the enabled endpoints and never fails; ACL filtering is
//! left to the caller, which checks every expanded path independently.

use crate::error::Error;
use crate::im::GenericPath;

use super::{Attribute, Cluster, Command, ConcretePath, Endpoint, Event, MetadataTree};

/// A helper type that captures which kind of leaf is being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Attribute,
    Command,
    Event,
}

pub struct PathExpander<'a, T: ?Sized> {
    tree: &'a T,
}

impl<'a, T> PathExpander<'a, T>
where
    T: MetadataTree + ?Sized,
{
    pub const fn new(tree: &'a T) -> Self {
        Self { tree }
    }

    /// The (endpoint, cluster) pairs on enabled endpoints matched by `path`
    pub fn clusters(
        &self,
        path: GenericPath,
    ) -> impl Iterator<Item = (&'a Endpoint, &'a Cluster)> + 'a {
        self.tree
            .endpoints()
            .iter()
            .filter(move |ep| ep.enabled && path.endpoint.map_or(true, |id| id == ep.id))
            .flat_map(move |ep| {
                ep.clusters
                    .iter()
                    .filter(move |cluster| path.cluster.map_or(true, |id| id == cluster.id))
                    .map(move |cluster| (ep, cluster))
            })
    }

    pub fn attributes(
        &self,
        path: GenericPath,
    ) -> impl Iterator<Item = (&'a Endpoint, &'a Cluster, &'a Attribute)> + 'a {
        self.clusters(path).flat_map(move |(ep, cluster)| {
            cluster
                .attributes
                .iter()
                .filter(move |attr| path.leaf.map_or(true, |id| id == attr.id))
                .map(move |attr| (ep, cluster, attr))
        })
    }

    pub fn commands(
        &self,
        path: GenericPath,
    ) -> impl Iterator<Item = (&'a Endpoint, &'a Cluster, &'a Command)> + 'a {
        self.clusters(path).flat_map(move |(ep, cluster)| {
            cluster
                .commands
                .iter()
                .filter(move |cmd| path.leaf.map_or(true, |id| id == cmd.id))
                .map(move |cmd| (ep, cluster, cmd))
        })
    }

    pub fn events(
        &self,
        path: GenericPath,
    ) -> impl Iterator<Item = (&'a Endpoint, &'a Cluster, &'a Event)> + 'a {
        self.clusters(path).flat_map(move |(ep, cluster)| {
            cluster
                .events
                .iter()
                .filter(move |event| path.leaf.map_or(true, |id| id == event.id))
                .map(move |event| (ep, cluster, event))
        })
    }

    pub fn expand_attributes(&self, path: &GenericPath) -> Result<Vec<ConcretePath>, Error> {
        self.expand(path, Leaf::Attribute)
    }

    pub fn expand_commands(&self, path: &GenericPath) -> Result<Vec<ConcretePath>, Error> {
        self.expand(path, Leaf::Command)
    }

    pub fn expand_events(&self, path: &GenericPath) -> Result<Vec<ConcretePath>, Error> {
        self.expand(path, Leaf::Event)
    }

    fn expand(&self, path: &GenericPath, leaf: Leaf) -> Result<Vec<ConcretePath>, Error> {
        if let Some(concrete) = ConcretePath::from_gp(path) {
            let (endpoint, cluster, id) = (concrete.endpoint, concrete.cluster, concrete.leaf);

            match leaf {
                Leaf::Attribute => self.tree.attribute(endpoint, cluster, id).map(|_| ())?,
                Leaf::Command => self.tree.accepted_command(endpoint, cluster, id).map(|_| ())?,
                Leaf::Event => self.tree.event_info(endpoint, cluster, id).map(|_| ())?,
            }

            return Ok(vec![concrete]);
        }

        let path = *path;

        let expanded = match leaf {
            Leaf::Attribute => self
                .attributes(path)
                .map(|(ep, cluster, attr)| ConcretePath::new(ep.id, cluster.id, attr.id))
                .collect(),
            Leaf::Command => self
                .commands(path)
                .map(|(ep, cluster, cmd)| ConcretePath::new(ep.id, cluster.id, cmd.id))
                .collect(),
            Leaf::Event => self
                .events(path)
                .map(|(ep, cluster, event)| ConcretePath::new(ep.id, cluster.id, event.id))
                .collect(),
        };

        Ok(expanded)
    }
}
