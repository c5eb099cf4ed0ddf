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

//! Access control: who is asking ([`SubjectDescriptor`]) and whether they may
//! ([`AccessControl`], implemented by the ACL-entry based [`AclMgr`]).

use core::fmt::{self, Display};

use log::{debug, error, info};

use crate::dm::Privilege;
use crate::error::{Error, ErrorCode};
use crate::im::{ClusterId, DeviceTypeId, EndptId, FabricIndex, GenericPath, NodeId};
use crate::utils::fabric_arena::FabricArena;

/// Max subjects per ACL entry
pub const SUBJECTS_PER_ENTRY: usize = 4;

/// Max targets per ACL entry
pub const TARGETS_PER_ENTRY: usize = 3;

/// Max ACL entries per fabric
pub const ENTRIES_PER_FABRIC: usize = 4;

/// Max CASE Authenticated Tags carried in a NOC
pub const MAX_CAT_IDS_PER_NOC: usize = 3;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum AuthMode {
    Pase = 1,
    Case = 2,
    Group = 3,
    Invalid = 4,
}

/// An accessor can have as many identities: one node id and up to MAX_CAT_IDS_PER_NOC
const MAX_ACCESSOR_SUBJECTS: usize = 1 + MAX_CAT_IDS_PER_NOC;

/// The CAT Prefix used in Subjects
pub const NOC_CAT_SUBJECT_PREFIX: u64 = 0xFFFF_FFFD_0000_0000;

const NOC_CAT_ID_MASK: u64 = 0xFFFF_0000;
const NOC_CAT_VERSION_MASK: u64 = 0xFFFF;

/// Is this identifier a NOC CAT
fn is_noc_cat(id: u64) -> bool {
    (id & NOC_CAT_SUBJECT_PREFIX) == NOC_CAT_SUBJECT_PREFIX
}

/// Get the 16-bit NOC CAT id from the identifier
fn get_noc_cat_id(id: u64) -> u64 {
    (id & NOC_CAT_ID_MASK) >> 16
}

/// Get the 16-bit NOC CAT version from the identifier
fn get_noc_cat_version(id: u64) -> u64 {
    id & NOC_CAT_VERSION_MASK
}

/// Generate CAT that is embeddedable in the NoC
/// This only generates the 32-bit CAT ID
pub fn gen_noc_cat(id: u16, version: u16) -> u32 {
    ((id as u32) << 16) | version as u32
}

/// The Subjects that identify the Accessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorSubjects([u64; MAX_ACCESSOR_SUBJECTS]);

impl AccessorSubjects {
    pub fn new(id: u64) -> Self {
        let mut a = Self(Default::default());
        a.0[0] = id;
        a
    }

    pub fn add_catid(&mut self, subject: u32) -> Result<(), Error> {
        for (i, val) in self.0.iter().enumerate() {
            if *val == 0 {
                self.0[i] = NOC_CAT_SUBJECT_PREFIX | (subject as u64);
                return Ok(());
            }
        }
        Err(ErrorCode::NoSpace.into())
    }

    /// Match the match_subject with any of the current subjects
    /// If a NOC CAT is specified, CAT aware matching is also performed
    pub fn matches(&self, acl_subject: u64) -> bool {
        self.0.iter().filter(|v| **v != 0).any(|v| {
            *v == acl_subject
                || (is_noc_cat(*v)
                    && is_noc_cat(acl_subject)
                    && get_noc_cat_id(*v) == get_noc_cat_id(acl_subject)
                    && get_noc_cat_version(*v) >= get_noc_cat_version(acl_subject))
        })
    }
}

impl Display for AccessorSubjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in self.0 {
            if is_noc_cat(i) {
                write!(f, "CAT({} - {})", get_noc_cat_id(i), get_noc_cat_version(i))?;
            } else if i != 0 {
                write!(f, "{}, ", i)?;
            }
        }
        write!(f, "]")
    }
}

/// The identity behind a request, as established by the secure session it came in on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectDescriptor {
    /// The fabric index of the accessor, 0 if the session is not bound to a fabric
    pub fab_idx: FabricIndex,
    /// The peer node ID
    pub node_id: NodeId,
    pub auth_mode: AuthMode,
    /// Accessor's subjects: the node-id and any NoC CATs
    pub subjects: AccessorSubjects,
}

impl SubjectDescriptor {
    pub fn case(fab_idx: FabricIndex, node_id: NodeId, cat_ids: &[u32]) -> Self {
        let mut subjects = AccessorSubjects::new(node_id);
        for cat_id in cat_ids.iter().filter(|cat_id| **cat_id != 0) {
            let _ = subjects.add_catid(*cat_id);
        }

        Self {
            fab_idx,
            node_id,
            auth_mode: AuthMode::Case,
            subjects,
        }
    }

    pub fn pase(fab_idx: FabricIndex) -> Self {
        Self {
            fab_idx,
            node_id: 0,
            auth_mode: AuthMode::Pase,
            subjects: AccessorSubjects::new(1),
        }
    }

    /// The subject of requests originating on the node itself
    pub fn internal() -> Self {
        Self {
            fab_idx: 0,
            node_id: 0,
            auth_mode: AuthMode::Invalid,
            subjects: AccessorSubjects::new(0),
        }
    }
}

impl Display for SubjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}[F:{},P:{}] {}",
            self.auth_mode, self.fab_idx, self.node_id, self.subjects
        )
    }
}

/// The Access Control Evaluator
///
/// A failed check is opaque: the caller only learns that access was not granted.
pub trait AccessControl {
    fn check(
        &self,
        subject: &SubjectDescriptor,
        path: &GenericPath,
        privilege: Privilege,
    ) -> Result<(), Error>;

    /// Drops whatever the evaluator keeps for a removed fabric
    fn remove_fabric(&mut self, _fab_idx: FabricIndex) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub cluster: Option<ClusterId>,
    pub endpoint: Option<EndptId>,
    pub device_type: Option<DeviceTypeId>,
}

impl Target {
    pub fn new(
        endpoint: Option<EndptId>,
        cluster: Option<ClusterId>,
        device_type: Option<DeviceTypeId>,
    ) -> Self {
        Self {
            cluster,
            endpoint,
            device_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    privilege: Privilege,
    auth_mode: AuthMode,
    subjects: Vec<u64>,
    /// `None` grants on all targets, as does an empty list
    targets: Option<Vec<Target>>,
}

impl AclEntry {
    pub fn new(privilege: Privilege, auth_mode: AuthMode) -> Self {
        Self {
            privilege,
            auth_mode,
            subjects: Vec::new(),
            targets: Some(Vec::new()),
        }
    }

    pub fn add_subject(&mut self, subject: u64) -> Result<(), Error> {
        if self.subjects.len() >= SUBJECTS_PER_ENTRY {
            Err(ErrorCode::NoSpace)?;
        }

        self.subjects.push(subject);
        Ok(())
    }

    pub fn add_subject_catid(&mut self, cat_id: u32) -> Result<(), Error> {
        self.add_subject(NOC_CAT_SUBJECT_PREFIX | cat_id as u64)
    }

    pub fn add_target(&mut self, target: Target) -> Result<(), Error> {
        let targets = self.targets.get_or_insert_with(Vec::new);
        if targets.len() >= TARGETS_PER_ENTRY {
            Err(ErrorCode::NoSpace)?;
        }

        targets.push(target);
        Ok(())
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    fn match_subject(&self, subject: &SubjectDescriptor) -> bool {
        if self.auth_mode != subject.auth_mode {
            return false;
        }

        // Subjects array empty implies allow for all subjects
        self.subjects.is_empty() || self.subjects.iter().any(|s| subject.subjects.matches(*s))
    }

    fn match_target(&self, path: &GenericPath) -> bool {
        match self.targets.as_deref() {
            None | Some([]) => true,
            Some(targets) => targets.iter().any(|t| {
                (t.endpoint.is_none() || t.endpoint == path.endpoint)
                    && (t.cluster.is_none() || t.cluster == path.cluster)
            }),
        }
    }

    pub fn allow(
        &self,
        subject: &SubjectDescriptor,
        path: &GenericPath,
        privilege: Privilege,
    ) -> bool {
        self.match_subject(subject)
            && self.match_target(path)
            && self.privilege.contains(privilege)
    }
}

/// The ACL entries of all fabrics
pub struct AclMgr {
    entries: FabricArena<AclEntry>,
}

impl AclMgr {
    pub const fn new() -> Self {
        Self {
            entries: FabricArena::new(ENTRIES_PER_FABRIC),
        }
    }

    /// Add a new entry to the fabric's ACL, returning its index
    pub fn add(&mut self, fab_idx: FabricIndex, entry: AclEntry) -> Result<usize, Error> {
        if fab_idx == 0 {
            Err(ErrorCode::NoFabricId)?;
        }

        // PASE entries are reserved
        if matches!(entry.auth_mode, AuthMode::Pase | AuthMode::Invalid) {
            Err(ErrorCode::ConstraintError)?;
        }

        let index = self
            .entries
            .push(fab_idx, entry)
            .map_err(|_| Error::new(ErrorCode::NoSpace))?;

        info!("ACL entry {} added for fabric {}", index, fab_idx);

        Ok(index)
    }

    pub fn edit(&mut self, fab_idx: FabricIndex, index: usize, new: AclEntry) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(fab_idx, index)
            .ok_or(ErrorCode::NotFound)?;

        *entry = new;

        Ok(())
    }

    pub fn delete(&mut self, fab_idx: FabricIndex, index: usize) -> Result<(), Error> {
        self.entries
            .remove(fab_idx, index)
            .map(|_| ())
            .ok_or_else(|| ErrorCode::NotFound.into())
    }

    pub fn delete_for_fabric(&mut self, fab_idx: FabricIndex) {
        self.entries.reset(fab_idx);
    }

    pub fn entries(&self, fab_idx: FabricIndex) -> &[AclEntry] {
        self.entries.get(fab_idx)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allow(
        &self,
        subject: &SubjectDescriptor,
        path: &GenericPath,
        privilege: Privilege,
    ) -> bool {
        // PASE Sessions have implicit access grant
        //
        // During commissioning, the ACL behaves as if the following implicit entry were
        // present on the commissionee:
        // Access Control Cluster: {
        //     ACL: [
        //         0: {
        //             // implicit entry only; does not explicitly exist!
        //             FabricIndex: 0, // not fabric-specific
        //             Privilege: Administer,
        //             AuthMode: PASE,
        //             Subjects: [],
        //             Targets: [] // entire node
        //         }
        //     ],
        //     Extension: []
        // }
        if subject.auth_mode == AuthMode::Pase {
            return true;
        }

        let allowed = subject.fab_idx != 0
            && self
                .entries
                .get(subject.fab_idx)
                .iter()
                .any(|entry| entry.allow(subject, path, privilege));

        if !allowed {
            error!(
                "ACL Disallow for subject {} on {:?} needing {:?}",
                subject, path, privilege
            );
        }

        allowed
    }
}

impl Default for AclMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessControl for AclMgr {
    fn check(
        &self,
        subject: &SubjectDescriptor,
        path: &GenericPath,
        privilege: Privilege,
    ) -> Result<(), Error> {
        if self.allow(subject, path, privilege) {
            Ok(())
        } else {
            Err(ErrorCode::UnsupportedAccess.into())
        }
    }

    fn remove_fabric(&mut self, fab_idx: FabricIndex) {
        debug!("Dropping ACL entries of fabric {}", fab_idx);
        self.delete_for_fabric(fab_idx);
    }
}

impl fmt::Display for AclMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ACLS: [")?;
        for (fab_idx, entry) in self.entries.iter() {
            writeln!(f, "  {{ fabric: {}, entry: {:?} }},", fab_idx, entry)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
#[allow(clippy::bool_assert_comparison)]
mod tests {
    use crate::dm::Privilege;
    use crate::im::GenericPath;

    use super::{gen_noc_cat, AccessControl, AclEntry, AclMgr, AuthMode, SubjectDescriptor, Target};

    const FAB_1: u8 = 1;
    const FAB_2: u8 = 2;

    fn path() -> GenericPath {
        GenericPath::new(Some(1), Some(1234), None)
    }

    #[test]
    fn test_basic_empty_subject_target() {
        let mut am = AclMgr::new();

        let pase = SubjectDescriptor::pase(0);
        // Always allow for PASE sessions
        assert!(am.allow(&pase, &path(), Privilege::ADMIN));

        let case = SubjectDescriptor::case(FAB_2, 112233, &[]);
        // Default deny for CASE
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Deny adding invalid auth mode (PASE is reserved for future)
        let new = AclEntry::new(Privilege::VIEW, AuthMode::Pase);
        assert!(am.add(FAB_1, new).is_err());

        // Deny for fab idx mismatch
        let new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        assert_eq!(am.add(FAB_1, new).unwrap(), 0);
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Allow
        let new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        assert_eq!(am.add(FAB_2, new).unwrap(), 0);
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);
        assert!(am.check(&case, &path(), Privilege::VIEW).is_ok());
    }

    #[test]
    fn test_subject() {
        let mut am = AclMgr::new();
        let case = SubjectDescriptor::case(FAB_1, 112233, &[]);

        // Deny for subject mismatch
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject(112232).unwrap();
        assert_eq!(am.add(FAB_1, new).unwrap(), 0);
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Allow for subject match - target is wildcard
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject(112233).unwrap();
        assert_eq!(am.add(FAB_1, new).unwrap(), 1);
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);
    }

    #[test]
    fn test_cat() {
        let allow_cat = 0xABCD;
        let disallow_cat = 0xCAFE;
        let v2 = 2;
        let v3 = 3;

        // Accessor has nodeid and CAT 0xABCD_0002
        let case = SubjectDescriptor::case(FAB_1, 112233, &[gen_noc_cat(allow_cat, v2)]);

        let mut am = AclMgr::new();

        // Deny for CAT id mismatch
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject_catid(gen_noc_cat(disallow_cat, v2)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Deny of CAT version mismatch
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject_catid(gen_noc_cat(allow_cat, v3)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Allow for CAT match
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject_catid(gen_noc_cat(allow_cat, v2)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);
    }

    #[test]
    fn test_cat_version() {
        let allow_cat = 0xABCD;
        let v2 = 2;
        let v3 = 3;

        // Accessor has nodeid and CAT 0xABCD_0003
        let case = SubjectDescriptor::case(FAB_1, 112233, &[gen_noc_cat(allow_cat, v3)]);

        let mut am = AclMgr::new();

        // Allow for CAT version newer than the one in the entry
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject_catid(gen_noc_cat(allow_cat, v2)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);
    }

    #[test]
    fn test_target() {
        let mut am = AclMgr::new();
        let case = SubjectDescriptor::case(FAB_1, 112233, &[]);

        // Deny for target mismatch
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_target(Target::new(Some(2), Some(4), None)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), false);

        // Allow for cluster match - subject wildcard
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_target(Target::new(None, Some(1234), None)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);

        am.delete_for_fabric(FAB_1);

        // Allow for endpoint match - subject wildcard
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_target(Target::new(Some(1), None, None)).unwrap();
        am.add(FAB_1, new).unwrap();
        assert_eq!(am.allow(&case, &path(), Privilege::VIEW), true);
    }

    #[test]
    fn test_privilege() {
        let mut am = AclMgr::new();
        let case = SubjectDescriptor::case(FAB_1, 112233, &[]);

        // Create an Exact Match ACL with View privilege
        let mut new = AclEntry::new(Privilege::VIEW, AuthMode::Case);
        new.add_subject(112233).unwrap();
        new.add_target(Target::new(Some(1), Some(1234), None)).unwrap();
        am.add(FAB_1, new).unwrap();

        // Write on an RWVA without admin access - deny
        assert_eq!(am.allow(&case, &path(), Privilege::ADMIN), false);

        // Create an Exact Match ACL with Admin privilege
        let mut new = AclEntry::new(Privilege::ADMIN, AuthMode::Case);
        new.add_subject(112233).unwrap();
        new.add_target(Target::new(Some(1), Some(1234), None)).unwrap();
        am.add(FAB_1, new).unwrap();

        // Write on an RWVA with admin access - allow
        assert_eq!(am.allow(&case, &path(), Privilege::ADMIN), true);
        // Admin implies operate
        assert_eq!(am.allow(&case, &path(), Privilege::OPERATE), true);
    }

    #[test]
    fn test_delete_for_fabric() {
        let mut am = AclMgr::new();
        let case1 = SubjectDescriptor::case(FAB_1, 112233, &[]);
        let case2 = SubjectDescriptor::case(FAB_2, 112233, &[]);

        am.add(FAB_1, AclEntry::new(Privilege::VIEW, AuthMode::Case))
            .unwrap();
        am.add(FAB_2, AclEntry::new(Privilege::VIEW, AuthMode::Case))
            .unwrap();

        assert_eq!(am.allow(&case1, &path(), Privilege::VIEW), true);
        assert_eq!(am.allow(&case2, &path(), Privilege::VIEW), true);

        am.remove_fabric(FAB_1);

        assert_eq!(am.allow(&case1, &path(), Privilege::VIEW), false);
        assert_eq!(am.allow(&case2, &path(), Privilege::VIEW), true);
        assert!(am.entries(FAB_1).is_empty());
        assert!(am.delete(FAB_2, 3).is_err());
        assert!(am.delete(FAB_2, 0).is_ok());
    }
}
