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

use bitflags::bitflags;

use crate::error::{Error, ErrorCode};
use crate::tlv::{FromTLV, TLVElement, TLVWriter, TagType, ToTLV};

bitflags! {
    /// Privileges are hierarchical: each level implies all levels below it.
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Privilege: u8 {
        const V = 0x01;
        const O = 0x02;
        const M = 0x04;
        const A = 0x08;

        const VIEW = Self::V.bits();
        const OPERATE = Self::V.bits() | Self::O.bits();
        const MANAGE = Self::V.bits() | Self::O.bits() | Self::M.bits();
        const ADMIN = Self::V.bits() | Self::O.bits() | Self::M.bits() | Self::A.bits();
    }
}

impl Privilege {
    /// The value of the AccessControlEntryPrivilegeEnum for this privilege
    pub fn raw_value(&self) -> u8 {
        if self.contains(Privilege::A) {
            5
        } else if self.contains(Privilege::M) {
            4
        } else if self.contains(Privilege::O) {
            3
        } else if self.contains(Privilege::V) {
            1
        } else {
            0
        }
    }

    pub fn from_raw_value(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Privilege::VIEW),
            3 => Ok(Privilege::OPERATE),
            4 => Ok(Privilege::MANAGE),
            5 => Ok(Privilege::ADMIN),
            _ => Err(ErrorCode::ConstraintError.into()),
        }
    }
}

impl FromTLV<'_> for Privilege {
    fn from_tlv(t: &TLVElement) -> Result<Self, Error> {
        Self::from_raw_value(t.u8()?)
    }
}

impl ToTLV for Privilege {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.u8(tag, self.raw_value())
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Access: u16 {
        // These must match the bits in the Privilege object :-|
        const NEED_VIEW = 0x0001;
        const NEED_OPERATE = 0x0002;
        const NEED_MANAGE = 0x0004;
        const NEED_ADMIN = 0x0008;

        const READ = 0x0010;
        const WRITE = 0x0020;
        const FAB_SCOPED = 0x0040;
        const FAB_SENSITIVE = 0x0080;
        const TIMED_ONLY = 0x0100;

        const READ_PRIVILEGE_MASK = Self::NEED_VIEW.bits() | Self::NEED_MANAGE.bits() | Self::NEED_OPERATE.bits() | Self::NEED_ADMIN.bits();
        const WRITE_PRIVILEGE_MASK = Self::NEED_MANAGE.bits() | Self::NEED_OPERATE.bits() | Self::NEED_ADMIN.bits();
        const RV = Self::READ.bits() | Self::NEED_VIEW.bits();
        const RA = Self::READ.bits() | Self::NEED_ADMIN.bits();
        const RWVO = Self::READ.bits() | Self::WRITE.bits() | Self::NEED_VIEW.bits() | Self::NEED_OPERATE.bits();
        const RWVA = Self::READ.bits() | Self::WRITE.bits() | Self::NEED_VIEW.bits() | Self::NEED_ADMIN.bits();
        const RWFA = Self::READ.bits() | Self::WRITE.bits() | Self::FAB_SCOPED.bits() | Self::NEED_ADMIN.bits();
        const RWVM = Self::READ.bits() | Self::WRITE.bits() | Self::NEED_VIEW.bits() | Self::NEED_MANAGE.bits();
        const RWFVM = Self::READ.bits() | Self::WRITE.bits() | Self::FAB_SCOPED.bits() | Self::NEED_VIEW.bits() | Self::NEED_MANAGE.bits();

        const WO = Self::WRITE.bits() | Self::NEED_OPERATE.bits() | Self::NEED_MANAGE.bits() | Self::NEED_ADMIN.bits();
        const WM = Self::WRITE.bits() | Self::NEED_MANAGE.bits() | Self::NEED_ADMIN.bits();
        const WA = Self::WRITE.bits() | Self::NEED_ADMIN.bits();
    }
}

impl Access {
    /// The least privilege which allows `operation` (`READ` or `WRITE`) on an object
    /// with these access flags, or `None` if the operation is not possible at all.
    ///
    /// Commands are checked with the `WRITE` operation.
    pub fn required_privilege(&self, operation: Access) -> Option<Privilege> {
        let required = if operation.contains(Access::READ) {
            *self & Access::READ_PRIVILEGE_MASK
        } else if operation.contains(Access::WRITE) {
            *self & Access::WRITE_PRIVILEGE_MASK
        } else {
            return None;
        };

        if !self.contains(operation) {
            return None;
        }

        [
            (Access::NEED_VIEW, Privilege::VIEW),
            (Access::NEED_OPERATE, Privilege::OPERATE),
            (Access::NEED_MANAGE, Privilege::MANAGE),
            (Access::NEED_ADMIN, Privilege::ADMIN),
        ]
        .into_iter()
        .find(|(need, _)| required.contains(*need))
        .map(|(_, privilege)| privilege)
    }

    pub fn is_ok(&self, operation: Access, privilege: Privilege) -> bool {
        self.required_privilege(operation)
            .map(|required| privilege.contains(required))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{Access, Privilege};

    #[test]
    fn test_required_privilege() {
        assert_eq!(
            Access::RV.required_privilege(Access::READ),
            Some(Privilege::VIEW)
        );
        assert_eq!(Access::RV.required_privilege(Access::WRITE), None);
        assert_eq!(
            Access::RWVA.required_privilege(Access::WRITE),
            Some(Privilege::ADMIN)
        );
        assert_eq!(
            Access::WO.required_privilege(Access::WRITE),
            Some(Privilege::OPERATE)
        );
    }

    #[test]
    fn test_hierarchy() {
        assert!(Access::RWVM.is_ok(Access::WRITE, Privilege::ADMIN));
        assert!(Access::RWVM.is_ok(Access::WRITE, Privilege::MANAGE));
        assert!(!Access::RWVM.is_ok(Access::WRITE, Privilege::OPERATE));
        assert!(Access::RWVM.is_ok(Access::READ, Privilege::VIEW));
        assert!(!Access::RA.is_ok(Access::READ, Privilege::MANAGE));
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(Privilege::OPERATE.raw_value(), 3);
        assert_eq!(Privilege::from_raw_value(5).unwrap(), Privilege::ADMIN);
        assert!(Privilege::from_raw_value(2).is_err());
    }
}
