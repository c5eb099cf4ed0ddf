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

use super::{TLVElement, TLVWriter, TagType};
use crate::error::{Error, ErrorCode};
use crate::utils::writebuf::WriteBuf;

const MAX_OWNED_ELEMENT_SIZE: usize = 1 << 20;

pub trait FromTLV<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error>
    where
        Self: Sized;

    // Only optional members are expected to override this
    fn tlv_not_found() -> Result<Self, Error>
    where
        Self: Sized,
    {
        Err(ErrorCode::TLVNotFound.into())
    }
}

pub trait ToTLV {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error>;
}

/// Reads the struct member with context tag `tag`, falling back to
/// [`FromTLV::tlv_not_found`] when it is absent.
pub fn from_tlv_member<'a, T: FromTLV<'a>>(t: &TLVElement<'a>, tag: u8) -> Result<T, Error> {
    match t.find_tag(tag as u32) {
        Ok(member) => T::from_tlv(&member),
        Err(e) if e.code() == ErrorCode::TLVNotFound => T::tlv_not_found(),
        Err(e) => Err(e),
    }
}

/// Encodes `value` as a single anonymous element into an owned buffer.
pub fn to_tlv_vec<T: ToTLV + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    let mut size = 256;

    loop {
        let mut buf = vec![0; size];

        let result = {
            let mut wb = WriteBuf::new(&mut buf);
            let mut tw = TLVWriter::new(&mut wb);

            value
                .to_tlv(&mut tw, TagType::Anonymous)
                .map(|_| wb.get_tail())
        };

        match result {
            Ok(len) => {
                buf.truncate(len);
                return Ok(buf);
            }
            Err(e) if e.code() == ErrorCode::NoSpace && size < MAX_OWNED_ELEMENT_SIZE => size *= 2,
            Err(e) => return Err(e),
        }
    }
}

macro_rules! fromtlv_for {
    ($($t:ident)*) => {
        $(
            impl<'a> FromTLV<'a> for $t {
                fn from_tlv(t: &TLVElement) -> Result<Self, Error> {
                    t.$t()
                }
            }
        )*
    };
}

macro_rules! totlv_for {
    ($($t:ident)*) => {
        $(
            impl ToTLV for $t {
                fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
                    tw.$t(tag, *self)
                }
            }
        )*
    };
}

fromtlv_for!(i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 bool);
totlv_for!(i8 i16 i32 i64 u8 u16 u32 u64 f32 f64 bool);

impl<T: ToTLV + ?Sized> ToTLV for &T {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        (**self).to_tlv(tw, tag)
    }
}

/// A borrowed Matter UTF-8 string
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UtfStr<'a>(pub &'a str);

impl<'a> FromTLV<'a> for UtfStr<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<UtfStr<'a>, Error> {
        t.utf8().map(UtfStr)
    }
}

impl<'a> ToTLV for UtfStr<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.utf8(tag, self.0)
    }
}

/// A borrowed Matter octet string
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OctetStr<'a>(pub &'a [u8]);

impl<'a> FromTLV<'a> for OctetStr<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<OctetStr<'a>, Error> {
        t.str().map(OctetStr)
    }
}

impl<'a> ToTLV for OctetStr<'a> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.str(tag, self.0)
    }
}

/// Owned OctetString
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Octets(pub Vec<u8>);

impl FromTLV<'_> for Octets {
    fn from_tlv(t: &TLVElement) -> Result<Octets, Error> {
        t.str().map(|s| Octets(s.to_vec()))
    }
}

impl ToTLV for Octets {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.str(tag, &self.0)
    }
}

impl FromTLV<'_> for String {
    fn from_tlv(t: &TLVElement) -> Result<String, Error> {
        t.utf8().map(|s| s.to_string())
    }
}

impl ToTLV for String {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.utf8(tag, self)
    }
}

impl ToTLV for str {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.utf8(tag, self)
    }
}

impl<'a, T: FromTLV<'a>> FromTLV<'a> for Option<T> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Option<T>, Error> {
        Ok(Some(T::from_tlv(t)?))
    }

    fn tlv_not_found() -> Result<Self, Error>
    where
        Self: Sized,
    {
        Ok(None)
    }
}

impl<T: ToTLV> ToTLV for Option<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        match self {
            Some(s) => s.to_tlv(tw, tag),
            None => Ok(()),
        }
    }
}

/// A value which may be explicitly encoded as TLV null.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Nullable<T> {
    Null,
    NotNull(T),
}

impl<T> Nullable<T> {
    pub fn is_null(&self) -> bool {
        matches!(self, Nullable::Null)
    }

    pub fn notnull(self) -> Option<T> {
        match self {
            Nullable::Null => None,
            Nullable::NotNull(t) => Some(t),
        }
    }
}

impl<'a, T: FromTLV<'a>> FromTLV<'a> for Nullable<T> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Nullable<T>, Error> {
        if t.is_null() {
            Ok(Nullable::Null)
        } else {
            Ok(Nullable::NotNull(T::from_tlv(t)?))
        }
    }
}

impl<T: ToTLV> ToTLV for Nullable<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        match self {
            Nullable::Null => tw.null(tag),
            Nullable::NotNull(t) => t.to_tlv(tw, tag),
        }
    }
}

impl<T: ToTLV> ToTLV for [T] {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_array(tag)?;
        for i in self {
            i.to_tlv(tw, TagType::Anonymous)?;
        }
        tw.end_container()
    }
}

impl<T: ToTLV, const N: usize> ToTLV for [T; N] {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        self.as_slice().to_tlv(tw, tag)
    }
}

impl<T: ToTLV> ToTLV for Vec<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        self.as_slice().to_tlv(tw, tag)
    }
}

impl<'a, T: FromTLV<'a>> FromTLV<'a> for Vec<T> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.confirm_array()?
            .enter()
            .ok_or(ErrorCode::TLVTypeMismatch)?
            .map(|element| T::from_tlv(&element))
            .collect()
    }
}
