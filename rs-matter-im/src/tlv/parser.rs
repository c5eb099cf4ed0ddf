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

use byteorder::{ByteOrder, LittleEndian};
use log::info;
use num_traits::FromPrimitive;

use crate::error::{Error, ErrorCode};

use super::{TLVValueType, TagType, TAG_MASK, TAG_SHIFT_BITS, TAG_SIZE_MAP, TYPE_MASK};

/// The decoded value of a TLV element.
///
/// Containers carry the encoded bytes of their members, without the closing
/// end-of-container marker.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ElementType<'a> {
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    False,
    True,
    F32(f32),
    F64(f64),
    Utf8l(&'a [u8]),
    Utf16l(&'a [u8]),
    Utf32l(&'a [u8]),
    Str8l(&'a [u8]),
    Str16l(&'a [u8]),
    Str32l(&'a [u8]),
    Null,
    Struct(&'a [u8]),
    Array(&'a [u8]),
    List(&'a [u8]),
    EndCnt,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TLVElement<'a> {
    tag_type: TagType,
    element_type: ElementType<'a>,
}

fn need(buf: &[u8], len: usize) -> Result<(), Error> {
    if buf.len() < len {
        Err(ErrorCode::TruncatedPacket.into())
    } else {
        Ok(())
    }
}

fn fixed_at(buf: &[u8], pos: usize, size: usize) -> Result<&[u8], Error> {
    need(buf, pos + size)?;
    Ok(&buf[pos..pos + size])
}

/// Decodes the element at the start of `buf`, returning it along with the
/// number of bytes it occupies.
fn read_element(buf: &[u8]) -> Result<(TLVElement<'_>, usize), Error> {
    need(buf, 1)?;

    let control = buf[0];
    let tag_id = ((control & TAG_MASK) >> TAG_SHIFT_BITS) as usize;
    let value_type: TLVValueType =
        FromPrimitive::from_u8(control & TYPE_MASK).ok_or(ErrorCode::InvalidData)?;

    let mut pos = 1;
    let tag_size = TAG_SIZE_MAP[tag_id];
    need(buf, pos + tag_size)?;
    let t = &buf[pos..];
    let tag_type = match tag_id {
        0 => TagType::Anonymous,
        1 => TagType::Context(t[0]),
        2 => TagType::CommonPrf16(LittleEndian::read_u16(t)),
        3 => TagType::CommonPrf32(LittleEndian::read_u32(t)),
        4 => TagType::ImplPrf16(LittleEndian::read_u16(t)),
        5 => TagType::ImplPrf32(LittleEndian::read_u32(t)),
        6 => TagType::FullQual48(LittleEndian::read_u48(t)),
        _ => TagType::FullQual64(LittleEndian::read_u64(t)),
    };
    pos += tag_size;

    let fixed = |size| fixed_at(buf, pos, size);

    let (element_type, value_size) = match value_type {
        TLVValueType::S8 => (ElementType::S8(fixed(1)?[0] as i8), 1),
        TLVValueType::S16 => (ElementType::S16(LittleEndian::read_i16(fixed(2)?)), 2),
        TLVValueType::S32 => (ElementType::S32(LittleEndian::read_i32(fixed(4)?)), 4),
        TLVValueType::S64 => (ElementType::S64(LittleEndian::read_i64(fixed(8)?)), 8),
        TLVValueType::U8 => (ElementType::U8(fixed(1)?[0]), 1),
        TLVValueType::U16 => (ElementType::U16(LittleEndian::read_u16(fixed(2)?)), 2),
        TLVValueType::U32 => (ElementType::U32(LittleEndian::read_u32(fixed(4)?)), 4),
        TLVValueType::U64 => (ElementType::U64(LittleEndian::read_u64(fixed(8)?)), 8),
        TLVValueType::False => (ElementType::False, 0),
        TLVValueType::True => (ElementType::True, 0),
        TLVValueType::F32 => (ElementType::F32(LittleEndian::read_f32(fixed(4)?)), 4),
        TLVValueType::F64 => (ElementType::F64(LittleEndian::read_f64(fixed(8)?)), 8),
        TLVValueType::Utf8l
        | TLVValueType::Utf16l
        | TLVValueType::Utf32l
        | TLVValueType::Str8l
        | TLVValueType::Str16l
        | TLVValueType::Str32l => {
            let len_size = match value_type {
                TLVValueType::Utf8l | TLVValueType::Str8l => 1,
                TLVValueType::Utf16l | TLVValueType::Str16l => 2,
                _ => 4,
            };
            let len = LittleEndian::read_uint(fixed(len_size)?, len_size) as usize;
            need(buf, pos + len_size + len)?;
            let s = &buf[pos + len_size..pos + len_size + len];

            let element_type = match value_type {
                TLVValueType::Utf8l => ElementType::Utf8l(s),
                TLVValueType::Utf16l => ElementType::Utf16l(s),
                TLVValueType::Utf32l => ElementType::Utf32l(s),
                TLVValueType::Str8l => ElementType::Str8l(s),
                TLVValueType::Str16l => ElementType::Str16l(s),
                _ => ElementType::Str32l(s),
            };

            (element_type, len_size + len)
        }
        TLVValueType::Null => (ElementType::Null, 0),
        TLVValueType::Struct | TLVValueType::Array | TLVValueType::List => {
            let start = pos;
            let mut end = pos;
            loop {
                let (member, size) = read_element(&buf[end..])?;
                if member.element_type == ElementType::EndCnt {
                    break;
                }
                end += size;
            }

            let members = &buf[start..end];
            let element_type = match value_type {
                TLVValueType::Struct => ElementType::Struct(members),
                TLVValueType::Array => ElementType::Array(members),
                _ => ElementType::List(members),
            };

            // Members plus the end-of-container marker
            (element_type, end - start + 1)
        }
        TLVValueType::EndCnt => (ElementType::EndCnt, 0),
        TLVValueType::Utf64l | TLVValueType::Str64l => Err(ErrorCode::InvalidData)?,
    };

    Ok((
        TLVElement {
            tag_type,
            element_type,
        },
        pos + value_size,
    ))
}

impl<'a> TLVElement<'a> {
    pub fn new(tag: TagType, value: ElementType<'a>) -> Self {
        Self {
            tag_type: tag,
            element_type: value,
        }
    }

    pub fn enter(&self) -> Option<TLVContainerIterator<'a>> {
        match self.element_type {
            ElementType::Struct(a) | ElementType::Array(a) | ElementType::List(a) => {
                Some(TLVContainerIterator { buf: a, current: 0 })
            }
            _ => None,
        }
    }

    pub fn i8(&self) -> Result<i8, Error> {
        match self.element_type {
            ElementType::S8(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn i16(&self) -> Result<i16, Error> {
        match self.element_type {
            ElementType::S8(a) => Ok(a.into()),
            ElementType::S16(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn i32(&self) -> Result<i32, Error> {
        match self.element_type {
            ElementType::S8(a) => Ok(a.into()),
            ElementType::S16(a) => Ok(a.into()),
            ElementType::S32(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn i64(&self) -> Result<i64, Error> {
        match self.element_type {
            ElementType::S8(a) => Ok(a.into()),
            ElementType::S16(a) => Ok(a.into()),
            ElementType::S32(a) => Ok(a.into()),
            ElementType::S64(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u8(&self) -> Result<u8, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u16(&self) -> Result<u16, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u32(&self) -> Result<u32, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a.into()),
            ElementType::U32(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn u64(&self) -> Result<u64, Error> {
        match self.element_type {
            ElementType::U8(a) => Ok(a.into()),
            ElementType::U16(a) => Ok(a.into()),
            ElementType::U32(a) => Ok(a.into()),
            ElementType::U64(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn f32(&self) -> Result<f32, Error> {
        match self.element_type {
            ElementType::F32(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn f64(&self) -> Result<f64, Error> {
        match self.element_type {
            ElementType::F32(a) => Ok(a.into()),
            ElementType::F64(a) => Ok(a),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    /// The raw bytes of an octet or UTF-8 string.
    pub fn slice(&self) -> Result<&'a [u8], Error> {
        match self.element_type {
            ElementType::Str8l(s)
            | ElementType::Str16l(s)
            | ElementType::Str32l(s)
            | ElementType::Utf8l(s)
            | ElementType::Utf16l(s)
            | ElementType::Utf32l(s) => Ok(s),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn str(&self) -> Result<&'a [u8], Error> {
        match self.element_type {
            ElementType::Str8l(s) | ElementType::Str16l(s) | ElementType::Str32l(s) => Ok(s),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn utf8(&self) -> Result<&'a str, Error> {
        match self.element_type {
            ElementType::Utf8l(s) | ElementType::Utf16l(s) | ElementType::Utf32l(s) => {
                Ok(core::str::from_utf8(s)?)
            }
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn bool(&self) -> Result<bool, Error> {
        match self.element_type {
            ElementType::False => Ok(false),
            ElementType::True => Ok(true),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn null(&self) -> Result<(), Error> {
        match self.element_type {
            ElementType::Null => Ok(()),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn is_null(&self) -> bool {
        self.element_type == ElementType::Null
    }

    pub fn confirm_struct(&self) -> Result<TLVElement<'a>, Error> {
        match self.element_type {
            ElementType::Struct(_) => Ok(*self),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn confirm_array(&self) -> Result<TLVElement<'a>, Error> {
        match self.element_type {
            ElementType::Array(_) => Ok(*self),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn confirm_list(&self) -> Result<TLVElement<'a>, Error> {
        match self.element_type {
            ElementType::List(_) => Ok(*self),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    /// Finds the member with context tag `tag` in a struct or list.
    pub fn find_tag(&self, tag: u32) -> Result<TLVElement<'a>, Error> {
        let match_tag: TagType = TagType::Context(tag as u8);

        let iter = self.enter().ok_or(ErrorCode::TLVTypeMismatch)?;
        for a in iter {
            if match_tag == a.tag_type {
                return Ok(a);
            }
        }
        Err(ErrorCode::TLVNotFound.into())
    }

    pub fn get_tag(&self) -> TagType {
        self.tag_type
    }

    pub fn check_ctx_tag(&self, tag: u8) -> bool {
        matches!(self.tag_type, TagType::Context(our_tag) if our_tag == tag)
    }

    pub fn get_element_type(&self) -> ElementType<'a> {
        self.element_type
    }
}

impl<'a> fmt::Display for TLVElement<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag_type {
            TagType::Anonymous => (),
            TagType::Context(tag) => write!(f, "{}: ", tag)?,
            _ => write!(f, "Other Context Tag")?,
        }
        match self.element_type {
            ElementType::Struct(_) => write!(f, "{{"),
            ElementType::Array(_) => write!(f, "["),
            ElementType::List(_) => write!(f, "("),
            ElementType::EndCnt => write!(f, ">"),
            ElementType::True => write!(f, "True"),
            ElementType::False => write!(f, "False"),
            ElementType::Null => write!(f, "Null"),
            ElementType::Str8l(a) | ElementType::Str16l(a) | ElementType::Str32l(a) => {
                write!(f, "{:x?}", a)
            }
            ElementType::Utf8l(a) | ElementType::Utf16l(a) | ElementType::Utf32l(a) => {
                match core::str::from_utf8(a) {
                    Ok(s) => write!(f, "\"{}\"", s),
                    Err(_) => write!(f, "{:x?}", a),
                }
            }
            _ => write!(f, "{:?}", self.element_type),
        }
    }
}

/// Iterates over the members of a container, one level deep.
#[derive(Debug, Clone, PartialEq)]
pub struct TLVContainerIterator<'a> {
    buf: &'a [u8],
    current: usize,
}

impl<'a> Iterator for TLVContainerIterator<'a> {
    type Item = TLVElement<'a>;

    fn next(&mut self) -> Option<TLVElement<'a>> {
        if self.current >= self.buf.len() {
            return None;
        }

        // Members were validated when the container itself got decoded
        let (element, size) = read_element(&self.buf[self.current..]).ok()?;
        self.current += size;

        Some(element)
    }
}

pub fn get_root_node(b: &[u8]) -> Result<TLVElement<'_>, Error> {
    let (element, _) = read_element(b)?;
    if element.element_type == ElementType::EndCnt {
        Err(ErrorCode::InvalidData)?;
    }

    Ok(element)
}

pub fn get_root_node_struct(b: &[u8]) -> Result<TLVElement<'_>, Error> {
    get_root_node(b)?.confirm_struct()
}

pub fn get_root_node_list(b: &[u8]) -> Result<TLVElement<'_>, Error> {
    get_root_node(b)?.confirm_list()
}

fn print_element(element: &TLVElement, depth: usize) {
    info!("{:indent$}{}", "", element, indent = depth * 4);
    if let Some(iter) = element.enter() {
        for child in iter {
            print_element(&child, depth + 1);
        }
        info!("{:indent$}>", "", indent = depth * 4);
    }
}

pub fn print_tlv_list(b: &[u8]) {
    info!("TLV list:");
    match get_root_node(b) {
        Ok(root) => print_element(&root, 0),
        Err(e) => info!("<invalid TLV: {}>", e),
    }
    info!("---------");
}

#[cfg(test)]
mod tests {
    use super::{get_root_node, get_root_node_struct, ElementType, TLVElement, TagType};
    use crate::error::ErrorCode;

    #[test]
    fn test_short_length_tag() {
        // The 0x36 is an array with a tag, but we leave out the tag field
        let b = [0x15, 0x36];
        assert_eq!(
            get_root_node(&b).unwrap_err().code(),
            ErrorCode::TruncatedPacket
        );
    }

    #[test]
    fn test_invalid_value_type() {
        // 0x1f is not a valid value type
        let b = [0x15, 0x1f];
        assert_eq!(get_root_node(&b).unwrap_err().code(), ErrorCode::InvalidData);
    }

    #[test]
    fn test_missing_end_container() {
        let b = [0x15, 0x24, 0x01, 0x05];
        assert_eq!(
            get_root_node(&b).unwrap_err().code(),
            ErrorCode::TruncatedPacket
        );
    }

    #[test]
    fn test_short_length_value_immediate() {
        // A context-tagged u16 with only one byte of value
        let b = [0x15, 0x25, 0x00, 0x01];
        assert!(get_root_node(&b).is_err());
    }

    #[test]
    fn test_short_length_value_string() {
        // A tagged string, with tag 0 and length 0xb, but only 4 bytes in the string
        let b = [0x15, 0x30, 0x00, 0x0b, 0x73, 0x6d, 0x61, 0x72, 0x18];
        assert!(get_root_node(&b).is_err());
    }

    #[test]
    fn test_find_tag_and_iterate() {
        // {0: 5, 1: [true, {}], 2: "ok"}
        let b = [
            0x15, 0x24, 0x00, 0x05, 0x36, 0x01, 0x09, 0x15, 0x18, 0x18, 0x2c, 0x02, 0x02, b'o',
            b'k', 0x18,
        ];
        let root = get_root_node_struct(&b).unwrap();

        assert_eq!(root.find_tag(0).unwrap().u32().unwrap(), 5);
        assert_eq!(root.find_tag(2).unwrap().utf8().unwrap(), "ok");
        assert_eq!(
            root.find_tag(3).unwrap_err().code(),
            ErrorCode::TLVNotFound
        );

        let arr = root.find_tag(1).unwrap().confirm_array().unwrap();
        let mut iter = arr.enter().unwrap();
        assert_eq!(
            iter.next(),
            Some(TLVElement::new(TagType::Anonymous, ElementType::True))
        );
        let inner = iter.next().unwrap();
        assert!(inner.confirm_struct().is_ok());
        assert_eq!(inner.enter().unwrap().count(), 0);
        assert_eq!(iter.next(), None);

        assert_eq!(root.enter().unwrap().count(), 3);
    }

    #[test]
    fn test_signed_widening() {
        let b = [0x01, 0xd4, 0xfe];
        let root = get_root_node(&b).unwrap();
        assert_eq!(root.i64().unwrap(), -300);
        assert!(root.u16().is_err());
    }
}
