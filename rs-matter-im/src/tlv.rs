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

//! Matter TLV: the tag-length-value encoding used by every Interaction Model payload.
//!
//! - [`TLVWriter`] emits elements into a [`WriteBuf`](crate::utils::writebuf::WriteBuf),
//!   always choosing the smallest integer/length width, and can be rewound to an anchor.
//! - [`TLVElement`] is a zero-copy view over an encoded element; containers are iterated
//!   with [`TLVElement::enter`].
//! - [`FromTLV`] / [`ToTLV`] convert between Rust values and elements.

use num_derive::FromPrimitive;

pub use parser::*;
pub use traits::*;
pub use writer::*;

mod parser;
mod traits;
mod writer;

/// Represents the TLV tag (its form and value) of an element.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TagType {
    Anonymous,
    Context(u8),
    CommonPrf16(u16),
    CommonPrf32(u32),
    ImplPrf16(u16),
    ImplPrf32(u32),
    FullQual48(u64),
    FullQual64(u64),
}

/// The value type stored in the lower five bits of the control byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum TLVValueType {
    S8 = 0,
    S16 = 1,
    S32 = 2,
    S64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    False = 8,
    True = 9,
    F32 = 10,
    F64 = 11,
    Utf8l = 12,
    Utf16l = 13,
    Utf32l = 14,
    Utf64l = 15,
    Str8l = 16,
    Str16l = 17,
    Str32l = 18,
    Str64l = 19,
    Null = 20,
    Struct = 21,
    Array = 22,
    List = 23,
    EndCnt = 24,
}

pub(crate) const TAG_SHIFT_BITS: u8 = 5;
pub(crate) const TAG_MASK: u8 = 0xe0;
pub(crate) const TYPE_MASK: u8 = 0x1f;
pub(crate) const TAG_SIZE_MAP: [usize; 8] = [0, 1, 2, 4, 2, 4, 6, 8];
