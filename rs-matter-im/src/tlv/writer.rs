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

use super::{ElementType, TLVElement, TLVValueType, TagType, TAG_SHIFT_BITS, TAG_SIZE_MAP};
use crate::{error::*, utils::writebuf::WriteBuf};

pub struct TLVWriter<'a, 'b> {
    buf: &'a mut WriteBuf<'b>,
}

impl<'a, 'b> TLVWriter<'a, 'b> {
    pub fn new(buf: &'a mut WriteBuf<'b>) -> Self {
        TLVWriter { buf }
    }

    #[inline(always)]
    fn put_control_tag(&mut self, tag_type: TagType, val_type: TLVValueType) -> Result<(), Error> {
        let (tag_id, tag_val) = match tag_type {
            TagType::Anonymous => (0_u8, 0),
            TagType::Context(v) => (1, v as u64),
            TagType::CommonPrf16(v) => (2, v as u64),
            TagType::CommonPrf32(v) => (3, v as u64),
            TagType::ImplPrf16(v) => (4, v as u64),
            TagType::ImplPrf32(v) => (5, v as u64),
            TagType::FullQual48(v) => (6, v),
            TagType::FullQual64(v) => (7, v),
        };

        // Control and tag go in (or fail) together, so that an overflow never
        // leaves a dangling control byte behind
        let anchor = self.buf.get_tail();
        let result = self
            .buf
            .le_u8((tag_id << TAG_SHIFT_BITS) | (val_type as u8))
            .and_then(|_| {
                if tag_type != TagType::Anonymous {
                    self.buf.le_uint(TAG_SIZE_MAP[tag_id as usize], tag_val)
                } else {
                    Ok(())
                }
            });

        if result.is_err() {
            self.buf.rewind_tail_to(anchor);
        }

        result
    }

    /// Runs `f` and rewinds everything it wrote if it fails.
    fn atomic<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        let anchor = self.buf.get_tail();
        let result = f(self);
        if result.is_err() {
            self.buf.rewind_tail_to(anchor);
        }

        result
    }

    pub fn i8(&mut self, tag_type: TagType, data: i8) -> Result<(), Error> {
        self.atomic(|tw| {
            tw.put_control_tag(tag_type, TLVValueType::S8)?;
            tw.buf.le_i8(data)
        })
    }

    pub fn u8(&mut self, tag_type: TagType, data: u8) -> Result<(), Error> {
        self.atomic(|tw| {
            tw.put_control_tag(tag_type, TLVValueType::U8)?;
            tw.buf.le_u8(data)
        })
    }

    pub fn i16(&mut self, tag_type: TagType, data: i16) -> Result<(), Error> {
        if data >= i8::MIN as i16 && data <= i8::MAX as i16 {
            self.i8(tag_type, data as i8)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::S16)?;
                tw.buf.le_i16(data)
            })
        }
    }

    pub fn u16(&mut self, tag_type: TagType, data: u16) -> Result<(), Error> {
        if data <= 0xff {
            self.u8(tag_type, data as u8)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::U16)?;
                tw.buf.le_u16(data)
            })
        }
    }

    pub fn i32(&mut self, tag_type: TagType, data: i32) -> Result<(), Error> {
        if data >= i16::MIN as i32 && data <= i16::MAX as i32 {
            self.i16(tag_type, data as i16)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::S32)?;
                tw.buf.le_i32(data)
            })
        }
    }

    pub fn u32(&mut self, tag_type: TagType, data: u32) -> Result<(), Error> {
        if data <= 0xffff {
            self.u16(tag_type, data as u16)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::U32)?;
                tw.buf.le_u32(data)
            })
        }
    }

    pub fn i64(&mut self, tag_type: TagType, data: i64) -> Result<(), Error> {
        if data >= i32::MIN as i64 && data <= i32::MAX as i64 {
            self.i32(tag_type, data as i32)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::S64)?;
                tw.buf.le_i64(data)
            })
        }
    }

    pub fn u64(&mut self, tag_type: TagType, data: u64) -> Result<(), Error> {
        if data <= 0xffffffff {
            self.u32(tag_type, data as u32)
        } else {
            self.atomic(|tw| {
                tw.put_control_tag(tag_type, TLVValueType::U64)?;
                tw.buf.le_u64(data)
            })
        }
    }

    pub fn f32(&mut self, tag_type: TagType, data: f32) -> Result<(), Error> {
        self.atomic(|tw| {
            tw.put_control_tag(tag_type, TLVValueType::F32)?;
            tw.buf.le_f32(data)
        })
    }

    pub fn f64(&mut self, tag_type: TagType, data: f64) -> Result<(), Error> {
        self.atomic(|tw| {
            tw.put_control_tag(tag_type, TLVValueType::F64)?;
            tw.buf.le_f64(data)
        })
    }

    /// Octet string, using the narrowest length prefix which fits `data`.
    pub fn str(&mut self, tag_type: TagType, data: &[u8]) -> Result<(), Error> {
        self.string(tag_type, data, TLVValueType::Str8l)
    }

    /// UTF-8 string, using the narrowest length prefix which fits `data`.
    pub fn utf8(&mut self, tag_type: TagType, data: &str) -> Result<(), Error> {
        self.string(tag_type, data.as_bytes(), TLVValueType::Utf8l)
    }

    fn string(&mut self, tag_type: TagType, data: &[u8], base: TLVValueType) -> Result<(), Error> {
        // Str8l/Str16l/Str32l (resp. Utf..) are consecutive value types
        let (width, len_bytes) = if data.len() <= u8::MAX as usize {
            (0, 1)
        } else if data.len() <= u16::MAX as usize {
            (1, 2)
        } else if data.len() <= u32::MAX as usize {
            (2, 4)
        } else {
            Err(ErrorCode::InvalidArgument)?
        };

        let val_type = match (base, width) {
            (TLVValueType::Str8l, 0) => TLVValueType::Str8l,
            (TLVValueType::Str8l, 1) => TLVValueType::Str16l,
            (TLVValueType::Str8l, _) => TLVValueType::Str32l,
            (_, 0) => TLVValueType::Utf8l,
            (_, 1) => TLVValueType::Utf16l,
            _ => TLVValueType::Utf32l,
        };

        self.atomic(|tw| {
            tw.put_control_tag(tag_type, val_type)?;
            tw.buf.le_uint(len_bytes, data.len() as u64)?;
            tw.buf.copy_from_slice(data)
        })
    }

    fn no_val(&mut self, tag_type: TagType, element: TLVValueType) -> Result<(), Error> {
        self.put_control_tag(tag_type, element)
    }

    pub fn start_struct(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.no_val(tag_type, TLVValueType::Struct)
    }

    pub fn start_array(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.no_val(tag_type, TLVValueType::Array)
    }

    pub fn start_list(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.no_val(tag_type, TLVValueType::List)
    }

    pub fn end_container(&mut self) -> Result<(), Error> {
        self.no_val(TagType::Anonymous, TLVValueType::EndCnt)
    }

    pub fn null(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.no_val(tag_type, TLVValueType::Null)
    }

    pub fn bool(&mut self, tag_type: TagType, val: bool) -> Result<(), Error> {
        if val {
            self.no_val(tag_type, TLVValueType::True)
        } else {
            self.no_val(tag_type, TLVValueType::False)
        }
    }

    /// Re-encodes an already parsed element (recursively, for containers) under a new tag.
    pub fn element(&mut self, tag_type: TagType, element: &TLVElement) -> Result<(), Error> {
        self.atomic(|tw| match element.get_element_type() {
            ElementType::S8(v) => tw.i8(tag_type, v),
            ElementType::S16(v) => tw.i16(tag_type, v),
            ElementType::S32(v) => tw.i32(tag_type, v),
            ElementType::S64(v) => tw.i64(tag_type, v),
            ElementType::U8(v) => tw.u8(tag_type, v),
            ElementType::U16(v) => tw.u16(tag_type, v),
            ElementType::U32(v) => tw.u32(tag_type, v),
            ElementType::U64(v) => tw.u64(tag_type, v),
            ElementType::False => tw.bool(tag_type, false),
            ElementType::True => tw.bool(tag_type, true),
            ElementType::F32(v) => tw.f32(tag_type, v),
            ElementType::F64(v) => tw.f64(tag_type, v),
            ElementType::Utf8l(s) | ElementType::Utf16l(s) | ElementType::Utf32l(s) => {
                tw.string(tag_type, s, TLVValueType::Utf8l)
            }
            ElementType::Str8l(s) | ElementType::Str16l(s) | ElementType::Str32l(s) => {
                tw.str(tag_type, s)
            }
            ElementType::Null => tw.null(tag_type),
            ElementType::Struct(_) | ElementType::Array(_) | ElementType::List(_) => {
                match element.get_element_type() {
                    ElementType::Struct(_) => tw.start_struct(tag_type)?,
                    ElementType::Array(_) => tw.start_array(tag_type)?,
                    _ => tw.start_list(tag_type)?,
                }

                if let Some(iter) = element.enter() {
                    for child in iter {
                        tw.element(child.get_tag(), &child)?;
                    }
                }

                tw.end_container()
            }
            ElementType::EndCnt => Err(ErrorCode::InvalidData.into()),
        })
    }

    pub fn get_tail(&self) -> usize {
        self.buf.get_tail()
    }

    pub fn rewind_to(&mut self, anchor: usize) {
        self.buf.rewind_tail_to(anchor);
    }

    pub fn get_buf(&mut self) -> &mut WriteBuf<'b> {
        self.buf
    }
}
