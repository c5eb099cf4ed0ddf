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

use crate::error::{Error, ErrorCode};
use crate::im::{AttrDataTag, AttrPath, AttrRespTag, DataVersion, FabricIndex, ListIndex};
use crate::tlv::{FromTLV, Nullable, TLVElement, TLVWriter, TagType, ToTLV};

use super::AttrDetails;

/// Sentinel of [`AttrReadState`] meaning "no list element emitted yet".
pub const INVALID_LIST_INDEX: ListIndex = ListIndex::MAX;

/// Cross-call progress of reading one attribute.
///
/// A list attribute which does not fit in the remaining space of a report is emitted in
/// chunks: first an AttributeReportIB with an empty list, then one list-append
/// AttributeReportIB per element. The state records the index of the next element to
/// emit, so that the read can be resumed in the next report message.
///
/// Must start out as [`AttrReadState::new`] for every attribute; it is reset by the
/// encoder once the attribute has been fully emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrReadState {
    current_index: ListIndex,
    allow_partial: bool,
}

impl AttrReadState {
    pub const fn new() -> Self {
        Self {
            current_index: INVALID_LIST_INDEX,
            allow_partial: false,
        }
    }

    /// The index of the next list element to emit, if list chunking has started
    pub fn current_index(&self) -> Option<ListIndex> {
        (self.current_index != INVALID_LIST_INDEX).then_some(self.current_index)
    }

    /// Whether the attribute is being emitted in chunks
    pub fn is_partial(&self) -> bool {
        self.allow_partial
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for AttrReadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one complete `AttributeReportIB` carrying `value`, or nothing at all.
fn write_attr_report<T: ToTLV + ?Sized>(
    tw: &mut TLVWriter,
    path: &AttrPath,
    dataver: DataVersion,
    value: &T,
) -> Result<(), Error> {
    let anchor = tw.get_tail();

    let result = start_attr_data(tw, path, dataver)
        .and_then(|_| value.to_tlv(tw, TagType::Context(AttrDataTag::Data as _)))
        .and_then(|_| end_attr_data(tw));

    if result.is_err() {
        tw.rewind_to(anchor);
    }

    result
}

fn start_attr_data(tw: &mut TLVWriter, path: &AttrPath, dataver: DataVersion) -> Result<(), Error> {
    tw.start_struct(TagType::Anonymous)?;
    tw.start_struct(TagType::Context(AttrRespTag::Data as _))?;
    tw.u32(TagType::Context(AttrDataTag::DataVer as _), dataver)?;
    path.to_tlv(tw, TagType::Context(AttrDataTag::Path as _))
}

fn end_attr_data(tw: &mut TLVWriter) -> Result<(), Error> {
    tw.end_container()?;
    tw.end_container()
}

/// Encodes the value of one attribute into a report.
///
/// Whatever the handler writes through the encoder either ends up as complete
/// AttributeReportIBs, or is rolled back: a failed encoding never leaves a partial IB
/// behind.
pub struct AttrDataEncoder<'a, 'b, 'c> {
    tw: &'a mut TLVWriter<'b, 'c>,
    state: &'a mut AttrReadState,
    path: AttrPath,
    dataver: DataVersion,
    fab_idx: FabricIndex,
    fab_filter: bool,
}

impl<'a, 'b, 'c> AttrDataEncoder<'a, 'b, 'c> {
    pub fn new(
        attr: &AttrDetails,
        state: &'a mut AttrReadState,
        tw: &'a mut TLVWriter<'b, 'c>,
    ) -> Self {
        Self {
            tw,
            state,
            path: AttrPath {
                list_index: None,
                ..attr.path()
            },
            dataver: attr.dataver,
            fab_idx: attr.fab_idx,
            fab_filter: attr.fab_filter,
        }
    }

    /// The fabric of the accessing subject
    pub fn fab_idx(&self) -> FabricIndex {
        self.fab_idx
    }

    pub fn is_fabric_filtered(&self) -> bool {
        self.fab_filter
    }

    /// Encodes a non-list value.
    ///
    /// Fails with `NoSpace` if the value does not fit.
    pub fn encode<T: ToTLV + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        write_attr_report(self.tw, &self.path, self.dataver, value)
    }

    /// Encodes a list value, with `f` emitting the elements through a [`ListEncoder`].
    ///
    /// `f` must emit the same elements, in the same order, every time it is called.
    /// It is called once if the whole list fits. Otherwise it is called again to emit
    /// the list in chunks, and the call fails with `MoreListData` if at least one
    /// element was emitted before the space ran out (the read is to be resumed with the
    /// same state), or with `NoSpace` if nothing was.
    pub fn encode_list<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&mut ListEncoder<'_, '_, '_>) -> Result<(), Error>,
    {
        if !self.state.allow_partial {
            let anchor = self.tw.get_tail();

            match self.encode_whole_list(&mut f) {
                Ok(()) => {
                    self.state.reset();
                    return Ok(());
                }
                Err(e) if e.code() == ErrorCode::NoSpace => {
                    self.tw.rewind_to(anchor);
                    self.state.allow_partial = true;
                }
                Err(e) => {
                    self.tw.rewind_to(anchor);
                    return Err(e);
                }
            }
        }

        // The empty-list IB only goes out together with at least one element
        let mut header = None;

        if self.state.current_index == INVALID_LIST_INDEX {
            header = Some(self.tw.get_tail());

            let empty: &[u8] = &[];
            write_attr_report(self.tw, &self.path, self.dataver, empty)?;

            self.state.current_index = 0;
        }

        let mut list = ListEncoder {
            tw: &mut *self.tw,
            cursor: Some(&mut *self.state),
            path: self.path,
            dataver: self.dataver,
            fab_idx: self.fab_idx,
            fab_filter: self.fab_filter,
            index: 0,
            written: false,
        };

        match f(&mut list) {
            Ok(()) => {
                self.state.reset();
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NoSpace => {
                if let Some(anchor) = header {
                    self.tw.rewind_to(anchor);
                    self.state.current_index = INVALID_LIST_INDEX;
                }

                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn encode_whole_list<F>(&mut self, f: &mut F) -> Result<(), Error>
    where
        F: FnMut(&mut ListEncoder<'_, '_, '_>) -> Result<(), Error>,
    {
        start_attr_data(self.tw, &self.path, self.dataver)?;
        self.tw
            .start_array(TagType::Context(AttrDataTag::Data as _))?;

        f(&mut ListEncoder {
            tw: &mut *self.tw,
            cursor: None,
            path: self.path,
            dataver: self.dataver,
            fab_idx: self.fab_idx,
            fab_filter: self.fab_filter,
            index: 0,
            written: false,
        })?;

        self.tw.end_container()?;
        end_attr_data(self.tw)
    }
}

/// Emits the elements of a list attribute, see [`AttrDataEncoder::encode_list`].
pub struct ListEncoder<'e, 'b, 'c> {
    tw: &'e mut TLVWriter<'b, 'c>,
    /// `None` while trying to fit the whole list into a single IB
    cursor: Option<&'e mut AttrReadState>,
    path: AttrPath,
    dataver: DataVersion,
    fab_idx: FabricIndex,
    fab_filter: bool,
    index: ListIndex,
    written: bool,
}

impl ListEncoder<'_, '_, '_> {
    pub fn encode<T: ToTLV + ?Sized>(&mut self, item: &T) -> Result<(), Error> {
        let index = self.next_index()?;

        let Some(state) = self.cursor.as_deref_mut() else {
            return item.to_tlv(self.tw, TagType::Anonymous);
        };

        if index < state.current_index {
            // Already emitted in a previous chunk
            return Ok(());
        }

        let path = AttrPath {
            list_index: Some(Nullable::Null),
            ..self.path
        };

        match write_attr_report(self.tw, &path, self.dataver, item) {
            Ok(()) => {
                state.current_index = index + 1;
                self.written = true;
                Ok(())
            }
            Err(e) if e.code() == ErrorCode::NoSpace => Err(if self.written {
                ErrorCode::MoreListData
            } else {
                ErrorCode::NoSpace
            }
            .into()),
            Err(e) => Err(e),
        }
    }

    /// Encodes an element of a fabric-scoped list, dropping it when the read is fabric
    /// filtered and the element belongs to another fabric.
    pub fn encode_fabric_scoped<T: ToTLV + ?Sized>(
        &mut self,
        fab_idx: FabricIndex,
        item: &T,
    ) -> Result<(), Error> {
        if self.fab_filter && fab_idx != self.fab_idx {
            // Still counted, so that chunk positions do not depend on the filter
            self.next_index()?;
            return Ok(());
        }

        self.encode(item)
    }

    fn next_index(&mut self) -> Result<ListIndex, Error> {
        let index = self.index;
        if index >= INVALID_LIST_INDEX - 1 {
            Err(ErrorCode::ConstraintError)?;
        }

        self.index += 1;

        Ok(index)
    }
}

/// What a write of a list attribute asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListOp<'a> {
    /// Replace the whole list with the elements of the array
    ReplaceAll(TLVElement<'a>),
    /// Append one element
    AddItem(TLVElement<'a>),
}

/// The data of one attribute write.
///
/// An empty decoder is passed to close a chunked list write that ended with no
/// elements in its last chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttrDataDecoder<'a> {
    data: Option<TLVElement<'a>>,
    list_index: Option<Nullable<ListIndex>>,
}

impl<'a> AttrDataDecoder<'a> {
    pub fn new(data: TLVElement<'a>, list_index: Option<Nullable<ListIndex>>) -> Self {
        Self {
            data: Some(data),
            list_index,
        }
    }

    pub const fn empty() -> Self {
        Self {
            data: None,
            list_index: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    pub fn element(&self) -> Result<TLVElement<'a>, Error> {
        self.data.ok_or_else(|| ErrorCode::InvalidAction.into())
    }

    pub fn decode<T: FromTLV<'a>>(&self) -> Result<T, Error> {
        T::from_tlv(&self.element()?).map_err(Error::map_invalid_data_type)
    }

    pub fn list_op(&self) -> Result<ListOp<'a>, Error> {
        let data = self.element()?;

        match self.list_index {
            None => Ok(ListOp::ReplaceAll(
                data.confirm_array().map_err(Error::map_invalid_data_type)?,
            )),
            Some(Nullable::Null) => Ok(ListOp::AddItem(data)),
            // Writing single list elements by index is not supported by the protocol
            Some(Nullable::NotNull(_)) => Err(ErrorCode::InvalidAction.into()),
        }
    }
}
