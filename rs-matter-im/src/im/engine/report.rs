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

//! Chunked ReportData messages.
//!
//! A report is planned upfront as a sequence of [`ReportItem`]s (attributes first, then
//! events) and then written into as many messages as it takes. Every message keeps
//! [`REPORT_RESERVED_SPACE`] bytes aside for the members closing it, so filling it up
//! with reports never makes it impossible to terminate.

use log::{trace, warn};

use crate::acl::SubjectDescriptor;
use crate::dm::{AttrReadRequest, AttrReadState, ConcretePath, InteractionModel, PathExpander};
use crate::error::{Error, ErrorCode};
use crate::events::EventLog;
use crate::im::{
    write_im_revision, AttrPath, AttrResp, AttrStatus, DataVersionFilter, EventNumber, EventPath,
    EventStatus, GenericPath, IMStatusCode, ReportDataTag, Status, SubscriptionId,
};
use crate::tlv::{TLVWriter, TagType, ToTLV};
use crate::utils::writebuf::WriteBuf;

/// Room kept in every message for the members which close it
pub const REPORT_RESERVED_SPACE: usize = 16;

/// One entry of a planned report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportItem {
    /// The value of an attribute. Failures of attributes expanded from a wildcard are
    /// dropped, unless they are neither about access nor about missing metadata.
    Attr { path: ConcretePath, wildcard: bool },
    AttrStatus { path: GenericPath, status: IMStatusCode },
    EventStatus { path: GenericPath, status: IMStatusCode },
    /// A record of the event log
    Event(EventNumber),
}

impl ReportItem {
    fn is_event(&self) -> bool {
        matches!(self, Self::EventStatus { .. } | Self::Event(_))
    }
}

/// A report in the making: the planned items and how far they got.
#[derive(Debug)]
pub struct Report {
    subscription_id: Option<SubscriptionId>,
    subject: SubjectDescriptor,
    fabric_filtered: bool,
    suppress_response: bool,
    items: Vec<ReportItem>,
    attr_count: usize,
    next: usize,
    state: AttrReadState,
    /// Items emitted into the message being written
    in_chunk: usize,
}

impl Report {
    pub fn new(
        subscription_id: Option<SubscriptionId>,
        subject: SubjectDescriptor,
        fabric_filtered: bool,
        suppress_response: bool,
        mut items: Vec<ReportItem>,
    ) -> Self {
        // Stable: attributes keep their order, and so do events
        items.sort_by_key(ReportItem::is_event);
        let attr_count = items.iter().filter(|item| !item.is_event()).count();

        Self {
            subscription_id,
            subject,
            fabric_filtered,
            suppress_response,
            items,
            attr_count,
            next: 0,
            state: AttrReadState::new(),
            in_chunk: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.items.len()
    }

    /// Writes the next message of the report into `buf`.
    ///
    /// Returns the length of the message and whether more messages follow.
    pub fn write_chunk<M>(
        &mut self,
        model: &M,
        events: &EventLog,
        buf: &mut [u8],
    ) -> Result<(usize, bool), Error>
    where
        M: InteractionModel + ?Sized,
    {
        self.in_chunk = 0;

        let mut wb = WriteBuf::new(buf);
        wb.shrink(REPORT_RESERVED_SPACE)?;

        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous)?;

        if let Some(id) = self.subscription_id {
            tw.u32(TagType::Context(ReportDataTag::SubscriptionId as _), id)?;
        }

        let mut full = false;

        if self.next < self.attr_count {
            full = self.write_section(model, events, &mut tw, ReportDataTag::AttributeReports)?;
        }

        if !full && self.next < self.items.len() {
            self.write_section(model, events, &mut tw, ReportDataTag::EventReports)?;
        }

        tw.get_buf().expand(REPORT_RESERVED_SPACE)?;

        let more = !self.is_done();
        if more {
            tw.bool(TagType::Context(ReportDataTag::MoreChunkedMsgs as _), true)?;
        } else if self.suppress_response {
            tw.bool(TagType::Context(ReportDataTag::SupressResponse as _), true)?;
        }

        write_im_revision(&mut tw)?;
        tw.end_container()?;

        Ok((tw.get_tail(), more))
    }

    /// Writes the attribute or the event section, returning whether the message got full
    fn write_section<M>(
        &mut self,
        model: &M,
        events: &EventLog,
        tw: &mut TLVWriter,
        tag: ReportDataTag,
    ) -> Result<bool, Error>
    where
        M: InteractionModel + ?Sized,
    {
        let end = match tag {
            ReportDataTag::AttributeReports => self.attr_count,
            _ => self.items.len(),
        };

        let anchor = tw.get_tail();

        // The closing byte of the array is reserved along with the array itself
        if tw
            .start_array(TagType::Context(tag as _))
            .and_then(|_| tw.get_buf().shrink(1))
            .is_err()
        {
            tw.rewind_to(anchor);
            return Ok(true);
        }

        let mut full = false;

        while self.next < end {
            let item = self.items[self.next];

            match self.write_item(model, events, tw, &item) {
                Ok(()) => {
                    self.next += 1;
                    self.in_chunk += 1;
                }
                Err(e) if e.code() == ErrorCode::MoreListData => {
                    full = true;
                    break;
                }
                Err(e) if e.code() == ErrorCode::NoSpace && self.in_chunk > 0 => {
                    full = true;
                    break;
                }
                Err(e) if e.code() == ErrorCode::NoSpace => {
                    // Does not fit even into an empty message
                    warn!("Report item {:?} does not fit into a message", item);
                    self.state.reset();
                    self.next += 1;

                    if let ReportItem::Attr { path, .. } = item {
                        atomically(tw, |tw| {
                            AttrResp::Status(AttrStatus::new(
                                &path.to_gp(),
                                IMStatusCode::ResourceExhausted,
                                None,
                            ))
                            .to_tlv(tw, TagType::Anonymous)
                        })?;
                        self.in_chunk += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tw.get_buf().expand(1)?;
        tw.end_container()?;

        Ok(full)
    }

    fn write_item<M>(
        &mut self,
        model: &M,
        events: &EventLog,
        tw: &mut TLVWriter,
        item: &ReportItem,
    ) -> Result<(), Error>
    where
        M: InteractionModel + ?Sized,
    {
        match item {
            ReportItem::Attr { path, wildcard } => {
                let req = AttrReadRequest {
                    path: *path,
                    subject: &self.subject,
                    fabric_filtered: self.fabric_filtered,
                };

                match model.read_attribute(&req, &mut self.state, tw) {
                    Ok(()) => Ok(()),
                    Err(e)
                        if matches!(
                            e.code(),
                            ErrorCode::MoreListData | ErrorCode::NoSpace
                        ) =>
                    {
                        Err(e)
                    }
                    Err(e) => {
                        self.state.reset();

                        if *wildcard && is_silent_for_wildcard(e.code()) {
                            trace!("{}: skipped ({:?})", path, e.code());
                            Ok(())
                        } else {
                            atomically(tw, |tw| {
                                AttrResp::Status(AttrStatus::new(&path.to_gp(), e.into(), None))
                                    .to_tlv(tw, TagType::Anonymous)
                            })
                        }
                    }
                }
            }
            ReportItem::AttrStatus { path, status } => atomically(tw, |tw| {
                AttrResp::Status(AttrStatus::new(path, *status, None))
                    .to_tlv(tw, TagType::Anonymous)
            }),
            ReportItem::EventStatus { path, status } => atomically(tw, |tw| {
                tw.start_struct(TagType::Anonymous)?;
                EventStatus {
                    path: EventPath::new(path),
                    status: Status::new(*status, None),
                }
                .to_tlv(tw, TagType::Context(0))?;
                tw.end_container()
            }),
            ReportItem::Event(number) => match events.get(*number) {
                Some(record) => atomically(tw, |tw| record.to_tlv(tw, TagType::Anonymous)),
                None => {
                    // Evicted since the report was planned
                    trace!("Event {} no longer in the log", number);
                    Ok(())
                }
            },
        }
    }
}

/// Writes whatever `f` writes, or nothing at all
fn atomically<'a, 'b, F>(tw: &mut TLVWriter<'a, 'b>, f: F) -> Result<(), Error>
where
    F: FnOnce(&mut TLVWriter<'a, 'b>) -> Result<(), Error>,
{
    let anchor = tw.get_tail();

    let result = f(tw);
    if result.is_err() {
        tw.rewind_to(anchor);
    }

    result
}

/// Whether a failure of an attribute expanded from a wildcard is left out of the report
pub fn is_silent_for_wildcard(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::UnsupportedAccess
            | ErrorCode::UnsupportedRead
            | ErrorCode::AttributeNotFound
            | ErrorCode::ClusterNotFound
            | ErrorCode::EndpointNotFound
            | ErrorCode::EventNotFound
    )
}

/// Expands the requested attribute paths into report items.
///
/// Clusters matching one of `dataver_filters` are left out.
pub fn plan_attributes<M>(
    model: &M,
    paths: &[AttrPath],
    dataver_filters: &[DataVersionFilter],
) -> Vec<ReportItem>
where
    M: InteractionModel + ?Sized,
{
    let expander = PathExpander::new(model.metadata());

    let filtered = |path: &ConcretePath| {
        dataver_filters.iter().any(|filter| {
            filter.path.endpoint == path.endpoint
                && filter.path.cluster == path.cluster
                && model.dataver(path.endpoint, path.cluster) == Some(filter.data_ver)
        })
    };

    let mut items = Vec::new();

    for path in paths {
        let gp = path.to_gp();
        let wildcard = gp.is_wildcard();

        match expander.expand_attributes(&gp) {
            Ok(expanded) => items.extend(
                expanded
                    .into_iter()
                    .filter(|concrete| !filtered(concrete))
                    .map(|concrete| ReportItem::Attr {
                        path: concrete,
                        wildcard,
                    }),
            ),
            Err(e) => items.push(ReportItem::AttrStatus {
                path: gp,
                status: e.into(),
            }),
        }
    }

    items
}

/// Validates the requested event paths and selects the events to report.
///
/// Concrete paths which do not exist or which the subject may not access are answered
/// with an EventStatusIB. Events numbered below `event_min`, bound to another fabric, or
/// inaccessible to the subject are left out.
pub fn plan_events<M>(
    model: &M,
    events: &EventLog,
    subject: &SubjectDescriptor,
    paths: &[EventPath],
    event_min: EventNumber,
) -> Vec<ReportItem>
where
    M: InteractionModel + ?Sized,
{
    let expander = PathExpander::new(model.metadata());

    let mut items = Vec::new();
    let mut valid = Vec::new();

    for path in paths {
        let gp = path.to_gp();

        if gp.is_wildcard() {
            valid.push(gp);
            continue;
        }

        let checked = expander.expand_events(&gp).and_then(|expanded| {
            expanded
                .iter()
                .try_for_each(|concrete| model.check_event_access(subject, concrete))
        });

        match checked {
            Ok(()) => valid.push(gp),
            Err(e) => items.push(ReportItem::EventStatus {
                path: gp,
                status: e.into(),
            }),
        }
    }

    items.extend(
        events
            .matching(&valid, event_min)
            .filter(|record| record.is_visible_to(subject.fab_idx))
            .filter(|record| model.check_event_access(subject, &record.path).is_ok())
            .map(|record| ReportItem::Event(record.number)),
    );

    items
}
