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

use log::{debug, warn};

use crate::error::{Error, ErrorCode};
use crate::im::{CmdId, CmdPath, CommandRef, IMStatusCode, InvResp};
use crate::tlv::{to_tlv_vec, ToTLV};
use crate::utils::runloop::CancelToken;

use super::CmdDetails;

/// Hands out an [`AsyncCommandHandle`] for a command which is about to be deferred.
pub type Deferrer<'r> = &'r dyn Fn(CmdPath, Option<CommandRef>) -> AsyncCommandHandle;

/// The reply sink passed to [`Handler::invoke`](super::Handler::invoke).
///
/// A handler either:
/// - sets a response command with [`CmdReply::set`];
/// - returns `Ok(())` without setting anything, which is answered with a `Success` status;
/// - returns an error, which is answered with the matching status;
/// - or defers the reply with [`CmdReply::defer`] and completes it later.
pub struct CmdReply<'r> {
    cmd: CmdDetails,
    response: Option<InvResp>,
    deferrer: Option<Deferrer<'r>>,
    deferred: bool,
}

impl<'r> CmdReply<'r> {
    pub fn new(cmd: &CmdDetails, deferrer: Option<Deferrer<'r>>) -> Self {
        Self {
            cmd: *cmd,
            response: None,
            deferrer,
            deferred: false,
        }
    }

    /// Replies with the response command `resp_cmd` of the invoked cluster, carrying `data`
    pub fn set<T: ToTLV + ?Sized>(&mut self, resp_cmd: CmdId, data: &T) -> Result<(), Error> {
        if self.deferred {
            Err(ErrorCode::InvalidState)?;
        }

        self.response = Some(InvResp::Cmd {
            path: CmdPath::new(
                Some(self.cmd.endpoint_id),
                Some(self.cmd.cluster_id),
                Some(resp_cmd),
            ),
            data: to_tlv_vec(data)?,
            command_ref: self.cmd.command_ref,
        });

        Ok(())
    }

    /// Replies with a bare status
    pub fn set_status(&mut self, status: IMStatusCode) -> Result<(), Error> {
        if self.deferred {
            Err(ErrorCode::InvalidState)?;
        }

        self.response = Some(InvResp::status(
            self.cmd.path(),
            status,
            self.cmd.command_ref,
        ));

        Ok(())
    }

    /// Takes the reply out of the invoke call.
    ///
    /// Fails with `Busy` where the exchange cannot wait for a deferred reply.
    pub fn defer(&mut self) -> Result<AsyncCommandHandle, Error> {
        let deferrer = self.deferrer.ok_or(ErrorCode::Busy)?;

        if self.deferred {
            Err(ErrorCode::InvalidState)?;
        }

        self.deferred = true;
        self.response = None;

        debug!("{} deferred", self.cmd.concrete());

        Ok(deferrer(self.cmd.path(), self.cmd.command_ref))
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// The response to send once the handler has returned successfully, `None` if deferred
    pub fn into_response(self) -> Option<InvResp> {
        if self.deferred {
            return None;
        }

        Some(self.response.unwrap_or_else(|| {
            InvResp::status(self.cmd.path(), IMStatusCode::Success, self.cmd.command_ref)
        }))
    }
}

/// The owner of a deferred command reply.
///
/// The reply is delivered through the engine's run loop; completing it after the invoke
/// transaction went away (e.g. the exchange was closed) is a no-op. A handle dropped
/// without completing replies with `Failure`.
pub struct AsyncCommandHandle {
    path: CmdPath,
    command_ref: Option<CommandRef>,
    token: CancelToken,
    complete: Option<Box<dyn FnOnce(InvResp)>>,
}

impl AsyncCommandHandle {
    pub fn new<F>(
        path: CmdPath,
        command_ref: Option<CommandRef>,
        token: CancelToken,
        complete: F,
    ) -> Self
    where
        F: FnOnce(InvResp) + 'static,
    {
        Self {
            path,
            command_ref,
            token,
            complete: Some(Box::new(complete)),
        }
    }

    pub fn path(&self) -> &CmdPath {
        &self.path
    }

    pub fn command_ref(&self) -> Option<CommandRef> {
        self.command_ref
    }

    /// Whether the transaction waiting for this reply is gone
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes with the response command `resp_cmd` carrying `data`
    pub fn respond<T: ToTLV + ?Sized>(self, resp_cmd: CmdId, data: &T) -> Result<(), Error> {
        let path = CmdPath::new(self.path.endpoint, self.path.cluster, Some(resp_cmd));
        let data = to_tlv_vec(data)?;
        let command_ref = self.command_ref;

        self.finish(InvResp::Cmd {
            path,
            data,
            command_ref,
        });

        Ok(())
    }

    /// Completes with a bare status
    pub fn status(self, status: IMStatusCode) {
        let resp = InvResp::status(self.path, status, self.command_ref);
        self.finish(resp);
    }

    /// Completes with `Success`, or with the status matching the error
    pub fn complete(self, result: Result<(), Error>) {
        let status = match result {
            Ok(()) => IMStatusCode::Success,
            Err(e) => e.into(),
        };

        self.status(status);
    }

    fn finish(mut self, resp: InvResp) {
        if let Some(complete) = self.complete.take() {
            complete(resp);
        }
    }
}

impl Drop for AsyncCommandHandle {
    fn drop(&mut self) {
        if let Some(complete) = self.complete.take() {
            warn!("Deferred command reply dropped without completion");
            complete(InvResp::status(
                self.path,
                IMStatusCode::Failure,
                self.command_ref,
            ));
        }
    }
}

impl fmt::Debug for AsyncCommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCommandHandle")
            .field("path", &self.path)
            .field("command_ref", &self.command_ref)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{AsyncCommandHandle, CmdReply};
    use crate::dm::CmdDetails;
    use crate::error::ErrorCode;
    use crate::im::{CmdPath, CommandRef, IMStatusCode, InvResp};
    use crate::utils::runloop::CancelToken;

    const CMD: CmdDetails = CmdDetails {
        endpoint_id: 1,
        cluster_id: 6,
        cmd_id: 2,
        command_ref: Some(3),
        fab_idx: 1,
    };

    #[test]
    fn test_implicit_success() {
        let reply = CmdReply::new(&CMD, None);
        assert_eq!(
            reply.into_response(),
            Some(InvResp::status(CMD.path(), IMStatusCode::Success, Some(3)))
        );
    }

    #[test]
    fn test_response_command() {
        let mut reply = CmdReply::new(&CMD, None);
        reply.set(0x10, &5_u8).unwrap();

        match reply.into_response().unwrap() {
            InvResp::Cmd {
                path,
                data,
                command_ref,
            } => {
                assert_eq!(path, CmdPath::new(Some(1), Some(6), Some(0x10)));
                assert_eq!(data, vec![0x04, 0x05]);
                assert_eq!(command_ref, Some(3));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_defer() {
        let completed = Rc::new(RefCell::new(Vec::new()));

        let sink = completed.clone();
        let deferrer = move |path: CmdPath, cref: Option<CommandRef>| {
            let sink = sink.clone();
            AsyncCommandHandle::new(path, cref, CancelToken::new(), move |resp| {
                sink.borrow_mut().push(resp)
            })
        };

        let mut reply = CmdReply::new(&CMD, Some(&deferrer));
        let handle = reply.defer().unwrap();
        assert!(reply.is_deferred());
        assert_eq!(
            reply.set(0x10, &1_u8).unwrap_err().code(),
            ErrorCode::InvalidState
        );
        assert_eq!(reply.into_response(), None);

        assert!(completed.borrow().is_empty());
        handle.complete(Err(ErrorCode::ConstraintError.into()));
        assert_eq!(
            completed.borrow()[0],
            InvResp::status(CMD.path(), IMStatusCode::ConstraintError, Some(3))
        );
    }

    #[test]
    fn test_defer_unavailable() {
        let mut reply = CmdReply::new(&CMD, None);
        assert_eq!(reply.defer().unwrap_err().code(), ErrorCode::Busy);
    }

    #[test]
    fn test_dropped_handle_fails() {
        let completed = Rc::new(RefCell::new(None));

        let sink = completed.clone();
        drop(AsyncCommandHandle::new(
            CMD.path(),
            Some(9),
            CancelToken::new(),
            move |resp| *sink.borrow_mut() = Some(resp),
        ));

        assert_eq!(
            *completed.borrow(),
            Some(InvResp::status(CMD.path(), IMStatusCode::Failure, Some(9)))
        );
    }
}
