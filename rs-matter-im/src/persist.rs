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

//! The persistent key/value storage the engine keeps its durable state in.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::trace;

use crate::error::{Error, ErrorCode};

/// A byte-oriented key/value store.
///
/// There are no transactions: a reader must treat a missing value as absent, and be
/// prepared for a value which fails to parse.
pub trait KvBlobStore {
    /// Loads the value of `key` into `buf`.
    ///
    /// Returns `Ok(None)` if there is no such key, and fails with `BufferTooSmall` if
    /// the value does not fit.
    fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error>;

    fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error>;

    /// Removes `key`; removing a missing key is not an error
    fn remove(&mut self, key: &str) -> Result<(), Error>;
}

impl<T> KvBlobStore for &mut T
where
    T: KvBlobStore,
{
    fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
        (**self).load(key, buf)
    }

    fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        (**self).store(key, data)
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        (**self).remove(key)
    }
}

/// A volatile store, for tests and for nodes without persistence.
#[derive(Debug, Default, Clone)]
pub struct MemKvStore {
    values: BTreeMap<String, Vec<u8>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl KvBlobStore for MemKvStore {
    fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };

        let buf = buf
            .get_mut(..value.len())
            .ok_or(ErrorCode::BufferTooSmall)?;
        buf.copy_from_slice(value);

        Ok(Some(buf))
    }

    fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        self.values.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        self.values.remove(key);
        Ok(())
    }
}

/// A store keeping every value in its own file of a directory.
///
/// Values are written to a temporary file which is then renamed over the old one, so
/// a crash never leaves a torn value behind.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        fs::create_dir_all(dir.as_ref())?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(&self, key: &str) -> PathBuf {
        // Keys are hierarchical ("a/b/c"), files are not
        self.dir.join(key.replace('/', "."))
    }
}

impl KvBlobStore for FileKvStore {
    fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
        let mut file = match fs::File::open(self.path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => Err(e)?,
        };

        let mut offset = 0;

        loop {
            if offset == buf.len() {
                // Full buffer: fine only if the file ends here
                let mut extra = [0; 1];
                if file.read(&mut extra)? != 0 {
                    Err(ErrorCode::BufferTooSmall)?;
                }
                break;
            }

            let len = file.read(&mut buf[offset..])?;
            if len == 0 {
                break;
            }

            offset += len;
        }

        trace!("Loaded {} bytes from {}", offset, key);

        Ok(Some(&buf[..offset]))
    }

    fn store(&mut self, key: &str, data: &[u8]) -> Result<(), Error> {
        let path = self.path(key);
        let tmp = path.with_extension("tmp");

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &path)?;

        trace!("Stored {} bytes to {}", data.len(), key);

        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
