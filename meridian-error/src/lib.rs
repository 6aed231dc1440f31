// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{Debug, Display},
    result::Result as StdResult,
};

type BoxedErr = Box<dyn StdError + Send + Sync + 'static>;

/// Workspace-wide error type: a boxed error value plus an optional chain of
/// context messages attached along the propagation path.
///
/// `Error` deliberately does not implement [`std::error::Error`]; that is
/// what permits the blanket `From<E: Into<BoxedErr>>` below without
/// colliding with the reflexive `From<Self>` impl, so `?` works on any
/// std-error (and on plain `&str`/`String` messages).
pub struct Error(BoxedErr);

pub type Result<T> = StdResult<T, Error>;

/// A context frame: a message in front of the error it annotates.
struct Frame {
    msg: Cow<'static, str>,
    source: BoxedErr,
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msg)
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl StdError for Frame {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// A bare message promoted to an error.
struct Msg(Cow<'static, str>);

impl Display for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl StdError for Msg {}

impl Error {
    pub fn msg<T: Into<Cow<'static, str>>>(msg: T) -> Self {
        Error(Box::new(Msg(msg.into())))
    }

    /// Wrap this error in a context message. The previous error remains
    /// reachable through the source chain.
    #[must_use]
    pub fn context<T: Into<Cow<'static, str>>>(self, msg: T) -> Self {
        Error(Box::new(Frame { msg: msg.into(), source: self.0 }))
    }

    pub fn inner(self) -> BoxedErr {
        self.0
    }
}

impl AsRef<dyn StdError + Send + Sync + 'static> for Error {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)?;
        let mut source = self.0.source();
        if source.is_some() {
            f.write_str("\n\ncaused by:")?;
        }
        while let Some(err) = source {
            f.write_fmt(format_args!("\n    {err}"))?;
            source = err.source();
        }
        Ok(())
    }
}

// Lets `?` lift any std error, `String`, or `&str` into `Error`.
impl<E: Into<BoxedErr>> From<E> for Error {
    fn from(value: E) -> Self {
        Error(value.into())
    }
}

/// `.context("...")` on `Result`s of both foreign errors and [`Error`].
pub trait ResultExtension {
    type T;
    fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<Self::T>;
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, msg_fn: F) -> Result<Self::T>;
}

impl<T, E: StdError + Send + Sync + 'static> ResultExtension for StdResult<T, E> {
    type T = T;
    fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        self.map_err(|e| Error::from(e).context(msg))
    }
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, msg_fn: F) -> Result<T> {
        self.map_err(|e| Error::from(e).context(msg_fn()))
    }
}

// `Error` is not a std error, so the impl above does not cover our own Result.
impl<T> ResultExtension for Result<T> {
    type T = T;
    fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        self.map_err(|e| e.context(msg))
    }
    fn with_context<F: FnOnce() -> M, M: Into<Cow<'static, str>>>(self, msg_fn: F) -> Result<T> {
        self.map_err(|e| e.context(msg_fn()))
    }
}
