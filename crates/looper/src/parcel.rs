// Copyright 2024 Shingo OKAWA and a number of other contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! This module contains the implementation of a `Parcel`, an addressed message delivered to exactly
//! one `Receiver` on the loop thread of a `Looper`.
//!
//! Parcels are plain values: the sender gives up the parcel when sending it, and the receiver owns it
//! for the duration of `handle_parcel`.

use std::{any, fmt, sync};

/// Implemented by components which want to receive parcels. Panics raised by a receiver are caught
/// by the delivering looper and reported to its exception handler.
pub trait Receiver: Send + Sync + 'static {
    /// Handles a delivered `parcel`.
    fn handle_parcel(&self, parcel: Parcel);
}

impl<F> Receiver for F
where
    F: Fn(Parcel) + Send + Sync + 'static,
{
    fn handle_parcel(&self, parcel: Parcel) {
        self(parcel)
    }
}

/// Represents where a parcel is delivered.
#[derive(Clone)]
pub enum Target {
    /// Delivers the parcel to the given receiver.
    Receiver(sync::Arc<dyn Receiver>),
    /// Delivers the parcel to the receiver registered on the named channel of a `Router`.
    Channel(String),
}

impl fmt::Debug for Target {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiver(_) => write!(fmt, "Target::Receiver")?,
            Self::Channel(name) => write!(fmt, "Target::Channel({name})")?,
        }
        Ok(())
    }
}

/// An addressed message: a result code, an optional payload and an optional target.
pub struct Parcel {
    code: i32,
    payload: Option<Box<dyn any::Any + Send>>,
    target: Option<Target>,
    /// Uptime the parcel is scheduled to be delivered at, set when it is sent.
    when: u64,
}

impl Parcel {
    /// Creates a new `Parcel` carrying only `code`.
    pub fn new(code: i32) -> Self {
        Self {
            code,
            payload: None,
            target: None,
            when: 0,
        }
    }

    /// Attaches `payload` to the parcel.
    pub fn with_payload<T>(mut self, payload: T) -> Self
    where
        T: any::Any + Send,
    {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Addresses the parcel to `receiver`.
    pub fn with_receiver(mut self, receiver: sync::Arc<dyn Receiver>) -> Self {
        self.target = Some(Target::Receiver(receiver));
        self
    }

    /// Addresses the parcel to the receiver registered on `channel`.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.target = Some(Target::Channel(channel.into()));
        self
    }

    /// Returns the code the receiver dispatches on.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the uptime the parcel was scheduled for. Zero until the parcel is sent.
    pub fn when(&self) -> u64 {
        self.when
    }

    /// Returns the explicit target, if the parcel has one.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Returns true if the parcel carries a payload.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Returns a reference to the payload if it is of type `T`.
    pub fn payload<T>(&self) -> Option<&T>
    where
        T: any::Any,
    {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// Takes the payload out of the parcel if it is of type `T`. A payload of another type is left
    /// in place.
    pub fn take_payload<T>(&mut self) -> Option<T>
    where
        T: any::Any,
    {
        let payload = self.payload.take()?;
        match payload.downcast::<T>() {
            Ok(payload) => Some(*payload),
            Err(payload) => {
                self.payload = Some(payload);
                None
            }
        }
    }

    pub(crate) fn set_when(&mut self, when: u64) {
        self.when = when;
    }

    pub(crate) fn set_target(&mut self, target: Target) {
        self.target = Some(target);
    }

    /// Returns the receiver the parcel resolves to, if its target is already a receiver.
    pub(crate) fn receiver(&self) -> Option<sync::Arc<dyn Receiver>> {
        match &self.target {
            Some(Target::Receiver(receiver)) => Some(sync::Arc::clone(receiver)),
            _ => None,
        }
    }
}

impl fmt::Debug for Parcel {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Parcel")
            .field("code", &self.code)
            .field("has_payload", &self.payload.is_some())
            .field("target", &self.target)
            .field("when", &self.when)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_typed() {
        let mut parcel = Parcel::new(7).with_payload(String::from("hello"));
        assert_eq!(parcel.code(), 7);
        assert_eq!(parcel.payload::<String>().map(String::as_str), Some("hello"));
        assert!(parcel.payload::<u32>().is_none());
        assert_eq!(parcel.take_payload::<u32>(), None);
        assert!(parcel.has_payload());
        assert_eq!(parcel.take_payload::<String>().as_deref(), Some("hello"));
        assert!(!parcel.has_payload());
    }

    #[test]
    fn addresses_receiver_or_channel() {
        let parcel = Parcel::new(1).with_channel("metrics");
        assert!(matches!(parcel.target(), Some(Target::Channel(name)) if name == "metrics"));
        assert!(parcel.receiver().is_none());

        let parcel = Parcel::new(1).with_receiver(sync::Arc::new(|_: Parcel| {}));
        assert!(parcel.receiver().is_some());
        assert_eq!(parcel.when(), 0);
    }
}
