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

//! This module contains the building blocks shared by every `Looper`: the uptime clock, the
//! construction flags, the schedulable `Entry` and the ordered `Queue` of entries.

pub(crate) mod clock;
pub(crate) mod entry;
pub(crate) mod flags;
pub(crate) mod queue;
