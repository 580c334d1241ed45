// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod encode;
mod proto;

pub use encode::{build, write};
pub use proto::*;
