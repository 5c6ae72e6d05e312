// SPDX-License-Identifier: MIT

pub mod scoring;
pub mod search;
