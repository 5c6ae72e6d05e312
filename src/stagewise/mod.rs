// SPDX-License-Identifier: MIT

pub mod bootstrap;
pub mod config;
pub mod server;
pub mod tools;
pub mod workflow;
